use anyhow::{Context, Result};
use live_updates::LiveUpdatesConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [live_updates]
//                    heartbeat_secs = 30
//
//   env var:         COURSEROOM_LIVE_UPDATES__HEARTBEAT_SECS=30   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub live_updates: LiveUpdatesFileConfig,
}

/// Server knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Push protocol tunables (lives under `[live_updates]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LiveUpdatesFileConfig {
    #[serde(default = "default_provisional_ttl_secs")]
    pub provisional_ttl_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_render_kb")]
    pub max_render_kb: usize,
    #[serde(default = "default_reconcile_orphans")]
    pub reconcile_orphans: bool,
}

impl Default for LiveUpdatesFileConfig {
    fn default() -> Self {
        Self {
            provisional_ttl_secs: default_provisional_ttl_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            sweep_secs: default_sweep_secs(),
            channel_capacity: default_channel_capacity(),
            max_render_kb: default_max_render_kb(),
            reconcile_orphans: default_reconcile_orphans(),
        }
    }
}

fn default_provisional_ttl_secs() -> u64 {
    60
}
fn default_heartbeat_secs() -> u64 {
    15
}
fn default_sweep_secs() -> u64 {
    60
}
fn default_channel_capacity() -> usize {
    32
}
fn default_max_render_kb() -> usize {
    8 * 1024
}
fn default_reconcile_orphans() -> bool {
    true
}

/// Build a figment that layers: defaults → config.toml → COURSEROOM_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `COURSEROOM_SERVER__PORT=8080`  →  `server.port = 8080`
///   `COURSEROOM_LIVE_UPDATES__SWEEP_SECS=30`  →  `live_updates.sweep_secs = 30`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("COURSEROOM_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;

/// Resolved listen address. CLI flags win over the file and env layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn resolve(fc: &ServerFileConfig, host: Option<String>, port: Option<u16>) -> Self {
        Self {
            host: host
                .or_else(|| fc.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port.or(fc.port).unwrap_or(DEFAULT_PORT),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolved live-updates configuration. Intervals of zero are raised to one
/// second, since a zero period would spin the background tasks.
pub fn live_updates_config(fc: &LiveUpdatesFileConfig) -> LiveUpdatesConfig {
    LiveUpdatesConfig {
        provisional_ttl: Duration::from_secs(fc.provisional_ttl_secs.max(1)),
        heartbeat_interval: Duration::from_secs(fc.heartbeat_secs.max(1)),
        sweep_interval: Duration::from_secs(fc.sweep_secs.max(1)),
        channel_capacity: fc.channel_capacity.max(1),
        max_render_bytes: fc.max_render_kb * 1024,
        reconcile_orphans: fc.reconcile_orphans,
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct CourseroomConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl CourseroomConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".courseroom"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("courseroom.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)
                .with_context(|| format!("Failed to delete database: {:?}", self.db_path))?;
            info!("Database reset: {:?}", self.db_path);

            let wal_path = self.db_path.with_extension("db-wal");
            if wal_path.exists() {
                std::fs::remove_file(&wal_path)?;
            }
            let shm_path = self.db_path.with_extension("db-shm");
            if shm_path.exists() {
                std::fs::remove_file(&shm_path)?;
            }
        }
        Ok(())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

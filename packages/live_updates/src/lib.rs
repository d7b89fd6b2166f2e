//! Server-pushed re-renders for open browser tabs.
//!
//! Every page request passes through [`middleware`]. An ordinary request is
//! registered under a fresh [`Nonce`] and served normally; the browser then
//! repeats the request with the nonce in the `Live-Updates` header, and that
//! request is held open as a newline-delimited stream. Whenever business code
//! calls [`LiveUpdates::notify_scope_changed`], every tab viewing a page of
//! that scope receives a complete re-render of its page.
//!
//! [`abort_middleware`] goes on the outermost router: a request carrying
//! `Live-Updates-Abort` closes that nonce's channel, whatever its path.
//!
//! The registry of nonces lives in SQLite and survives restarts; the open
//! transports live in this process only.

mod config;
mod connections;
mod dispatch;
mod error;
mod gc;
mod handshake;
mod heartbeat;
mod metrics;
mod nonce;
mod protocol;
mod render;
mod scope;
mod store;
mod teardown;

pub use config::LiveUpdatesConfig;
pub use connections::ConnectionTable;
pub use dispatch::DispatchReport;
pub use error::{HandshakeRejection, LiveUpdatesError, RenderError};
pub use handshake::{abort_middleware, middleware};
pub use metrics::{LiveMetrics, MetricsSnapshot};
pub use nonce::{LiveNonce, NONCE_BYTES, Nonce, NonceError};
pub use protocol::{LIVE_UPDATES, LIVE_UPDATES_ABORT, STREAM_CONTENT_TYPE, decode_unit};
pub use render::{Renderer, ReplayTarget, RouterRenderer};
pub use scope::{ScopeId, ScopeResolver};
pub use store::{ClientRecord, RegistryCounts, RegistryStore};

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

use crate::dispatch::DispatchCommand;

/// State shared by the middleware and every background task.
pub(crate) struct Shared {
    pub store: RegistryStore,
    pub connections: ConnectionTable,
    pub metrics: Arc<LiveMetrics>,
    pub config: LiveUpdatesConfig,
    pub renderer: Arc<dyn Renderer>,
    pub resolver: Arc<dyn ScopeResolver>,
    /// Parent of every connection's token
    pub shutdown: CancellationToken,
}

/// Handle to the live-updates core. Cheap to clone; used as the state of
/// [`middleware`].
#[derive(Clone)]
pub struct LiveUpdates {
    shared: Arc<Shared>,
    dispatcher: mpsc::UnboundedSender<DispatchCommand>,
    _guard: Arc<DropGuard>,
}

impl LiveUpdates {
    /// Create the registry table if needed, reconcile rows left by a previous
    /// process, and start the dispatcher and the sweeper.
    pub async fn new(
        pool: SqlitePool,
        config: LiveUpdatesConfig,
        renderer: Arc<dyn Renderer>,
        resolver: Arc<dyn ScopeResolver>,
    ) -> Result<Self, LiveUpdatesError> {
        RegistryStore::migrate(&pool).await?;
        let store = RegistryStore::new(pool);
        if config.reconcile_orphans {
            store.delete_connected().await?;
        }

        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            store,
            connections: ConnectionTable::new(),
            metrics: Arc::new(LiveMetrics::new()),
            config,
            renderer,
            resolver,
            shutdown: shutdown.clone(),
        });

        let (dispatcher, commands) = mpsc::unbounded_channel();
        tokio::spawn(dispatch::run(shared.clone(), commands));
        gc::spawn_sweeper(shared.clone());

        info!(
            "Live updates started (provisional ttl {}s, heartbeat {}s, sweep {}s)",
            shared.config.provisional_ttl.as_secs(),
            shared.config.heartbeat_interval.as_secs(),
            shared.config.sweep_interval.as_secs()
        );

        Ok(Self {
            shared,
            dispatcher,
            _guard: Arc::new(shutdown.drop_guard()),
        })
    }

    /// Push fresh renders to every client viewing a page of `scope`.
    /// Returns immediately; the push happens on the dispatcher.
    pub fn notify_scope_changed(&self, scope: ScopeId) {
        let command = DispatchCommand::ScopeChanged { scope, done: None };
        if self.dispatcher.send(command).is_err() {
            warn!(scope = %scope, "Dispatcher is gone, change notification lost");
        }
    }

    /// Like [`notify_scope_changed`](Self::notify_scope_changed) but waits
    /// for the dispatch to finish.
    pub async fn dispatch(&self, scope: ScopeId) -> Result<DispatchReport, LiveUpdatesError> {
        let (done, report) = oneshot::channel();
        self.dispatcher
            .send(DispatchCommand::ScopeChanged {
                scope,
                done: Some(done),
            })
            .map_err(|_| LiveUpdatesError::DispatcherGone)?;
        report.await.map_err(|_| LiveUpdatesError::DispatcherGone)?
    }

    /// Drop the live connection of `nonce`, if this process holds one.
    /// Returns whether anything was removed.
    pub async fn abort(&self, nonce: &Nonce) -> Result<bool, LiveUpdatesError> {
        Ok(teardown::abort(&self.shared, nonce).await?)
    }

    /// Run one garbage-collection sweep as of `now` (unix seconds).
    pub async fn sweep_expired(&self, now: i64) -> Result<u64, LiveUpdatesError> {
        Ok(gc::sweep(&self.shared, now).await?)
    }

    pub(crate) fn catch_up(&self, nonce: Nonce) {
        if self
            .dispatcher
            .send(DispatchCommand::CatchUp {
                nonce: nonce.clone(),
            })
            .is_err()
        {
            warn!(nonce = %nonce, "Dispatcher is gone, catch-up push lost");
        }
    }

    pub fn store(&self) -> &RegistryStore {
        &self.shared.store
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.shared.connections
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.shared.metrics
    }

    pub fn config(&self) -> &LiveUpdatesConfig {
        &self.shared.config
    }

    /// Stop the background tasks and close every open channel.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

/// Current unix time in seconds.
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

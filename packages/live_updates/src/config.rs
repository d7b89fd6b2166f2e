use std::time::Duration;

/// Tunables of the live-updates core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveUpdatesConfig {
    /// How long a registered client may take to open its push channel
    pub provisional_ttl: Duration,
    /// Interval between keep-alive units on an open channel
    pub heartbeat_interval: Duration,
    /// Interval between sweeps of lapsed provisional registrations
    pub sweep_interval: Duration,
    /// Units buffered per open channel before pushes are dropped
    pub channel_capacity: usize,
    /// Upper bound on a single rendered page
    pub max_render_bytes: usize,
    /// Delete connected rows left behind by a previous process on startup
    pub reconcile_orphans: bool,
}

impl Default for LiveUpdatesConfig {
    fn default() -> Self {
        Self {
            provisional_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(60),
            channel_capacity: 32,
            max_render_bytes: 8 * 1024 * 1024,
            reconcile_orphans: true,
        }
    }
}

impl LiveUpdatesConfig {
    /// Provisional window in whole seconds, as stored in the registry.
    pub(crate) fn provisional_ttl_secs(&self) -> i64 {
        self.provisional_ttl.as_secs().max(1) as i64
    }
}

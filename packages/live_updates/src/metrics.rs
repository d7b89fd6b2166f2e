//! Live-updates metrics for observability
//!
//! Counters are updated on the protocol's hot paths and exposed as a
//! serializable snapshot.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct LiveMetrics {
    // Connection metrics
    /// Push channels currently held open
    pub connections_active: AtomicU64,
    /// Push channels opened since start
    pub connections_total: AtomicU64,

    // Handshake metrics
    /// Clients registered by an ordinary request
    pub registrations: AtomicU64,
    /// Opens answered with 422
    pub rejections: AtomicU64,

    // Push metrics
    pub pushes_sent: AtomicU64,
    /// Pushes dropped because the client was not reading
    pub pushes_dropped: AtomicU64,
    /// Pushes lost because the page failed to render
    pub replay_failures: AtomicU64,
    pub heartbeats_sent: AtomicU64,

    // Registry metrics
    pub dispatches: AtomicU64,
    pub aborts: AtomicU64,
    /// Provisional clients removed by the sweeper
    pub clients_collected: AtomicU64,

    start_time: Option<Instant>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn client_registered(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_sent(&self) {
        self.pushes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_dropped(&self) {
        self.pushes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replay_failed(&self) {
        self.replay_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatched(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn aborted(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn collected(&self, n: u64) {
        self.clients_collected.fetch_add(n, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.connections_active.load(Ordering::Relaxed),
                total: self.connections_total.load(Ordering::Relaxed),
            },
            handshakes: HandshakeMetrics {
                registered: self.registrations.load(Ordering::Relaxed),
                rejected: self.rejections.load(Ordering::Relaxed),
            },
            pushes: PushMetrics {
                sent: self.pushes_sent.load(Ordering::Relaxed),
                dropped: self.pushes_dropped.load(Ordering::Relaxed),
                failed: self.replay_failures.load(Ordering::Relaxed),
                heartbeats: self.heartbeats_sent.load(Ordering::Relaxed),
            },
            registry: RegistryMetrics {
                dispatches: self.dispatches.load(Ordering::Relaxed),
                aborts: self.aborts.load(Ordering::Relaxed),
                collected: self.clients_collected.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub handshakes: HandshakeMetrics,
    pub pushes: PushMetrics,
    pub registry: RegistryMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeMetrics {
    pub registered: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMetrics {
    pub sent: u64,
    pub dropped: u64,
    pub failed: u64,
    pub heartbeats: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryMetrics {
    pub dispatches: u64,
    pub aborts: u64,
    pub collected: u64,
}

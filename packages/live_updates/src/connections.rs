//! Connection Table: the transports this process is holding open.
//!
//! Never persisted. Losing it on a crash is fine because a reconnecting
//! client resynchronizes through the registry.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::nonce::Nonce;
use crate::render::ReplayTarget;

/// One held-open response.
#[derive(Debug)]
pub(crate) struct LiveConnection {
    /// Distinguishes successive connections of the same nonce
    pub id: Uuid,
    /// Feeds the streamed response body
    pub sender: mpsc::Sender<Bytes>,
    /// Cancelled to force the transport closed
    pub cancel: CancellationToken,
    pub replay: ReplayTarget,
}

pub(crate) type Table = HashMap<Nonce, LiveConnection>;

#[derive(Clone, Default)]
pub struct ConnectionTable {
    inner: Arc<Mutex<Table>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry writes that must agree with the table happen under this guard.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Table> {
        self.inner.lock().await
    }

    pub async fn contains(&self, nonce: &Nonce) -> bool {
        self.inner.lock().await.contains_key(nonce)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Everything needed to push to `nonce`, cloned out so the lock is not
    /// held while the page renders.
    pub(crate) async fn push_target(
        &self,
        nonce: &Nonce,
    ) -> Option<(ReplayTarget, mpsc::Sender<Bytes>)> {
        self.inner
            .lock()
            .await
            .get(nonce)
            .map(|c| (c.replay.clone(), c.sender.clone()))
    }
}

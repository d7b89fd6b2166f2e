//! Keep-alive units for an open channel, and close detection.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Shared;
use crate::nonce::Nonce;
use crate::protocol::heartbeat;
use crate::teardown;

/// Spawn the task that owns the lifetime of one connection. It ends when the
/// client goes away or `cancel` fires, and then runs Close.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    nonce: Nonce,
    id: Uuid,
    sender: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = shared.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sender.closed() => {
                    debug!(nonce = %nonce, "Live-updates client went away");
                    break;
                }
                _ = ticker.tick() => match sender.try_send(heartbeat()) {
                    Ok(()) => shared.metrics.heartbeat_sent(),
                    // data is already pending, which keeps the connection alive too
                    Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                },
            }
        }
        drop(sender);

        if let Err(e) = teardown::close(&shared, &nonce, id).await {
            warn!(nonce = %nonce, "Failed to remove closed live-updates client: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::LiveConnection;
    use crate::render::ReplayTarget;
    use crate::scope::ScopeId;
    use crate::test_helpers::*;

    async fn open_raw(
        live: &crate::LiveUpdates,
        nonce: &Nonce,
    ) -> (mpsc::Receiver<Bytes>, CancellationToken, JoinHandle<()>) {
        let shared = live.shared.clone();
        shared
            .store
            .upsert_connected(nonce, "/courses/1", Some(ScopeId(1)), 0)
            .await
            .unwrap();
        let (sender, receiver) = mpsc::channel(2);
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        shared.connections.lock().await.insert(
            nonce.clone(),
            LiveConnection {
                id,
                sender: sender.clone(),
                cancel: cancel.clone(),
                replay: ReplayTarget::capture(&parts("/courses/1")),
            },
        );
        let task = spawn(shared, nonce.clone(), id, sender, cancel.clone());
        (receiver, cancel, task)
    }

    fn fast() -> crate::LiveUpdatesConfig {
        crate::LiveUpdatesConfig {
            heartbeat_interval: Duration::from_millis(20),
            ..test_config()
        }
    }

    #[tokio::test]
    async fn sends_blank_lines() {
        let (live, _) = test_live_updates_with(fast()).await;
        let nonce = Nonce::generate();
        let (mut receiver, _cancel, _task) = open_raw(&live, &nonce).await;

        for _ in 0..2 {
            let unit = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&unit[..], b"\n");
        }
        assert!(live.metrics().snapshot().pushes.heartbeats >= 2);
    }

    #[tokio::test]
    async fn dropped_receiver_closes_connection() {
        let (live, _) = test_live_updates().await;
        let nonce = Nonce::generate();
        let (receiver, _cancel, task) = open_raw(&live, &nonce).await;

        drop(receiver);
        task.await.unwrap();

        assert!(!live.connections().contains(&nonce).await);
        assert!(live.store().get(&nonce).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_ends_task() {
        let (live, _) = test_live_updates().await;
        let nonce = Nonce::generate();
        let (_receiver, cancel, task) = open_raw(&live, &nonce).await;

        cancel.cancel();
        task.await.unwrap();
        assert!(!live.connections().contains(&nonce).await);
    }

    #[tokio::test]
    async fn full_channel_skips_heartbeat() {
        let (live, _) = test_live_updates_with(fast()).await;
        let nonce = Nonce::generate();
        let (mut receiver, cancel, task) = open_raw(&live, &nonce).await;

        // never read until the channel has had time to fill and overflow
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(live.connections().contains(&nonce).await);

        cancel.cancel();
        task.await.unwrap();
        let mut units = 0;
        while receiver.recv().await.is_some() {
            units += 1;
        }
        assert_eq!(units, 2);
    }
}

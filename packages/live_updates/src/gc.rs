//! Periodic removal of provisional registrations that never connected.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use crate::{Shared, now_secs};

pub(crate) fn spawn_sweeper(shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = shared.config.sweep_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = sweep(&shared, now_secs()).await {
                        warn!("Live-updates sweep failed: {}", e);
                    }
                }
            }
        }
        debug!("Live-updates sweeper stopped");
    })
}

pub(crate) async fn sweep(shared: &Shared, now: i64) -> Result<u64, sqlx::Error> {
    let removed = shared.store.delete_expired(now).await?;
    if removed > 0 {
        shared.metrics.collected(removed);
        debug!("Collected {} expired live-updates registrations", removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::Nonce;
    use crate::scope::ScopeId;
    use crate::test_helpers::*;

    #[tokio::test]
    async fn sweep_removes_lapsed_provisional_rows() {
        let (live, _) = test_live_updates().await;
        let lapsed = Nonce::generate();
        let pending = Nonce::generate();
        let connected = Nonce::generate();
        let store = live.store();
        store
            .insert_provisional(&lapsed, "/courses/1", Some(ScopeId(1)), 0, 100)
            .await
            .unwrap();
        store
            .insert_provisional(&pending, "/courses/1", Some(ScopeId(1)), 0, 200)
            .await
            .unwrap();
        store
            .upsert_connected(&connected, "/courses/1", Some(ScopeId(1)), 0)
            .await
            .unwrap();

        assert_eq!(live.sweep_expired(150).await.unwrap(), 1);
        assert!(store.get(&lapsed).await.unwrap().is_none());
        assert!(store.get(&pending).await.unwrap().is_some());
        assert!(store.get(&connected).await.unwrap().is_some());
        assert_eq!(live.metrics().snapshot().registry.collected, 1);
    }

    #[tokio::test]
    async fn background_sweeper_runs() {
        let config = crate::LiveUpdatesConfig {
            sweep_interval: Duration::from_millis(20),
            ..test_config()
        };
        let (live, _) = test_live_updates_with(config).await;
        let nonce = Nonce::generate();
        live.store()
            .insert_provisional(&nonce, "/", None, 0, 1)
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while live.store().get(&nonce).await.unwrap().is_some() {
            assert!(Instant::now() < deadline, "sweeper never ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

//! Dispatcher: turns "scope changed" into fresh renders on open channels.
//!
//! A single actor task processes commands in the order they were sent, so
//! dispatches and catch-up pushes never interleave.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::LiveUpdatesError;
use crate::nonce::Nonce;
use crate::protocol::encode_push;
use crate::scope::ScopeId;
use crate::{Shared, now_secs};

pub(crate) enum DispatchCommand {
    ScopeChanged {
        scope: ScopeId,
        done: Option<oneshot::Sender<Result<DispatchReport, LiveUpdatesError>>>,
    },
    /// A client reconnected after missing a dispatch.
    CatchUp { nonce: Nonce },
}

/// What one dispatch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Disconnected clients flagged for a catch-up push
    pub flagged: u64,
    pub pushed: usize,
    /// Pages that failed to render
    pub failed: usize,
    /// Pushes lost to a full or closing channel
    pub dropped: usize,
    /// Connected records with no live connection in this process
    pub orphaned: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Sent => self.pushed += 1,
            PushOutcome::Failed => self.failed += 1,
            PushOutcome::Dropped | PushOutcome::Closed => self.dropped += 1,
            PushOutcome::Orphaned => self.orphaned += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Sent,
    Failed,
    Dropped,
    Closed,
    Orphaned,
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<DispatchCommand>,
) {
    loop {
        let command = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            DispatchCommand::ScopeChanged { scope, done } => {
                let result = dispatch_scope(&shared, scope).await;
                match done {
                    Some(done) => {
                        let _ = done.send(result.map_err(LiveUpdatesError::from));
                    }
                    None => {
                        if let Err(e) = result {
                            error!(scope = %scope, "Dispatch failed: {}", e);
                        }
                    }
                }
            }
            DispatchCommand::CatchUp { nonce } => {
                let outcome = push(&shared, &nonce).await;
                debug!(nonce = %nonce, "Catch-up push: {:?}", outcome);
            }
        }
    }
    debug!("Dispatcher stopped");
}

pub(crate) async fn dispatch_scope(
    shared: &Shared,
    scope: ScopeId,
) -> Result<DispatchReport, sqlx::Error> {
    // Under the table lock, so an open runs wholly before (enumerated) or
    // wholly after (sees the flag). Released before rendering.
    let (flagged, nonces) = {
        let _table = shared.connections.lock().await;
        let flagged = shared.store.flag_catch_up(scope, now_secs()).await?;
        let nonces = shared.store.connected_in_scope(scope).await?;
        (flagged, nonces)
    };

    let mut report = DispatchReport {
        flagged,
        ..Default::default()
    };
    for nonce in &nonces {
        report.record(push(shared, nonce).await);
    }
    shared.metrics.dispatched();

    if report.failed > 0 || report.dropped > 0 {
        info!(
            scope = %scope,
            "Dispatched to {} clients ({} failed, {} dropped, {} flagged)",
            report.pushed, report.failed, report.dropped, report.flagged
        );
    } else {
        debug!(
            scope = %scope,
            "Dispatched to {} clients ({} flagged, {} orphaned)",
            report.pushed, report.flagged, report.orphaned
        );
    }
    Ok(report)
}

/// Render the page `nonce` is viewing and write it to its channel.
pub(crate) async fn push(shared: &Shared, nonce: &Nonce) -> PushOutcome {
    let Some((target, sender)) = shared.connections.push_target(nonce).await else {
        debug!(nonce = %nonce, "No live connection for connected record, skipping");
        return PushOutcome::Orphaned;
    };

    let html = match shared.renderer.render(target.to_request(nonce)).await {
        Ok(html) => html,
        Err(e) => {
            warn!(nonce = %nonce, url = %target.url(), "Replay failed: {}", e);
            shared.metrics.replay_failed();
            return PushOutcome::Failed;
        }
    };
    let unit = match encode_push(&String::from_utf8_lossy(&html)) {
        Ok(unit) => unit,
        Err(e) => {
            warn!(nonce = %nonce, "Failed to encode push: {}", e);
            shared.metrics.replay_failed();
            return PushOutcome::Failed;
        }
    };

    match sender.try_send(unit) {
        Ok(()) => {
            shared.metrics.push_sent();
            PushOutcome::Sent
        }
        Err(TrySendError::Full(_)) => {
            warn!(nonce = %nonce, "Client is not reading, push dropped");
            shared.metrics.push_dropped();
            PushOutcome::Dropped
        }
        Err(TrySendError::Closed(_)) => {
            debug!(nonce = %nonce, "Channel closing, push dropped");
            shared.metrics.push_dropped();
            PushOutcome::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::LiveConnection;
    use crate::protocol::decode_unit;
    use crate::render::ReplayTarget;
    use crate::test_helpers::*;
    use axum::body::Bytes;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    /// Connected record plus live entry, without a heartbeat task.
    async fn attach(
        live: &crate::LiveUpdates,
        url: &str,
        scope: i64,
        capacity: usize,
    ) -> (Nonce, mpsc::Receiver<Bytes>) {
        let nonce = Nonce::generate();
        let request = parts(url);
        live.store()
            .upsert_connected(&nonce, url, Some(ScopeId(scope)), 0)
            .await
            .unwrap();
        let (sender, receiver) = mpsc::channel(capacity);
        live.connections().lock().await.insert(
            nonce.clone(),
            LiveConnection {
                id: Uuid::new_v4(),
                sender,
                cancel: CancellationToken::new(),
                replay: ReplayTarget::capture(&request),
            },
        );
        (nonce, receiver)
    }

    fn next_page(receiver: &mut mpsc::Receiver<Bytes>) -> Option<String> {
        receiver
            .try_recv()
            .ok()
            .and_then(|unit| decode_unit(&unit).unwrap())
    }

    #[tokio::test]
    async fn pushes_to_connected_clients_of_scope() {
        let (live, _) = test_live_updates().await;
        let (_, mut a) = attach(&live, "/courses/1", 1, 4).await;
        let (_, mut b) = attach(&live, "/courses/1", 1, 4).await;
        let (_, mut other) = attach(&live, "/courses/2", 2, 4).await;

        let report = live.dispatch(ScopeId(1)).await.unwrap();
        assert_eq!(report.pushed, 2);

        assert_eq!(next_page(&mut a).as_deref(), Some("/courses/1 #1"));
        assert_eq!(next_page(&mut b).as_deref(), Some("/courses/1 #2"));
        assert!(next_page(&mut other).is_none());
    }

    #[tokio::test]
    async fn flags_disconnected_clients() {
        let (live, _) = test_live_updates().await;
        let waiting = Nonce::generate();
        live.store()
            .insert_provisional(&waiting, "/courses/1", Some(ScopeId(1)), 0, i64::MAX)
            .await
            .unwrap();

        let report = live.dispatch(ScopeId(1)).await.unwrap();
        assert_eq!(report.flagged, 1);
        assert_eq!(report.pushed, 0);
        let record = live.store().get(&waiting).await.unwrap().unwrap();
        assert!(record.should_catch_up_at.is_some());
    }

    #[tokio::test]
    async fn render_failure_does_not_stop_the_loop() {
        let (live, renderer) = test_live_updates().await;
        renderer.fail("/courses/1/broken");
        let (_, mut broken) = attach(&live, "/courses/1/broken", 1, 4).await;
        let (_, mut fine) = attach(&live, "/courses/1", 1, 4).await;

        let report = live.dispatch(ScopeId(1)).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.pushed, 1);
        assert!(next_page(&mut broken).is_none());
        assert_eq!(next_page(&mut fine).as_deref(), Some("/courses/1 #1"));
        assert_eq!(live.metrics().snapshot().pushes.failed, 1);
    }

    #[tokio::test]
    async fn full_channel_drops_push() {
        let (live, _) = test_live_updates().await;
        let (_, mut slow) = attach(&live, "/courses/1", 1, 1).await;

        let first = live.dispatch(ScopeId(1)).await.unwrap();
        let second = live.dispatch(ScopeId(1)).await.unwrap();
        assert_eq!(first.pushed, 1);
        assert_eq!(second.dropped, 1);

        assert_eq!(next_page(&mut slow).as_deref(), Some("/courses/1 #1"));
        assert!(next_page(&mut slow).is_none());
        assert_eq!(live.metrics().snapshot().pushes.dropped, 1);
    }

    #[tokio::test]
    async fn orphaned_records_are_skipped() {
        let (live, _) = test_live_updates().await;
        live.store()
            .upsert_connected(&Nonce::generate(), "/courses/1", Some(ScopeId(1)), 0)
            .await
            .unwrap();
        let (_, mut live_client) = attach(&live, "/courses/1", 1, 4).await;

        let report = live.dispatch(ScopeId(1)).await.unwrap();
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.pushed, 1);
        assert!(next_page(&mut live_client).is_some());
    }

    #[tokio::test]
    async fn commands_are_processed_in_order() {
        let (live, _) = test_live_updates().await;
        let (_, mut client) = attach(&live, "/courses/1", 1, 8).await;

        live.notify_scope_changed(ScopeId(1));
        live.notify_scope_changed(ScopeId(1));
        live.dispatch(ScopeId(1)).await.unwrap();

        let pages: Vec<String> = std::iter::from_fn(|| next_page(&mut client)).collect();
        assert_eq!(pages, ["/courses/1 #1", "/courses/1 #2", "/courses/1 #3"]);
    }

    #[tokio::test]
    async fn push_to_closed_channel_is_dropped_in_report_and_metrics() {
        let (live, _) = test_live_updates().await;
        let (_, receiver) = attach(&live, "/courses/1", 1, 4).await;
        drop(receiver);

        let report = live.dispatch(ScopeId(1)).await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.pushed, 0);
        assert_eq!(live.metrics().snapshot().pushes.dropped, 1);
    }

    /// Registry on a WAL file with several pool connections, so store calls
    /// from different tasks really interleave.
    async fn file_backed_live_updates(dir: &std::path::Path) -> crate::LiveUpdates {
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

        let options = SqliteConnectOptions::new()
            .filename(dir.join("registry.db"))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .unwrap();
        crate::LiveUpdates::new(
            pool,
            test_config(),
            Arc::new(CountingRenderer::default()),
            Arc::new(PathScope),
        )
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn open_during_dispatch_is_delivered_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let live = file_backed_live_updates(dir.path()).await;

        for _ in 0..200 {
            let nonce = Nonce::generate();
            let now = now_secs();
            live.store()
                .insert_provisional(&nonce, "/courses/1", Some(ScopeId(1)), now, now + 60)
                .await
                .unwrap();

            let barrier = Arc::new(tokio::sync::Barrier::new(2));
            let opener = {
                let shared = live.shared.clone();
                let barrier = barrier.clone();
                let nonce = nonce.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    crate::handshake::connect(
                        &shared,
                        nonce,
                        Some(ScopeId(1)),
                        ReplayTarget::capture(&parts("/courses/1")),
                    )
                    .await
                    .unwrap()
                })
            };
            let dispatcher = {
                let shared = live.shared.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    dispatch_scope(&shared, ScopeId(1)).await.unwrap()
                })
            };

            let mut opened = opener.await.unwrap();
            let report = dispatcher.await.unwrap();
            let pushed = opened.receiver.try_recv().is_ok();

            // flagged while provisional means a catch-up, never a push too
            assert_eq!(report.flagged == 1, opened.catch_up);
            assert_ne!(pushed, opened.catch_up, "pushed={} catch_up={}", pushed, opened.catch_up);

            live.abort(&nonce).await.unwrap();
        }
    }

    #[test]
    fn closed_channel_counts_as_dropped() {
        let mut report = DispatchReport::default();
        report.record(PushOutcome::Closed);
        report.record(PushOutcome::Sent);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.pushed, 1);
    }
}

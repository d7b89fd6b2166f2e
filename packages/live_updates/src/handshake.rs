//! Handshake State Machine, applied to page routes as an axum middleware.
//!
//! UNKNOWN -> PROVISIONAL on an ordinary GET, PROVISIONAL -> CONNECTED when
//! the browser repeats the request with its nonce, CONNECTED -> UNKNOWN on
//! close or abort.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connections::LiveConnection;
use crate::error::{HandshakeRejection, LiveUpdatesError};
use crate::nonce::Nonce;
use crate::protocol::{LIVE_UPDATES, LIVE_UPDATES_ABORT, STREAM_CONTENT_TYPE};
use crate::render::{Replay, ReplayTarget, request_url};
use crate::scope::ScopeId;
use crate::{LiveUpdates, Shared, heartbeat, now_secs};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// What a request means to the protocol.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// No nonce yet: serve the page and issue one.
    Register,
    /// Open the push channel for this nonce.
    Open(Nonce),
    /// The dispatcher rendering a page for an open channel.
    Replay,
    Reject(HandshakeRejection),
}

pub(crate) fn classify(request: &Request) -> Step {
    // checked before the header so a replay racing a close never opens
    if request.extensions().get::<Replay>().is_some() {
        return Step::Replay;
    }
    match request.headers().get(LIVE_UPDATES) {
        None => Step::Register,
        Some(value) => match Nonce::try_from(value) {
            Ok(nonce) => Step::Open(nonce),
            Err(_) => Step::Reject(HandshakeRejection::MalformedNonce),
        },
    }
}

/// Honours `Live-Updates-Abort` on any request, then runs it normally.
///
/// Apply with `.layer(axum::middleware::from_fn_with_state(live, abort_middleware))`
/// on the outermost router, so beacons reach it whatever their path.
pub async fn abort_middleware(
    State(live): State<LiveUpdates>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(value) = request.headers().get(LIVE_UPDATES_ABORT) {
        match Nonce::try_from(value) {
            Ok(nonce) => {
                if let Err(e) = live.abort(&nonce).await {
                    warn!(nonce = %nonce, "Failed to abort live-updates client: {}", e);
                }
            }
            Err(e) => debug!("Ignoring malformed {} header: {}", LIVE_UPDATES_ABORT, e),
        }
    }
    next.run(request).await
}

/// Apply with `axum::middleware::from_fn_with_state(live, middleware)` as a
/// `route_layer` on the routes that render pages.
pub async fn middleware(State(live): State<LiveUpdates>, request: Request, next: Next) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    match classify(&request) {
        Step::Replay => next.run(request).await,
        Step::Register => register(&live, request, next).await,
        Step::Open(nonce) => open(&live, request, nonce).await,
        Step::Reject(rejection) => reject(&live, rejection),
    }
}

async fn register(live: &LiveUpdates, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let scope = live.shared.resolver.resolve(&parts).await;
    let url = request_url(&parts.uri).to_string();
    let mut request = Request::from_parts(parts, body);

    let nonce = Nonce::generate();
    let now = now_secs();
    let expires_at = now + live.shared.config.provisional_ttl_secs();
    if let Err(e) = live
        .shared
        .store
        .insert_provisional(&nonce, &url, scope, now, expires_at)
        .await
    {
        error!(url = %url, "Failed to register live-updates client: {}", e);
        return next.run(request).await;
    }
    live.shared.metrics.client_registered();

    request.extensions_mut().insert(nonce.clone());
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(LIVE_UPDATES, nonce.to_header_value());
    response
}

async fn open(live: &LiveUpdates, request: Request, nonce: Nonce) -> Response {
    let (parts, _body) = request.into_parts();
    let scope = live.shared.resolver.resolve(&parts).await;
    let replay = ReplayTarget::capture(&parts);

    match connect(&live.shared, nonce.clone(), scope, replay).await {
        Ok(opened) => {
            if opened.catch_up {
                live.catch_up(nonce);
            }
            stream_response(opened.receiver)
        }
        Err(LiveUpdatesError::Rejected(rejection)) => reject(live, rejection),
        Err(e) => {
            error!(nonce = %nonce, "Failed to open live-updates channel: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn reject(live: &LiveUpdates, rejection: HandshakeRejection) -> Response {
    live.shared.metrics.handshake_rejected();
    debug!(reason = rejection.error_code(), "Rejected live-updates handshake");
    rejection.into_response()
}

pub(crate) struct Opened {
    pub receiver: mpsc::Receiver<Bytes>,
    /// A dispatch happened while the client was away
    pub catch_up: bool,
}

/// Move `nonce` to CONNECTED and register its live entry.
///
/// Runs entirely under the table lock, so the record and the entry change
/// together and a concurrent open of the same nonce sees the entry. A
/// dispatch flags and enumerates under the same lock, so it either lists
/// this client or leaves the flag for it to read.
pub(crate) async fn connect(
    shared: &Arc<Shared>,
    nonce: Nonce,
    scope: Option<ScopeId>,
    replay: ReplayTarget,
) -> Result<Opened, LiveUpdatesError> {
    let url = replay.url().to_string();
    let mut table = shared.connections.lock().await;
    if table.contains_key(&nonce) {
        return Err(HandshakeRejection::Duplicate.into());
    }

    let catch_up = match shared.store.get(&nonce).await? {
        Some(record) if !record.is_connected() => {
            if record.url != url {
                return Err(HandshakeRejection::UrlMismatch.into());
            }
            shared.store.mark_connected(&nonce).await?;
            record.should_catch_up_at.is_some()
        }
        Some(_) => {
            warn!(nonce = %nonce, "Replacing orphaned live-updates record");
            shared
                .store
                .upsert_connected(&nonce, &url, scope, now_secs())
                .await?;
            false
        }
        None => {
            shared
                .store
                .upsert_connected(&nonce, &url, scope, now_secs())
                .await?;
            false
        }
    };

    let (sender, receiver) = mpsc::channel(shared.config.channel_capacity.max(1));
    let id = Uuid::new_v4();
    let cancel: CancellationToken = shared.shutdown.child_token();
    table.insert(
        nonce.clone(),
        LiveConnection {
            id,
            sender: sender.clone(),
            cancel: cancel.clone(),
            replay,
        },
    );
    shared.metrics.connection_opened();
    drop(table);

    info!(nonce = %nonce, url = %url, "Live-updates channel opened");
    heartbeat::spawn(shared.clone(), nonce, id, sender, cancel);
    Ok(Opened { receiver, catch_up })
}

/// The held-open response. Ends once every sender of the channel is gone.
fn stream_response(mut receiver: mpsc::Receiver<Bytes>) -> Response {
    let stream =
        futures::stream::poll_fn(move |cx| receiver.poll_recv(cx)).map(Ok::<_, Infallible>);
    (
        [
            (CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (CACHE_CONTROL, "no-store"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

//! The page-rendering collaborator and the requests replayed through it.

use std::sync::{Arc, OnceLock};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Uri};
use futures::future::BoxFuture;
use tower::ServiceExt;

use crate::error::RenderError;
use crate::nonce::Nonce;
use crate::protocol::{LIVE_UPDATES, LIVE_UPDATES_ABORT};

/// Produces the complete current representation of a page.
///
/// Called by the dispatcher for every push. Implementations must be
/// idempotent and free of side effects: a push must not count as a visit.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, request: Request) -> BoxFuture<'static, Result<Bytes, RenderError>>;
}

/// Marks a request as the dispatcher's internal replay. Only ever inserted
/// server-side, so an external client cannot pose as one.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Replay;

/// What is needed to rebuild the request a connected client is viewing.
#[derive(Debug, Clone)]
pub struct ReplayTarget {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl ReplayTarget {
    pub(crate) fn capture(parts: &Parts) -> Self {
        let mut headers = parts.headers.clone();
        headers.remove(LIVE_UPDATES);
        headers.remove(LIVE_UPDATES_ABORT);
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers,
        }
    }

    pub fn url(&self) -> &str {
        request_url(&self.uri)
    }

    /// A fresh request for `nonce`, carrying the original headers so that
    /// authentication is evaluated again on every push.
    pub(crate) fn to_request(&self, nonce: &Nonce) -> Request {
        let mut request = Request::new(Body::empty());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        request
            .headers_mut()
            .insert(LIVE_UPDATES, nonce.to_header_value());
        request.extensions_mut().insert(Replay);
        request.extensions_mut().insert(nonce.clone());
        request
    }
}

/// Path and query of a request, the part a client must keep on reconnection.
pub(crate) fn request_url(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

/// Renders by replaying the request through the application's own router.
///
/// The router is installed after it has been built, since it contains the
/// live-updates middleware that in turn needs this renderer.
#[derive(Clone)]
pub struct RouterRenderer {
    router: Arc<OnceLock<Router>>,
    max_bytes: usize,
}

impl RouterRenderer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            router: Arc::new(OnceLock::new()),
            max_bytes,
        }
    }

    /// Returns `false` if a router was already installed.
    pub fn install(&self, router: Router) -> bool {
        self.router.set(router).is_ok()
    }
}

impl Renderer for RouterRenderer {
    fn render(&self, request: Request) -> BoxFuture<'static, Result<Bytes, RenderError>> {
        let router = self.router.get().cloned();
        let max_bytes = self.max_bytes;
        Box::pin(async move {
            let router = router.ok_or(RenderError::NotInstalled)?;
            let response = router.oneshot(request).await.unwrap_or_else(|e| match e {});
            if !response.status().is_success() {
                return Err(RenderError::Status(response.status()));
            }
            axum::body::to_bytes(response.into_body(), max_bytes)
                .await
                .map_err(|e| RenderError::Body(e.to_string()))
        })
    }
}

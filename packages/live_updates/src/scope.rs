use std::fmt;

use axum::http::request::Parts;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Identifier of a broadcast domain, e.g. the course a page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub i64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Looks up the scope a request belongs to.
///
/// Pages outside every scope resolve to `None`; they still complete the
/// handshake but are never pushed to.
pub trait ScopeResolver: Send + Sync + 'static {
    fn resolve<'a>(&'a self, parts: &'a Parts) -> BoxFuture<'a, Option<ScopeId>>;
}

//! Error types for the live-updates core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum LiveUpdatesError {
    #[error("registry error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("handshake rejected: {0}")]
    Rejected(#[from] HandshakeRejection),

    #[error("dispatcher is not running")]
    DispatcherGone,
}

/// Why a request trying to open the push channel was turned away.
///
/// Every rejection is answered with `422` and an empty body; the client is
/// expected to discard its nonce and start over with an ordinary request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeRejection {
    #[error("a live connection is already open for this nonce")]
    Duplicate,

    #[error("reconnection url does not match the registered url")]
    UrlMismatch,

    #[error("malformed live-updates nonce")]
    MalformedNonce,
}

impl HandshakeRejection {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Duplicate => "duplicate",
            Self::UrlMismatch => "url_mismatch",
            Self::MalformedNonce => "malformed_nonce",
        }
    }
}

impl IntoResponse for HandshakeRejection {
    fn into_response(self) -> Response {
        StatusCode::UNPROCESSABLE_ENTITY.into_response()
    }
}

/// Failure of the page renderer while producing a push.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no router installed in the renderer")]
    NotInstalled,

    #[error("render answered with status {0}")]
    Status(StatusCode),

    #[error("failed to read rendered body: {0}")]
    Body(String),
}

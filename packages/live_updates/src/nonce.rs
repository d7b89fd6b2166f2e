//! Nonces correlate one browser context across its separate requests.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use axum::extract::FromRequestParts;
use axum::http::HeaderValue;
use axum::http::request::Parts;
use data_encoding::BASE64URL_NOPAD;
use rand::Rng;

/// Random bytes per nonce.
pub const NONCE_BYTES: usize = 20;

/// An opaque, unguessable token issued by the server.
///
/// Always the URL-safe, unpadded base64 encoding of exactly [`NONCE_BYTES`]
/// bytes, which also makes it a valid header value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nonce(String);

impl Nonce {
    pub fn generate() -> Self {
        let bytes: [u8; NONCE_BYTES] = rand::rng().random();
        Self(BASE64URL_NOPAD.encode(&bytes))
    }

    /// Wrap a value read back from the registry, which only ever stores
    /// nonces that were validated on the way in.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_header_value(&self) -> HeaderValue {
        // base64url never produces bytes that are invalid in a header
        HeaderValue::from_str(&self.0).unwrap_or_else(|_| HeaderValue::from_static(""))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    #[error("nonce is not valid base64url")]
    Encoding,

    #[error("nonce must decode to {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

impl FromStr for Nonce {
    type Err = NonceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64URL_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| NonceError::Encoding)?;
        if bytes.len() != NONCE_BYTES {
            return Err(NonceError::Length {
                expected: NONCE_BYTES,
                actual: bytes.len(),
            });
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<&HeaderValue> for Nonce {
    type Error = NonceError;

    fn try_from(value: &HeaderValue) -> Result<Self, Self::Error> {
        value.to_str().map_err(|_| NonceError::Encoding)?.parse()
    }
}

/// The nonce issued for the current request, if it takes part in live updates.
///
/// Page handlers embed it so the browser can open its push channel.
#[derive(Debug, Clone)]
pub struct LiveNonce(pub Option<Nonce>);

impl<S> FromRequestParts<S> for LiveNonce
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(LiveNonce(parts.extensions.get::<Nonce>().cloned()))
    }
}

//! Wire format of the live-updates channel.
//!
//! The held-open response is a sequence of newline-terminated units. An empty
//! line is a heartbeat. Any other line is a JSON string holding a complete
//! HTML document, so a unit never contains a raw newline of its own.

use axum::body::Bytes;
use axum::http::HeaderName;

/// Request header carrying the client's nonce; response header carrying a
/// freshly issued one.
pub const LIVE_UPDATES: HeaderName = HeaderName::from_static("live-updates");

/// Request header asking the server to drop the registration of a nonce.
pub const LIVE_UPDATES_ABORT: HeaderName = HeaderName::from_static("live-updates-abort");

/// Content type of the held-open response.
pub const STREAM_CONTENT_TYPE: &str = "application/x-ndjson; charset=utf-8";

/// A keep-alive unit. Carries no payload.
pub fn heartbeat() -> Bytes {
    Bytes::from_static(b"\n")
}

/// Encode one rendered page as a single push unit.
pub fn encode_push(html: &str) -> Result<Bytes, serde_json::Error> {
    let mut line = serde_json::to_vec(html)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// Decode a unit read off the channel. `None` for heartbeats.
pub fn decode_unit(unit: &[u8]) -> Result<Option<String>, serde_json::Error> {
    let line = unit.strip_suffix(b"\n").unwrap_or(unit);
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(line).map(Some)
}

//! Token Codec
//!
//! Decodes the JSON payload segment of a bearer token without verifying
//! its signature — we only need `exp` (and, for the identity token, the
//! subject) to decide whether a refresh is due. Decoding never fails
//! loudly: any malformed input degrades to "no payload", which in turn
//! is treated as "already expired" by `is_expired`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

/// Decode the middle (payload) segment of a dot-separated token.
///
/// Returns `None` if the token does not have exactly three segments, or
/// if the segment fails to base64url-decode, UTF-8 decode, or JSON-parse.
pub fn decode(token: &str) -> Option<Value> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload_b64 = parts[1];
    let decoded = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    serde_json::from_str(&text).ok()
}

/// True if `token` is expired or will expire within `buffer_secs`.
///
/// A missing or unparsable token is always considered expired.
pub fn is_expired(token: &str, buffer_secs: i64) -> bool {
    let Some(payload) = decode(token) else {
        return true;
    };
    let Some(exp) = payload.get("exp").and_then(Value::as_i64) else {
        return true;
    };
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    (exp - now) <= buffer_secs
}

//! Refresh-token refresh
//!
//! POSTs a `grant_type=refresh_token` body to the proxy token endpoint and
//! classifies the response. A 200 with `access_token` is success; anything
//! else is classified into one of `RefreshFailed` / `InvalidToken` /
//! `QuotaExhausted` by status code and, failing that, by matching the
//! response body against the patterns the upstream is known to use.

use serde::{Deserialize, Serialize};

use crate::constants::{
    CLIENT_VERSION, OS_CATEGORY, OS_NAME, OS_VERSION, PROXY_TOKEN_ENDPOINT,
};
use crate::error::{Error, Result};

/// Response from the proxy token endpoint, for both anonymous exchange
/// and refresh-token refresh.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute).
    #[serde(default)]
    pub expires_in: Option<u64>,
}

fn client_headers() -> Vec<(&'static str, String)> {
    vec![
        ("x-warp-client-version", CLIENT_VERSION.to_string()),
        ("x-warp-os-category", OS_CATEGORY.to_string()),
        ("x-warp-os-name", OS_NAME.to_string()),
        ("x-warp-os-version", OS_VERSION.to_string()),
        ("accept", "*/*".to_string()),
        ("accept-encoding", "gzip, br".to_string()),
    ]
}

/// Refresh the access token using `refresh`. Times out after 30 seconds,
/// matching the upstream client's own timeout.
pub async fn refresh_token(client: &reqwest::Client, refresh: &str) -> Result<TokenResponse> {
    let mut request = client
        .post(PROXY_TOKEN_ENDPOINT)
        .timeout(std::time::Duration::from_secs(30))
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh)]);

    for (name, value) in client_headers() {
        request = request.header(name, value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(classify_refresh_failure(status.as_u16(), &body));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::UpstreamShape(format!("invalid refresh response: {e}")))
}

/// Map a non-2xx refresh response to a typed error, matching the
/// upstream's observed status-code and body-substring conventions.
fn classify_refresh_failure(status: u16, body: &str) -> Error {
    let lower = body.to_lowercase();

    if status == 401 {
        return Error::InvalidToken(format!("refresh token rejected (401): {body}"));
    }
    if status == 429 {
        if lower.contains("no remaining quota") || lower.contains("no ai requests remaining") {
            return Error::QuotaExhausted(format!("quota exhausted (429): {body}"));
        }
    }
    if lower.contains("invalid_grant")
        || lower.contains("invalid_token")
        || lower.contains("refresh token is invalid")
    {
        return Error::InvalidToken(format!("refresh token rejected ({status}): {body}"));
    }

    Error::RefreshFailed(format!("token refresh returned {status}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_deserializes_without_id_token() {
        let json = r#"{"access_token":"at_abc","expires_in":3600}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.id_token, None);
        assert_eq!(token.expires_in, Some(3600));
    }

    #[test]
    fn token_response_deserializes_with_id_token() {
        let json = r#"{"access_token":"at_abc","id_token":"id_def"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.id_token, Some("id_def".to_string()));
        assert_eq!(token.expires_in, None);
    }

    #[test]
    fn classify_401_is_invalid_token() {
        let err = classify_refresh_failure(401, "unauthorized");
        assert!(matches!(err, Error::InvalidToken(_)));
    }

    #[test]
    fn classify_429_quota_substrings_is_quota_exhausted() {
        let err = classify_refresh_failure(429, "Error: no remaining quota for this account");
        assert!(matches!(err, Error::QuotaExhausted(_)));

        let err = classify_refresh_failure(429, "No AI requests remaining this period");
        assert!(matches!(err, Error::QuotaExhausted(_)));
    }

    #[test]
    fn classify_429_without_quota_substring_is_refresh_failed() {
        let err = classify_refresh_failure(429, "rate limited, try again later");
        assert!(matches!(err, Error::RefreshFailed(_)));
    }

    #[test]
    fn classify_invalid_grant_body_is_invalid_token() {
        let err = classify_refresh_failure(400, "{\"error\":\"invalid_grant\"}");
        assert!(matches!(err, Error::InvalidToken(_)));
    }

    #[test]
    fn classify_refresh_token_is_invalid_phrase() {
        let err = classify_refresh_failure(400, "Refresh token is invalid for this client");
        assert!(matches!(err, Error::InvalidToken(_)));
    }

    #[test]
    fn classify_unknown_failure_is_refresh_failed() {
        let err = classify_refresh_failure(500, "internal server error");
        assert!(matches!(err, Error::RefreshFailed(_)));
    }
}

//! Anonymous Acquirer
//!
//! Mints a fresh refresh/access token pair with no existing credential,
//! via a three-step handshake: create an anonymous identity, exchange it
//! for a Google Identity Toolkit refresh token, then exchange that for a
//! Warp access token through the ordinary refresh-token path.

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::constants::{
    CLIENT_VERSION, DEFAULT_IDENTITY_API_KEY_PLACEHOLDER, GRAPHQL_ENDPOINT,
    IDENTITY_SIGNIN_ENDPOINT, OS_CATEGORY, OS_NAME, OS_VERSION, PROXY_TOKEN_ENDPOINT,
};
use crate::error::{Error, Result};
use crate::token::{self, TokenResponse};

#[derive(Debug, Deserialize)]
struct CreateAnonymousUserResponse {
    data: Option<CreateAnonymousUserData>,
}

#[derive(Debug, Deserialize)]
struct CreateAnonymousUserData {
    #[serde(rename = "createAnonymousUser")]
    create_anonymous_user: Option<CreateAnonymousUserPayload>,
}

#[derive(Debug, Deserialize)]
struct CreateAnonymousUserPayload {
    #[serde(rename = "idToken")]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
}

fn identity_api_key() -> String {
    let parsed = reqwest::Url::parse(PROXY_TOKEN_ENDPOINT).ok().and_then(|url| {
        url.query_pairs()
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned())
    });

    match parsed {
        Some(key) => key,
        None => {
            warn!(
                "PROXY_TOKEN_ENDPOINT has no `key` query parameter; falling back to the \
                 unconfigured placeholder identity API key, which will fail sign-in"
            );
            DEFAULT_IDENTITY_API_KEY_PLACEHOLDER.to_string()
        }
    }
}

/// Step 1: create an anonymous identity, returning its id token.
async fn create_anonymous_user(client: &reqwest::Client) -> Result<String> {
    let body = json!({
        "operationName": "CreateAnonymousUser",
        "variables": {
            "input": {
                "anonymousUserType": "NATIVE_CLIENT_ANONYMOUS_USER_FEATURE_GATED",
                "expirationType": "NO_EXPIRATION",
                "referralCode": null,
            },
            "requestContext": {
                "clientContext": {
                    "version": CLIENT_VERSION,
                },
                "osContext": {
                    "category": OS_CATEGORY,
                    "name": OS_NAME,
                    "version": OS_VERSION,
                },
            },
        },
    });

    let response = client
        .post(GRAPHQL_ENDPOINT)
        .timeout(std::time::Duration::from_secs(30))
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(format!("create anonymous user request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(Error::RefreshFailed(format!(
            "create anonymous user returned {status}: {text}"
        )));
    }

    let parsed: CreateAnonymousUserResponse = response
        .json()
        .await
        .map_err(|e| Error::UpstreamShape(format!("invalid createAnonymousUser response: {e}")))?;

    parsed
        .data
        .and_then(|d| d.create_anonymous_user)
        .and_then(|p| p.id_token)
        .ok_or_else(|| {
            Error::UpstreamShape("createAnonymousUser response missing idToken".into())
        })
}

/// Step 2: exchange the anonymous id token for a long-lived refresh token.
async fn sign_in_with_id_token(client: &reqwest::Client, id_token: &str) -> Result<String> {
    let api_key = identity_api_key();
    let url = format!("{IDENTITY_SIGNIN_ENDPOINT}?key={api_key}");

    let response = client
        .post(&url)
        .timeout(std::time::Duration::from_secs(30))
        .form(&[("returnSecureToken", "true"), ("token", id_token)])
        .send()
        .await
        .map_err(|e| Error::Http(format!("identity sign-in request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(Error::RefreshFailed(format!(
            "identity sign-in returned {status}: {text}"
        )));
    }

    let parsed: SignInResponse = response
        .json()
        .await
        .map_err(|e| Error::UpstreamShape(format!("invalid sign-in response: {e}")))?;

    parsed
        .refresh_token
        .ok_or_else(|| Error::UpstreamShape("sign-in response missing refreshToken".into()))
}

/// Run the full three-step handshake and return the resulting token set.
///
/// Step 3 reuses [`token::refresh_token`] against the freshly minted
/// refresh token, matching the ordinary refresh path exactly.
pub async fn acquire(client: &reqwest::Client) -> Result<(String, TokenResponse)> {
    let id_token = create_anonymous_user(client).await?;
    let refresh_token_value = sign_in_with_id_token(client, &id_token).await?;
    let token_response = token::refresh_token(client, &refresh_token_value).await?;
    Ok((refresh_token_value, token_response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_api_key_parsed_from_proxy_endpoint() {
        let key = identity_api_key();
        assert!(!key.is_empty());
    }

    #[test]
    fn create_anonymous_user_response_missing_data_parses() {
        let json = r#"{"data": null}"#;
        let parsed: CreateAnonymousUserResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.data.is_none());
    }

    #[test]
    fn create_anonymous_user_response_extracts_id_token() {
        let json = r#"{"data":{"createAnonymousUser":{"idToken":"id_123"}}}"#;
        let parsed: CreateAnonymousUserResponse = serde_json::from_str(json).unwrap();
        let id_token = parsed
            .data
            .and_then(|d| d.create_anonymous_user)
            .and_then(|p| p.id_token);
        assert_eq!(id_token, Some("id_123".to_string()));
    }

    #[test]
    fn sign_in_response_extracts_refresh_token() {
        let json = r#"{"refreshToken":"rt_abc","idToken":"id_abc"}"#;
        let parsed: SignInResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.refresh_token, Some("rt_abc".to_string()));
    }

    #[test]
    fn sign_in_response_missing_refresh_token_parses_to_none() {
        let json = r#"{"idToken":"id_abc"}"#;
        let parsed: SignInResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.refresh_token, None);
    }
}

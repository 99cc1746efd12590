//! Quota Oracle
//!
//! Queries the `GetRequestLimitInfo` GraphQL endpoint with the current
//! identity token and decides whether the Refresh Coordinator should
//! force a refresh before the access token's own expiry would otherwise
//! require it.

use serde::Deserialize;
use serde_json::json;

use warp_auth::GRAPHQL_ENDPOINT;

/// Remaining-request accounting for the current identity.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaInfo {
    pub request_limit: u64,
    pub requests_used: u64,
    pub next_refresh_time: Option<String>,
}

impl QuotaInfo {
    pub fn remaining(&self) -> i64 {
        self.request_limit as i64 - self.requests_used as i64
    }
}

#[derive(Debug, Deserialize)]
struct QuotaResponse {
    data: Option<QuotaData>,
}

#[derive(Debug, Deserialize)]
struct QuotaData {
    user: Option<QuotaUserWrapper>,
}

#[derive(Debug, Deserialize)]
struct QuotaUserWrapper {
    user: Option<QuotaUser>,
}

#[derive(Debug, Deserialize)]
struct QuotaUser {
    #[serde(rename = "requestLimitInfo")]
    request_limit_info: Option<RequestLimitInfo>,
}

#[derive(Debug, Deserialize)]
struct RequestLimitInfo {
    #[serde(rename = "requestLimit")]
    request_limit: u64,
    #[serde(rename = "requestsUsedSinceLastRefresh")]
    requests_used_since_last_refresh: u64,
    #[serde(rename = "nextRefreshTime")]
    next_refresh_time: Option<String>,
}

/// Fetch the current quota, given a non-expired identity token. Returns
/// `None` on any transport failure or unexpected response shape — a
/// missing quota reading is treated by the caller as "do not force a
/// refresh", never as an error that should itself trigger one.
pub async fn get_quota(client: &reqwest::Client, identity_token: &str) -> Option<QuotaInfo> {
    let body = json!({
        "operationName": "GetRequestLimitInfo",
        "variables": {},
        "query": "query GetRequestLimitInfo { user { user { requestLimitInfo { requestLimit requestsUsedSinceLastRefresh nextRefreshTime } } } }",
    });

    let response = client
        .post(GRAPHQL_ENDPOINT)
        .timeout(std::time::Duration::from_secs(30))
        .bearer_auth(identity_token)
        .json(&body)
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let parsed: QuotaResponse = response.json().await.ok()?;
    let info = parsed.data?.user?.user?.request_limit_info?;

    Some(QuotaInfo {
        request_limit: info.request_limit,
        requests_used: info.requests_used_since_last_refresh,
        next_refresh_time: info.next_refresh_time,
    })
}

/// `threshold = 0` disables the check entirely. Otherwise true when the
/// remaining request budget is at or below `threshold`.
pub fn should_refresh(quota: &QuotaInfo, threshold: u64) -> bool {
    if threshold == 0 {
        return false;
    }
    quota.remaining() <= threshold as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(limit: u64, used: u64) -> QuotaInfo {
        QuotaInfo {
            request_limit: limit,
            requests_used: used,
            next_refresh_time: None,
        }
    }

    #[test]
    fn threshold_zero_disables_check() {
        assert!(!should_refresh(&quota(10, 10), 0));
    }

    #[test]
    fn remaining_at_or_below_threshold_triggers_refresh() {
        assert!(should_refresh(&quota(10, 8), 2));
        assert!(should_refresh(&quota(10, 10), 2));
    }

    #[test]
    fn remaining_above_threshold_does_not_trigger_refresh() {
        assert!(!should_refresh(&quota(10, 5), 2));
    }

    #[test]
    fn remaining_can_go_negative_and_still_triggers() {
        assert!(should_refresh(&quota(5, 10), 1));
    }

    #[test]
    fn quota_response_parses_nested_shape() {
        let json = r#"{"data":{"user":{"user":{"requestLimitInfo":{"requestLimit":150,"requestsUsedSinceLastRefresh":140,"nextRefreshTime":"2026-07-28T00:00:00Z"}}}}}"#;
        let parsed: QuotaResponse = serde_json::from_str(json).unwrap();
        let info = parsed
            .data
            .unwrap()
            .user
            .unwrap()
            .user
            .unwrap()
            .request_limit_info
            .unwrap();
        assert_eq!(info.request_limit, 150);
        assert_eq!(info.requests_used_since_last_refresh, 140);
    }

    #[test]
    fn quota_response_missing_shape_parses_to_none() {
        let json = r#"{"data":{"user":null}}"#;
        let parsed: QuotaResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.data.unwrap().user.is_none());
    }
}

//! Service-level error types
//!
//! Wraps the typed errors from `warp_auth`/`warp_pool` and maps them to
//! HTTP status codes for the `/v1/chat/completions` handler. Only the
//! outermost strategy failure ever reaches here — intermediate retries
//! already happened inside the Refresh Coordinator.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind listener: {0}")]
    ListenerBind(String),

    #[error(transparent)]
    Auth(#[from] warp_auth::Error),

    #[error(transparent)]
    Pool(#[from] warp_pool::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) | Error::ListenerBind(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Auth(warp_auth::Error::InvalidToken(_))
            | Error::Pool(warp_pool::Error::Auth(warp_auth::Error::InvalidToken(_))) => {
                StatusCode::UNAUTHORIZED
            }
            Error::Auth(warp_auth::Error::QuotaExhausted(_))
            | Error::Pool(warp_pool::Error::Auth(warp_auth::Error::QuotaExhausted(_)))
            | Error::Pool(warp_pool::Error::PoolExhausted(_)) => StatusCode::TOO_MANY_REQUESTS,
            Error::Auth(_) | Error::Pool(_) | Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": status.as_str(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_token_maps_to_unauthorized() {
        let err = Error::Auth(warp_auth::Error::InvalidToken("rejected".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn quota_exhausted_maps_to_too_many_requests() {
        let err = Error::Auth(warp_auth::Error::QuotaExhausted("no quota".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn invalid_request_maps_to_bad_request() {
        let err = Error::InvalidRequest("missing field".into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

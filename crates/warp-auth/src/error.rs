//! Error types for credential and token operations.

/// Errors from token decoding, refresh, and anonymous-acquisition operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    #[error("refresh token rejected: {0}")]
    InvalidToken(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("upstream response had an unexpected shape: {0}")]
    UpstreamShape(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

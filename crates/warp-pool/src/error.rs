//! Error types for registry and refresh-coordination operations.

/// Errors from account registry and refresh-coordination operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no account available: {0}")]
    PoolExhausted(String),

    #[error("account registry error: {0}")]
    Registry(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Auth(#[from] warp_auth::Error),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

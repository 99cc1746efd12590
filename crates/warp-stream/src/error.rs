//! Error types for stream adaptation.

/// Errors raised while decoding or classifying a stream event. The
/// adaptor itself never propagates these to its caller — per the
/// propagation policy, any failure degrades to a synthesized error event
/// — but the type exists so internal helpers have something to return.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed stream event: {0}")]
    MalformedEvent(String),
}

pub type Result<T> = std::result::Result<T, Error>;

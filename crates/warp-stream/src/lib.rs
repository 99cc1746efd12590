//! Stream adaptation and message risk classification for the proxied
//! chat-completions path.
//!
//! [`adaptor::StreamAdaptor`] watches a decoded event stream for a stuck
//! transaction and substitutes a retry or fallback message; [`risk`]
//! scores and rewrites outbound user messages that look like a request
//! to create or edit files directly, which the upstream cannot satisfy
//! on the caller's behalf.

pub mod adaptor;
pub mod error;
pub mod risk;

pub use adaptor::{StreamAdaptor, TransactionState};
pub use error::{Error, Result};
pub use risk::{score, system_prompt_for, transform};

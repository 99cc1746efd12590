//! Warp credential lifecycle library
//!
//! Provides token decoding, the dotenv-style Secrets Store, refresh-token
//! refresh, and anonymous account acquisition. This crate is a standalone
//! library with no dependency on the proxy binary — it can be tested and
//! used independently.
//!
//! Credential flow:
//! 1. `codec::is_expired` decides whether a refresh is due.
//! 2. `token::refresh_token` refreshes an existing refresh token.
//! 3. `anonymous::acquire` mints a brand new identity when no usable
//!    refresh token is available (quota exhausted with no accounts file,
//!    or first boot).
//! 4. `secrets::SecretsStore` persists the result for the next request.
//!
//! Account rotation and the overall refresh policy live one layer up, in
//! `warp-pool`, which composes these primitives.

pub mod anonymous;
pub mod codec;
pub mod constants;
pub mod error;
pub mod secrets;
pub mod token;

pub use anonymous::acquire;
pub use codec::{decode, is_expired};
pub use constants::*;
pub use error::{Error, Result};
pub use secrets::SecretsStore;
pub use token::{TokenResponse, refresh_token};

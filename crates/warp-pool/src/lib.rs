//! Account failover and refresh policy for the Warp credential lifecycle.
//!
//! Composes `warp_auth`'s primitives (token decoding, refresh, anonymous
//! acquisition) with a persistent Account Registry and a Quota Oracle
//! behind a single entry point, [`coordinator::RefreshCoordinator`].

pub mod coordinator;
pub mod error;
pub mod quota;
pub mod registry;

pub use coordinator::{AnonymousAcquirer, RefreshCoordinator, RefreshOutcome};
pub use error::{Error, Result};
pub use quota::QuotaInfo;
pub use registry::{Account, AccountRegistry, AccountStatus};

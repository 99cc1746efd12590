//! Refresh Coordinator
//!
//! The central policy engine. Given a request's demand for a valid access
//! token, inspects expiry and quota, chooses a refresh strategy, updates
//! the Secrets Store and Account Registry, and returns a valid token or a
//! typed error.
//!
//! Concurrent callers share a single in-flight refresh: a process-wide
//! mutex is acquired before any network call, and the secrets are
//! re-checked immediately after acquiring it, so a caller that lost the
//! race to start a refresh simply observes the winner's result instead
//! of performing a second one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use warp_auth::constants::{ACCESS_TOKEN_EXPIRY_BUFFER_SECS, DEFAULT_REFRESH_TOKEN_PLACEHOLDER};
use warp_auth::{SecretsStore, codec, token};

use crate::error::{Error, Result};
use crate::quota;
use crate::registry::{AccountRegistry, AccountStatus};

/// Outcome of a refresh attempt. A tagged variant rather than a bare
/// `Result` so callers that care about *why* a refresh failed (to decide
/// whether to mark an account `invalid_token` vs `refresh_failed`, for
/// instance) don't have to downcast an error type.
#[derive(Debug)]
pub enum RefreshOutcome {
    Ok { access_token: String },
    Err { kind: warp_auth::Error },
}

/// The key every refresh acquires the coordinator's lock under. There is
/// exactly one key in this process because there is exactly one active
/// identity at a time; the constant documents the singleflight intent
/// even though a single `Mutex` has no literal keyspace.
const REFRESH_LOCK_KEY: &str = "refresh";

/// The Anonymous Acquirer (§4.4) as a narrow, swappable collaborator
/// rather than a direct call to `warp_auth::acquire`, so a test can stand
/// in a stub that doesn't need a live upstream to exercise the
/// quota-exhausted-falls-through-to-anonymous-acquisition path.
#[async_trait::async_trait]
pub trait AnonymousAcquirer: Send + Sync {
    async fn acquire(&self, client: &reqwest::Client) -> warp_auth::Result<(String, token::TokenResponse)>;
}

struct WarpAnonymousAcquirer;

#[async_trait::async_trait]
impl AnonymousAcquirer for WarpAnonymousAcquirer {
    async fn acquire(&self, client: &reqwest::Client) -> warp_auth::Result<(String, token::TokenResponse)> {
        warp_auth::acquire(client).await
    }
}

pub struct RefreshCoordinator {
    secrets: Arc<SecretsStore>,
    registry: Option<Arc<AccountRegistry>>,
    http: reqwest::Client,
    quota_threshold: u64,
    refresh_lock: Mutex<()>,
    acquirer: Arc<dyn AnonymousAcquirer>,
}

impl RefreshCoordinator {
    pub fn new(
        secrets: Arc<SecretsStore>,
        registry: Option<Arc<AccountRegistry>>,
        http: reqwest::Client,
        quota_threshold: u64,
    ) -> Self {
        Self {
            secrets,
            registry,
            http,
            quota_threshold,
            refresh_lock: Mutex::new(()),
            acquirer: Arc::new(WarpAnonymousAcquirer),
        }
    }

    /// Ensure the Secrets Store holds a valid access token, refreshing it
    /// through whichever strategy applies. `force` treats the token as
    /// quota-low regardless of its own expiry or a successful quota read.
    pub async fn ensure_valid_access(&self, force: bool) -> Result<String> {
        self.secrets.reload().await.map_err(|e| Error::Io(e.to_string()))?;

        if let Some(valid) = self.fast_path_valid(force).await {
            return Ok(valid);
        }

        let _guard = match tokio::time::timeout(REFRESH_LOCK_TIMEOUT, self.refresh_lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                return Err(Error::Auth(warp_auth::Error::RefreshFailed(
                    "timed out waiting for in-flight refresh".to_string(),
                )));
            }
        };
        tracing::trace!(key = REFRESH_LOCK_KEY, "acquired refresh lock");

        // Re-check: another caller may have refreshed while we waited.
        self.secrets.reload().await.map_err(|e| Error::Io(e.to_string()))?;
        if let Some(valid) = self.fast_path_valid(force).await {
            return Ok(valid);
        }

        match self.do_refresh(force).await {
            RefreshOutcome::Ok { access_token } => Ok(access_token),
            RefreshOutcome::Err { kind } => Err(Error::Auth(kind)),
        }
    }

    /// Returns `Some(token)` if the current access token needs no action:
    /// present, not expired, and quota is not low (or `force` is false and
    /// quota couldn't be read, which degrades to "no refresh needed").
    async fn fast_path_valid(&self, force: bool) -> Option<String> {
        let access = self.secrets.get("WARP_JWT").await?;
        if access.is_empty() {
            return None;
        }

        let expired = codec::is_expired(&access, ACCESS_TOKEN_EXPIRY_BUFFER_SECS);
        let quota_low = if force {
            true
        } else {
            self.quota_low().await
        };

        if !expired && !quota_low {
            Some(access)
        } else {
            None
        }
    }

    async fn quota_low(&self) -> bool {
        let Some(identity) = self.secrets.get("WARP_ID_TOKEN").await else {
            return false;
        };
        if codec::is_expired(&identity, 0) {
            return false;
        }
        match quota::get_quota(&self.http, &identity).await {
            Some(info) => quota::should_refresh(&info, self.quota_threshold),
            None => false,
        }
    }

    /// Remaining refresh strategies, entered only once the fast path has
    /// ruled out "nothing to do".
    async fn do_refresh(&self, force: bool) -> RefreshOutcome {
        let access = self.secrets.get("WARP_JWT").await;

        if access.as_deref().unwrap_or("").is_empty() {
            if self.registry.is_some() {
                return self.file_refresh().await;
            }
            return self.token_refresh().await;
        }

        let quota_low = force || self.quota_low().await;
        if !quota_low {
            // Access token itself was expired (fast path already ruled
            // out the "neither" case), but quota is fine: ordinary
            // refresh-token refresh covers it.
            return self.token_refresh().await;
        }

        if let Some(registry) = &self.registry {
            if let Some(current_refresh) = self.secrets.get("WARP_REFRESH_TOKEN").await {
                let _ = registry.mark_current_exhausted(&current_refresh).await;
            }
            match self.file_refresh().await {
                ok @ RefreshOutcome::Ok { .. } => return ok,
                RefreshOutcome::Err { .. } => {
                    // Every registered account is exhausted too: fall through
                    // to anonymous acquisition exactly like the no-registry
                    // branch below, rather than surfacing the registry's
                    // "no available account" error directly to the caller.
                    return self.anonymous_acquire_then_token_refresh().await;
                }
            }
        }

        self.anonymous_acquire_then_token_refresh().await
    }

    /// Anonymous acquisition (§4.4), falling back to an ordinary
    /// refresh-token refresh if the acquired access token is already
    /// expired or the acquisition itself fails outright.
    async fn anonymous_acquire_then_token_refresh(&self) -> RefreshOutcome {
        match self.acquirer.acquire(&self.http).await {
            Ok((refresh_token_value, response)) => {
                if let Err(e) = self.persist(&response, Some(&refresh_token_value)).await {
                    return RefreshOutcome::Err { kind: e };
                }
                if codec::is_expired(&response.access_token, 0) {
                    warn!("anonymously acquired access token is already expired");
                    return self.token_refresh().await;
                }
                RefreshOutcome::Ok {
                    access_token: response.access_token,
                }
            }
            Err(_) => self.token_refresh().await,
        }
    }

    /// Pick an available account from the registry, install its refresh
    /// token, and run the ordinary refresh-token path once.
    async fn file_refresh(&self) -> RefreshOutcome {
        let Some(registry) = &self.registry else {
            return self.token_refresh().await;
        };

        let Some(account) = registry.pick_available().await else {
            return RefreshOutcome::Err {
                kind: warp_auth::Error::RefreshFailed(
                    "no available account in registry".to_string(),
                ),
            };
        };

        if let Err(e) = self
            .secrets
            .set("WARP_REFRESH_TOKEN", &account.refresh_token)
            .await
        {
            return RefreshOutcome::Err {
                kind: warp_auth::Error::Io(e.to_string()),
            };
        }

        match self.token_refresh().await {
            RefreshOutcome::Ok { access_token } => {
                let _ = registry
                    .set_status(&account.email, AccountStatus::Available)
                    .await;
                info!(email = %account.email, "file refresh succeeded");
                RefreshOutcome::Ok { access_token }
            }
            RefreshOutcome::Err { kind } => {
                let status = match &kind {
                    warp_auth::Error::InvalidToken(_) => AccountStatus::InvalidToken,
                    warp_auth::Error::QuotaExhausted(_) => AccountStatus::QuotaExhausted,
                    _ => AccountStatus::RefreshFailed,
                };
                warn!(email = %account.email, status = status.label(), "file refresh failed");
                let _ = registry.set_status(&account.email, status).await;
                RefreshOutcome::Err { kind }
            }
        }
    }

    /// Ordinary refresh-token refresh against the proxy token endpoint,
    /// persisting the result on success. The refresh token is
    /// held as a `Secret` for the lifetime of this call so it is wiped
    /// from memory as soon as the request-building is done with it,
    /// rather than lingering in a plain `String` until the stack unwinds.
    async fn token_refresh(&self) -> RefreshOutcome {
        let stored = self.secrets.get("WARP_REFRESH_TOKEN").await;
        if stored.is_none() {
            warn!(
                "no WARP_REFRESH_TOKEN in secrets store; falling back to the unconfigured \
                 placeholder refresh token, which will fail upstream"
            );
        }
        let refresh =
            common::Secret::new(stored.unwrap_or_else(|| DEFAULT_REFRESH_TOKEN_PLACEHOLDER.to_string()));

        match token::refresh_token(&self.http, refresh.expose()).await {
            Ok(response) => match self.persist(&response, None).await {
                Ok(()) => RefreshOutcome::Ok {
                    access_token: response.access_token,
                },
                Err(kind) => RefreshOutcome::Err { kind },
            },
            Err(kind) => RefreshOutcome::Err { kind },
        }
    }

    async fn persist(
        &self,
        response: &token::TokenResponse,
        refresh_token_value: Option<&str>,
    ) -> std::result::Result<(), warp_auth::Error> {
        self.secrets
            .set("WARP_JWT", &response.access_token)
            .await
            .map_err(|e| warp_auth::Error::Io(e.to_string()))?;
        if let Some(id_token) = &response.id_token {
            self.secrets
                .set("WARP_ID_TOKEN", id_token)
                .await
                .map_err(|e| warp_auth::Error::Io(e.to_string()))?;
        }
        if let Some(refresh) = refresh_token_value {
            self.secrets
                .set("WARP_REFRESH_TOKEN", refresh)
                .await
                .map_err(|e| warp_auth::Error::Io(e.to_string()))?;
        }
        Ok(())
    }
}

/// Duration after which an in-flight refresh should be considered hung
/// and the request driving it gives up (distinct from the 30s per-HTTP-
/// call timeout; this bounds the whole coordinated critical section).
pub const REFRESH_LOCK_TIMEOUT: Duration = Duration::from_secs(45);

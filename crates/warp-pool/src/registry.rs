//! Account Registry
//!
//! Holds a JSON array of accounts on disk. Unlike a round-robin in-memory
//! pool, selection here is a first-match scan: the first account with a
//! refresh token and `available` status wins. All writes are serialized
//! behind a mutex and persisted atomically, matching the write discipline
//! the credential store used for its own JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Status of one account in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Available,
    QuotaExhausted,
    RefreshFailed,
    InvalidToken,
}

impl AccountStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AccountStatus::Available => "available",
            AccountStatus::QuotaExhausted => "quota_exhausted",
            AccountStatus::RefreshFailed => "refresh_failed",
            AccountStatus::InvalidToken => "invalid_token",
        }
    }
}

fn default_status() -> AccountStatus {
    AccountStatus::Available
}

/// A single registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub refresh_token: String,
    #[serde(default = "default_status")]
    pub status: AccountStatus,
}

/// File-backed account registry.
pub struct AccountRegistry {
    path: PathBuf,
    accounts: Mutex<Vec<Account>>,
}

impl AccountRegistry {
    /// Load the registry from `path`. A missing file yields an empty
    /// registry rather than an error. Any account materialized without a
    /// `status` field is normalized to `available` and the file is
    /// rewritten so the default is durable.
    pub async fn load(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path,
                accounts: Mutex::new(Vec::new()),
            });
        }

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Io(format!("reading accounts file: {e}")))?;
        let accounts: Vec<Account> = serde_json::from_str(&contents)
            .map_err(|e| Error::Registry(format!("parsing accounts file: {e}")))?;

        info!(path = %path.display(), accounts = accounts.len(), "loaded account registry");

        let registry = Self {
            path,
            accounts: Mutex::new(accounts),
        };
        // Rewrite so that any status defaulted during deserialization becomes
        // durable rather than only existing in memory for this process.
        registry.save().await?;
        Ok(registry)
    }

    /// Persist the current account list atomically.
    pub async fn save(&self) -> Result<()> {
        let accounts = self.accounts.lock().await;
        write_atomic(&self.path, &accounts).await
    }

    /// First-match scan for an account with a non-empty refresh token and
    /// `available` status. Logs a status breakdown on miss.
    pub async fn pick_available(&self) -> Option<Account> {
        let accounts = self.accounts.lock().await;
        let found = accounts
            .iter()
            .find(|a| !a.refresh_token.is_empty() && a.status == AccountStatus::Available)
            .cloned();

        if found.is_none() {
            let (available, quota, refresh_failed, invalid) = count_statuses(&accounts);
            warn!(
                available,
                quota_exhausted = quota,
                refresh_failed,
                invalid_token = invalid,
                "no available account in registry"
            );
        }
        found
    }

    /// Set the status of the account matching `email`. No-op (with a
    /// warning) if no such account exists.
    pub async fn set_status(&self, email: &str, status: AccountStatus) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        match accounts.iter_mut().find(|a| a.email == email) {
            Some(account) => {
                account.status = status;
                debug!(email, status = status.label(), "account status updated");
            }
            None => {
                warn!(email, "set_status called for unknown account");
                return Ok(());
            }
        }
        write_atomic(&self.path, &accounts).await
    }

    /// Find the account whose refresh token equals `current_refresh` and
    /// mark it `quota_exhausted`. Used when the Secrets Store's active
    /// refresh token came from this registry and the Quota Oracle reports
    /// the account has run out of requests.
    pub async fn mark_current_exhausted(&self, current_refresh: &str) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        match accounts
            .iter_mut()
            .find(|a| a.refresh_token == current_refresh)
        {
            Some(account) => {
                account.status = AccountStatus::QuotaExhausted;
                info!(email = %account.email, "current account marked quota_exhausted");
            }
            None => {
                debug!("current refresh token did not match any registry account");
                return Ok(());
            }
        }
        write_atomic(&self.path, &accounts).await
    }

    /// Snapshot of the registry for the health/admin surface.
    pub async fn snapshot(&self) -> Vec<Account> {
        self.accounts.lock().await.clone()
    }

    /// Status breakdown `(available, quota_exhausted, refresh_failed, invalid_token)`,
    /// the same counts logged on a `pick_available` miss. Shared by the
    /// `/health` and `/admin/pool` surfaces so both report identical numbers.
    pub async fn status_counts(&self) -> (usize, usize, usize, usize) {
        count_statuses(&*self.accounts.lock().await)
    }
}

/// Publish the current status breakdown as Prometheus gauges. Called on
/// every persisted write, so the exported numbers always reflect the
/// on-disk state rather than a point-in-time poll.
fn record_status_gauges(accounts: &[Account]) {
    let (available, quota_exhausted, refresh_failed, invalid) = count_statuses(accounts);
    metrics::gauge!("warp_pool_accounts_available").set(available as f64);
    metrics::gauge!("warp_pool_accounts_quota_exhausted").set(quota_exhausted as f64);
    metrics::gauge!("warp_pool_accounts_invalid").set(invalid as f64);
    metrics::gauge!("warp_pool_accounts_refresh_failed").set(refresh_failed as f64);
}

fn count_statuses(accounts: &[Account]) -> (usize, usize, usize, usize) {
    let mut available = 0;
    let mut quota = 0;
    let mut refresh_failed = 0;
    let mut invalid = 0;
    for a in accounts {
        match a.status {
            AccountStatus::Available => available += 1,
            AccountStatus::QuotaExhausted => quota += 1,
            AccountStatus::RefreshFailed => refresh_failed += 1,
            AccountStatus::InvalidToken => invalid += 1,
        }
    }
    (available, quota, refresh_failed, invalid)
}

async fn write_atomic(path: &Path, accounts: &[Account]) -> Result<()> {
    record_status_gauges(accounts);

    let json = serde_json::to_string_pretty(accounts)
        .map_err(|e| Error::Registry(format!("serializing accounts: {e}")))?;

    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating accounts directory: {e}")))?;

    let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp accounts file: {e}")))?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp accounts file: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(email: &str, status: AccountStatus) -> Account {
        Account {
            email: email.to_string(),
            refresh_token: format!("rt_{email}"),
            status,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let registry = AccountRegistry::load(path).await.unwrap();
        assert!(registry.pick_available().await.is_none());
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        let json = serde_json::to_string(&vec![account("a@example.com", AccountStatus::Available)])
            .unwrap();
        tokio::fs::write(&path, json).await.unwrap();

        let registry = AccountRegistry::load(path.clone()).await.unwrap();
        let picked = registry.pick_available().await.unwrap();
        assert_eq!(picked.email, "a@example.com");
    }

    #[tokio::test]
    async fn missing_status_defaults_to_available_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        tokio::fs::write(
            &path,
            r#"[{"email":"a@example.com","refresh_token":"rt_a"}]"#,
        )
        .await
        .unwrap();

        let registry = AccountRegistry::load(path.clone()).await.unwrap();
        assert!(registry.pick_available().await.is_some());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("\"available\""));
    }

    #[tokio::test]
    async fn pick_available_skips_exhausted_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let accounts = vec![
            account("a@example.com", AccountStatus::QuotaExhausted),
            account("b@example.com", AccountStatus::InvalidToken),
            account("c@example.com", AccountStatus::Available),
        ];
        tokio::fs::write(&path, serde_json::to_string(&accounts).unwrap())
            .await
            .unwrap();

        let registry = AccountRegistry::load(path).await.unwrap();
        let picked = registry.pick_available().await.unwrap();
        assert_eq!(picked.email, "c@example.com");
    }

    #[tokio::test]
    async fn pick_available_is_first_match_not_round_robin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let accounts = vec![
            account("a@example.com", AccountStatus::Available),
            account("b@example.com", AccountStatus::Available),
        ];
        tokio::fs::write(&path, serde_json::to_string(&accounts).unwrap())
            .await
            .unwrap();

        let registry = AccountRegistry::load(path).await.unwrap();
        for _ in 0..3 {
            let picked = registry.pick_available().await.unwrap();
            assert_eq!(picked.email, "a@example.com");
        }
    }

    #[tokio::test]
    async fn set_status_updates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let accounts = vec![account("a@example.com", AccountStatus::Available)];
        tokio::fs::write(&path, serde_json::to_string(&accounts).unwrap())
            .await
            .unwrap();

        let registry = AccountRegistry::load(path.clone()).await.unwrap();
        registry
            .set_status("a@example.com", AccountStatus::RefreshFailed)
            .await
            .unwrap();

        assert!(registry.pick_available().await.is_none());

        let registry2 = AccountRegistry::load(path).await.unwrap();
        assert!(registry2.pick_available().await.is_none());
    }

    #[tokio::test]
    async fn set_status_unknown_account_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let registry = AccountRegistry::load(path).await.unwrap();
        registry
            .set_status("ghost@example.com", AccountStatus::InvalidToken)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mark_current_exhausted_matches_by_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let accounts = vec![account("a@example.com", AccountStatus::Available)];
        tokio::fs::write(&path, serde_json::to_string(&accounts).unwrap())
            .await
            .unwrap();

        let registry = AccountRegistry::load(path).await.unwrap();
        registry.mark_current_exhausted("rt_a@example.com").await.unwrap();
        assert!(registry.pick_available().await.is_none());
    }

    #[tokio::test]
    async fn status_counts_matches_pick_available_breakdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let accounts = vec![
            account("a@example.com", AccountStatus::Available),
            account("b@example.com", AccountStatus::QuotaExhausted),
            account("c@example.com", AccountStatus::QuotaExhausted),
            account("d@example.com", AccountStatus::InvalidToken),
        ];
        tokio::fs::write(&path, serde_json::to_string(&accounts).unwrap())
            .await
            .unwrap();

        let registry = AccountRegistry::load(path).await.unwrap();
        assert_eq!(registry.status_counts().await, (1, 2, 0, 1));
    }

    #[tokio::test]
    async fn save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("accounts.json");
        let registry = AccountRegistry::load(path.clone()).await.unwrap();
        registry.save().await.unwrap();
        assert!(path.exists());
    }
}

//! Secrets Store
//!
//! Manages a flat `KEY=VALUE` file (the conventional `.env` shape) holding
//! the current access/refresh/identity tokens and a handful of config
//! knobs that live alongside them. All writes use atomic temp-file +
//! rename, matching the discipline the credential store in the original
//! gateway used for its JSON file — only the on-disk format changes, not
//! the write path. A tokio Mutex serializes concurrent writes from
//! request-time refresh and any other caller.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// One line of the backing file, kept verbatim so that a `set()` call
/// only ever rewrites the one line it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// Blank line or comment, reproduced byte-for-byte on every write.
    Raw(String),
    Entry { key: String, value: String },
}

/// Thread-safe dotenv-style key/value file manager.
///
/// Reads overlay the process environment on top of the file: an
/// environment variable with the same key always wins. This lets an
/// operator override a single key (e.g. `WARP_REFRESH_TOKEN`) without
/// touching the file.
pub struct SecretsStore {
    path: PathBuf,
    lines: Mutex<Vec<Line>>,
}

impl SecretsStore {
    /// Load the secrets file from `path`. A missing file is treated as
    /// empty rather than an error — the store starts out with nothing
    /// but the process environment to draw from.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let lines = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading secrets file: {e}")))?;
            parse_dotenv(&contents)
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            lines: Mutex::new(lines),
        })
    }

    /// Re-read the backing file, discarding any stale in-memory state.
    ///
    /// Called at the start of every `ensure_valid_access` so that a
    /// refresh performed by another task becomes visible immediately.
    pub async fn reload(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Io(format!("reading secrets file: {e}")))?;
        let mut lines = self.lines.lock().await;
        *lines = parse_dotenv(&contents);
        Ok(())
    }

    /// Look up `key`, preferring the process environment over the file.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Ok(value) = std::env::var(key) {
            return Some(value);
        }
        let lines = self.lines.lock().await;
        lines.iter().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.clone()),
            _ => None,
        })
    }

    /// Set `key` to `value`, preserving every other key, comment, and
    /// blank line, and persist atomically. Does not touch the process
    /// environment — callers that want the new value to win over an
    /// existing env var for the rest of the process lifetime must set it
    /// themselves.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut lines = self.lines.lock().await;
        let mut found = false;
        for line in lines.iter_mut() {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    v.clear();
                    v.push_str(value);
                    found = true;
                    break;
                }
            }
        }
        if !found {
            lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        write_atomic(&self.path, &lines).await?;
        debug!(key, "updated secret");
        Ok(())
    }
}

fn parse_dotenv(contents: &str) -> Vec<Line> {
    contents
        .lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return Line::Raw(line.to_string());
            }
            match trimmed.split_once('=') {
                Some((key, value)) => Line::Entry {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                },
                None => Line::Raw(line.to_string()),
            }
        })
        .collect()
}

fn render_dotenv(lines: &[Line]) -> String {
    let mut out = String::new();
    for line in lines {
        match line {
            Line::Raw(text) => out.push_str(text),
            Line::Entry { key, value } => {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
            }
        }
        out.push('\n');
    }
    out
}

/// Write the secrets lines to a file atomically, with 0600 permissions on
/// unix since the file carries live bearer tokens.
async fn write_atomic(path: &Path, lines: &[Line]) -> Result<()> {
    let rendered = render_dotenv(lines);

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("secrets path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".secrets.tmp.{}", std::process::id()));

    let mut tmp_file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| Error::Io(format!("creating temp secrets file: {e}")))?;
    tmp_file
        .write_all(rendered.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp secrets file: {e}")))?;
    tmp_file
        .sync_all()
        .await
        .map_err(|e| Error::Io(format!("fsyncing temp secrets file: {e}")))?;
    drop(tmp_file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting secrets file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp secrets file: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_set_get() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");

        let store = SecretsStore::load(path.clone()).await.unwrap();
        store.set("WARP_JWT", "jwt-1").await.unwrap();

        let store2 = SecretsStore::load(path).await.unwrap();
        assert_eq!(store2.get("WARP_JWT").await, Some("jwt-1".to_string()));
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.env");

        let store = SecretsStore::load(path).await.unwrap();
        assert_eq!(store.get("WARP_JWT").await, None);
    }

    #[tokio::test]
    async fn set_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");

        let store = SecretsStore::load(path.clone()).await.unwrap();
        store.set("WARP_JWT", "jwt-1").await.unwrap();
        store.set("WARP_REFRESH_TOKEN", "rt-1").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("WARP_JWT=jwt-1"));
        assert!(contents.contains("WARP_REFRESH_TOKEN=rt-1"));
    }

    #[tokio::test]
    async fn set_preserves_comments_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        tokio::fs::write(
            &path,
            "# warp credentials\nWARP_JWT=old\n\n# refresh token below\nWARP_REFRESH_TOKEN=rt-0\n",
        )
        .await
        .unwrap();

        let store = SecretsStore::load(path.clone()).await.unwrap();
        store.set("WARP_JWT", "new").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            contents,
            "# warp credentials\nWARP_JWT=new\n\n# refresh token below\nWARP_REFRESH_TOKEN=rt-0\n"
        );
    }

    #[tokio::test]
    async fn set_overwrites_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");

        let store = SecretsStore::load(path).await.unwrap();
        store.set("WARP_JWT", "jwt-1").await.unwrap();
        store.set("WARP_JWT", "jwt-2").await.unwrap();
        assert_eq!(store.get("WARP_JWT").await, Some("jwt-2".to_string()));
    }

    #[tokio::test]
    async fn reload_picks_up_external_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");

        let store = SecretsStore::load(path.clone()).await.unwrap();
        tokio::fs::write(&path, "WARP_JWT=external\n")
            .await
            .unwrap();
        store.reload().await.unwrap();
        assert_eq!(store.get("WARP_JWT").await, Some("external".to_string()));
    }

    #[test]
    fn parse_dotenv_skips_blank_and_comment_lines() {
        let contents = "# a comment\n\nWARP_JWT=abc\n  \nWARP_REFRESH_TOKEN=def\n";
        let parsed = parse_dotenv(contents);
        let entries: Vec<_> = parsed
            .iter()
            .filter_map(|line| match line {
                Line::Entry { key, value } => Some((key.as_str(), value.as_str())),
                Line::Raw(_) => None,
            })
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("WARP_JWT", "abc"));
        assert_eq!(entries[1], ("WARP_REFRESH_TOKEN", "def"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");

        let store = SecretsStore::load(path.clone()).await.unwrap();
        store.set("WARP_JWT", "jwt-1").await.unwrap();

        let meta = tokio::fs::metadata(&path).await.unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}

//! Configuration types and loading
//!
//! Deployment-level settings (listen addresses, upstream URL, file paths)
//! come from a TOML file. The credential values themselves are deliberately
//! *not* duplicated here: they live in the Secrets Store's own flat file
//! and are read through `SecretsStore::get`, with the same environment-overlay
//! precedence as every other secret. `Config::load` only overlays the
//! handful of knobs that also make sense as plain process environment
//! variables when no TOML file is present, so a bare `docker run -e ...`
//! deployment works without a mounted config file.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

/// Root configuration for the proxy binary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub credentials: CredentialsConfig,
    pub logging: LoggingConfig,
}

/// Listener and upstream settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub admin_listen_addr: SocketAddr,
    pub upstream_base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8010".parse().unwrap(),
            admin_listen_addr: "0.0.0.0:9090".parse().unwrap(),
            upstream_base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

/// Paths to the two on-disk stores, plus the quota-refresh policy knob.
/// Covers `LOCAL_JWT_FILEPATH` and `QUOTA_REFRESH_THRESHOLD`; the secrets
/// file's own content (access, refresh, identity tokens) is never part of
/// this struct.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub secrets_path: PathBuf,
    pub accounts_path: Option<PathBuf>,
    pub quota_refresh_threshold: u64,
    pub warmup: WarmupConfig,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            secrets_path: PathBuf::from("warp-secrets.env"),
            accounts_path: None,
            quota_refresh_threshold: 0,
            warmup: WarmupConfig::default(),
        }
    }
}

/// Startup warm-up knobs (`WARP_COMPAT_*` in the secrets table). Warm-up
/// retries an initial `ensure_valid_access` a bounded number of times
/// before the server starts accepting traffic, since the very first
/// request otherwise pays the full refresh latency.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    pub init_retries: u32,
    pub init_delay_ms: u64,
    pub warmup_retries: u32,
    pub warmup_delay_ms: u64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            init_retries: 10,
            init_delay_ms: 500,
            warmup_retries: 3,
            warmup_delay_ms: 1500,
        }
    }
}

/// Logging collaborator configuration (`LOG_*` keys).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<PathBuf>,
    pub max_file_size_mb: u64,
    pub backup_count: u32,
    pub format: LogFormat,
    pub enable_rotation: bool,
    pub enable_backup: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            max_file_size_mb: 100,
            backup_count: 5,
            format: LogFormat::Json,
            enable_rotation: false,
            enable_backup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    /// Load configuration from a TOML file, falling back to built-in
    /// defaults if the file does not exist (matching the Secrets Store
    /// and Account Registry's own "missing file is empty, not an error"
    /// discipline). Overlays a small set of environment variables onto
    /// the result afterward so a containerized deployment with no mounted
    /// file still works.
    pub fn load(path: &std::path::Path) -> common::Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        config.overlay_env();
        Ok(config)
    }

    fn overlay_env(&mut self) {
        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                self.server.listen_addr = parsed;
            }
        }
        if let Ok(addr) = std::env::var("ADMIN_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                self.server.admin_listen_addr = parsed;
            }
        }
        if let Ok(url) = std::env::var("WARP_BACKEND_URL") {
            self.server.upstream_base_url = url;
        }
        if let Ok(path) = std::env::var("LOCAL_JWT_FILEPATH") {
            self.credentials.accounts_path = Some(PathBuf::from(path));
        }
        if let Ok(threshold) = std::env::var("QUOTA_REFRESH_THRESHOLD") {
            if let Ok(parsed) = threshold.parse() {
                self.credentials.quota_refresh_threshold = parsed;
            }
        }
        if let Ok(v) = std::env::var("WARP_COMPAT_INIT_RETRIES") {
            if let Ok(parsed) = v.parse() {
                self.credentials.warmup.init_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("WARP_COMPAT_INIT_DELAY") {
            if let Ok(secs) = v.parse::<f64>() {
                self.credentials.warmup.init_delay_ms = (secs * 1000.0) as u64;
            }
        }
        if let Ok(v) = std::env::var("WARP_COMPAT_WARMUP_RETRIES") {
            if let Ok(parsed) = v.parse() {
                self.credentials.warmup.warmup_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("WARP_COMPAT_WARMUP_DELAY") {
            if let Ok(secs) = v.parse::<f64>() {
                self.credentials.warmup.warmup_delay_ms = (secs * 1000.0) as u64;
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("LOG_DIRECTORY") {
            self.logging.directory = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("LOG_ENABLE_ROTATION") {
            self.logging.enable_rotation = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("LOG_ENABLE_BACKUP") {
            self.logging.enable_backup = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }

    /// Resolve the config file path from an optional CLI argument, the
    /// `WARP_PROXY_CONFIG` environment variable, or a default relative
    /// path, in that order of precedence.
    pub fn resolve_path(cli_arg: Option<&str>) -> PathBuf {
        if let Some(arg) = cli_arg {
            return PathBuf::from(arg);
        }
        if let Ok(env_path) = std::env::var("WARP_PROXY_CONFIG") {
            return PathBuf::from(env_path);
        }
        PathBuf::from("warp-proxy.toml")
    }
}

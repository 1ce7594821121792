//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `FIDOTEST_LISTEN`, `RUST_LOG`
//! 2. **Config file** — path via `--config <path>`, or `fidotest-server.yaml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The YAML file mirrors the struct hierarchy (spec §6):
//!
//! ```yaml
//! server:
//!   listen: "0.0.0.0:8080"
//!
//! logging:
//!   level: info
//!
//! modem_api:
//!   enabled: true
//!   orphan_check_interval_secs: 60
//!   offline_threshold_secs: 300
//!   stale_in_progress_threshold_secs: 900
//!   max_batch_size: 100
//!   max_body_size_mb: 1
//!   rate_limits:
//!     requests_per_second: 10
//!     burst: 20
//!     max_per_minute: 600
//!   callers:
//!     - caller_id: eu
//!       api_key_hash: "sha256:..."
//!       priority: 10
//!       prefix_mode: exclude
//!       prefixes: ["+7", "+86", "+1"]
//! ```

use serde::Deserialize;
use std::path::Path;

use fidotest_common::CallerConfig;

/// Top-level configuration, deserialized from YAML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub modem_api: ModemApiConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// `sctl supervise`-style crash-restart tuning, kept from the teacher
/// unchanged (spec §1 doesn't name a supervisor, but the teacher always
/// ships one for its long-running binaries).
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_max_backoff")]
    pub max_backoff: u64,
    #[serde(default = "default_stable_threshold")]
    pub stable_threshold: u64,
}

fn default_max_backoff() -> u64 {
    60
}
fn default_stable_threshold() -> u64 {
    30
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_backoff: default_max_backoff(),
            stable_threshold: default_stable_threshold(),
        }
    }
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent TCP connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// `modem_api.*` — spec §6's documented shape for C5's queue maintenance
/// and the daemon-facing HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct ModemApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub callers: Vec<CallerConfig>,
    #[serde(default = "default_orphan_check_interval_secs")]
    pub orphan_check_interval_secs: u64,
    #[serde(default = "default_offline_threshold_secs")]
    pub offline_threshold_secs: u64,
    #[serde(default = "default_stale_in_progress_threshold_secs")]
    pub stale_in_progress_threshold_secs: u64,
    #[serde(default = "default_stale_reclaim_backoff_secs")]
    pub stale_reclaim_backoff_secs: u64,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,
}

/// Token-bucket parameters (spec §6: "10 req/s, burst 20, max 600/min").
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u32,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_max_connections() -> usize {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_orphan_check_interval_secs() -> u64 {
    60
}
fn default_offline_threshold_secs() -> u64 {
    300
}
fn default_stale_in_progress_threshold_secs() -> u64 {
    900
}
fn default_stale_reclaim_backoff_secs() -> u64 {
    120
}
fn default_max_batch_size() -> usize {
    100
}
fn default_max_body_size_mb() -> usize {
    1
}
fn default_requests_per_second() -> u32 {
    10
}
fn default_burst() -> u32 {
    20
}
fn default_max_per_minute() -> u32 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            max_per_minute: default_max_per_minute(),
        }
    }
}

impl Default for ModemApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            callers: Vec::new(),
            orphan_check_interval_secs: default_orphan_check_interval_secs(),
            offline_threshold_secs: default_offline_threshold_secs(),
            stale_in_progress_threshold_secs: default_stale_in_progress_threshold_secs(),
            stale_reclaim_backoff_secs: default_stale_reclaim_backoff_secs(),
            rate_limits: RateLimitsConfig::default(),
            max_batch_size: default_max_batch_size(),
            max_body_size_mb: default_max_body_size_mb(),
        }
    }
}

/// Config-time problems (spec §7's `ConfigError`, fatal at startup).
#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            serde_yaml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("fidotest-server.yaml").exists() {
            let content = std::fs::read_to_string("fidotest-server.yaml")
                .expect("Failed to read fidotest-server.yaml");
            serde_yaml::from_str(&content).expect("Failed to parse fidotest-server.yaml")
        } else {
            Config::default()
        };

        if let Ok(listen) = std::env::var("FIDOTEST_LISTEN") {
            config.server.listen = listen;
        }

        config
    }

    /// Validate every configured caller's shape (spec §7's `ConfigError`).
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for caller in &self.modem_api.callers {
            if caller.caller_id.is_empty() {
                errors.push(ConfigError("caller_id must not be empty".to_string()));
            }
            if !caller.api_key_hash.starts_with("sha256:") {
                errors.push(ConfigError(format!(
                    "caller {}: api_key_hash must be in sha256:<hex> form",
                    caller.caller_id
                )));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.modem_api.rate_limits.requests_per_second, 10);
        assert_eq!(cfg.modem_api.max_batch_size, 100);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn validate_rejects_malformed_api_key_hash() {
        let mut cfg = Config::default();
        cfg.modem_api.callers.push(CallerConfig {
            caller_id: "eu".to_string(),
            api_key_hash: "not-a-hash".to_string(),
            priority: 10,
            prefix_mode: fidotest_common::PrefixMode::All,
            prefixes: vec![],
        });
        assert_eq!(cfg.validate().len(), 1);
    }
}

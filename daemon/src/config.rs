//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `FIDOTEST_DAEMON_CONFIG`, `RUST_LOG`
//! 2. **Config file** — path via `--config <path>`, or `fidotest-daemon.yaml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! One daemon process drives exactly one modem and answers to exactly one
//! caller identity (spec §6), so this is a single-device YAML file rather
//! than the multi-device JSON registry the MCP proxy this crate is
//! descended from used to fan requests out to several devices.
//!
//! ```yaml
//! api:
//!   url: "https://fidotest.example.org"
//!   key: "changeme"
//!
//! identity:
//!   address: "2:5001/100"
//!   system_name: "FidoTest Node"
//!   sysop: "Sysop"
//!   location: "Nowhere"
//!
//! modem:
//!   device: "/dev/ttyUSB0"
//!   init: "ATZ"
//!   baud_rate: 115200
//!   dial_prefix: "ATDT"
//!   hangup_method: dtr
//!
//! timeouts:
//!   dial_secs: 60
//!   carrier_secs: 10
//!   emsi_secs: 60
//!   at_command_secs: 5
//!
//! polling:
//!   interval_secs: 30
//!   batch_size: 5
//!   inter_call_delay_secs: 5
//!
//! heartbeat:
//!   interval_secs: 60
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

/// CLI arguments accepted by `fidotest-daemon`.
#[derive(Parser, Debug)]
#[command(name = "fidotest-daemon", version)]
pub struct Cli {
    /// Path to the daemon's YAML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Run under the crash-restart supervisor instead of directly.
    #[arg(long)]
    pub supervisor: bool,
}

/// Top-level configuration, deserialized from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub identity: IdentityConfig,
    pub modem: ModemConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// `api.*` — how to reach `fidotest-server` (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    pub key: String,
}

/// `identity.*` — the session identity this daemon presents during EMSI
/// (spec §4.2's "Build EMSI_DAT from the session identity").
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub address: String,
    pub system_name: String,
    pub sysop: String,
    pub location: String,
}

/// How this daemon ends a call (spec §4.3's two hangup strategies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupMethod {
    Dtr,
    Escape,
}

/// `modem.*` — serial device + dialing parameters (spec §4.3, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ModemConfig {
    pub device: String,
    #[serde(default = "default_modem_init")]
    pub init: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_dial_prefix")]
    pub dial_prefix: String,
    #[serde(default = "default_hangup_method")]
    pub hangup_method: HangupMethod,
}

/// `timeouts.*` — spec §6.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_dial_secs")]
    pub dial_secs: u64,
    #[serde(default = "default_carrier_secs")]
    pub carrier_secs: u64,
    #[serde(default = "default_emsi_secs")]
    pub emsi_secs: u64,
    #[serde(default = "default_at_command_secs")]
    pub at_command_secs: u64,
}

/// `polling.*` — the daemon loop's cadence (spec §4.4).
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_inter_call_delay_secs")]
    pub inter_call_delay_secs: u64,
}

/// `heartbeat.*` — spec §4.4's independent heartbeat goroutine.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
}

/// Logging configuration, carried the same way as `server/src/config.rs`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Crash-restart tuning for `fidotest-daemon --supervisor`, kept the same
/// shape as `server/src/config.rs::SupervisorConfig`.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_max_backoff")]
    pub max_backoff: u64,
    #[serde(default = "default_stable_threshold")]
    pub stable_threshold: u64,
}

fn default_modem_init() -> String {
    "ATZ".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_dial_prefix() -> String {
    "ATDT".to_string()
}
fn default_hangup_method() -> HangupMethod {
    HangupMethod::Dtr
}
fn default_dial_secs() -> u64 {
    60
}
fn default_carrier_secs() -> u64 {
    10
}
fn default_emsi_secs() -> u64 {
    60
}
fn default_at_command_secs() -> u64 {
    5
}
fn default_interval_secs() -> u64 {
    30
}
fn default_batch_size() -> u32 {
    5
}
fn default_inter_call_delay_secs() -> u64 {
    5
}
fn default_heartbeat_interval_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_backoff() -> u64 {
    60
}
fn default_stable_threshold() -> u64 {
    30
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            dial_secs: default_dial_secs(),
            carrier_secs: default_carrier_secs(),
            emsi_secs: default_emsi_secs(),
            at_command_secs: default_at_command_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            inter_call_delay_secs: default_inter_call_delay_secs(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval_secs(),
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

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_backoff: default_max_backoff(),
            stable_threshold: default_stable_threshold(),
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
    /// Load configuration: `--config <path>` > `fidotest-daemon.yaml` in CWD.
    /// There is no compiled-default fallback — `api.url`/`modem.device` are
    /// mandatory and have no sane default, unlike the server's config.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let path = cli
            .config
            .clone()
            .or_else(|| {
                let default = PathBuf::from("fidotest-daemon.yaml");
                default.exists().then_some(default)
            })
            .ok_or_else(|| {
                ConfigError("no config file given (--config) and fidotest-daemon.yaml not found".to_string())
            })?;

        Self::load_from_file(&path)
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("reading {}: {e}", path.display())))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the mandatory fields (spec §7's `ConfigError`).
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api.url.is_empty() {
            return Err(ConfigError("api.url must not be empty".to_string()));
        }
        if self.api.key.is_empty() {
            return Err(ConfigError("api.key must not be empty".to_string()));
        }
        if self.modem.device.is_empty() {
            return Err(ConfigError("modem.device must not be empty".to_string()));
        }
        self.identity
            .address
            .parse::<fidotest_common::Address>()
            .map_err(|e| ConfigError(format!("identity.address: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
api:
  url: "https://fidotest.example.org"
  key: "changeme"
identity:
  address: "2:5001/100"
  system_name: "FidoTest Node"
  sysop: "Sysop"
  location: "Nowhere"
modem:
  device: "/dev/ttyUSB0"
"#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.modem.baud_rate, 115_200);
        assert_eq!(config.modem.hangup_method, HangupMethod::Dtr);
        assert_eq!(config.polling.batch_size, 5);
        assert_eq!(config.heartbeat.interval_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_identity_address() {
        let mut config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        config.identity.address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_modem_device() {
        let mut config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        config.modem.device = String::new();
        assert!(config.validate().is_err());
    }
}

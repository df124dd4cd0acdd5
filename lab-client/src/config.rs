//! Configuration for p2plab clients.
//!
//! Configuration is loaded from a TOML file. Every section and field is
//! optional; missing values take the defaults below.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabConfig {
    /// Control endpoint timeouts.
    #[serde(default)]
    pub control: ControlConfig,
    /// Provisioning and teardown.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// SSH session defaults.
    #[serde(default)]
    pub ssh: SshConfig,
}

/// Control endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Timeout for dialing a control endpoint (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound for a single request, including `run` (default: 300).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long to wait for a node to acknowledge an abort (default: 5000).
    #[serde(default = "default_abort_timeout_ms")]
    pub abort_timeout_ms: u64,
}

/// Provisioning configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Maximum node allocations in flight per group (default: 8).
    #[serde(default = "default_concurrency")]
    pub provision_concurrency: usize,
    /// Maximum node deallocations in flight per group (default: 8).
    #[serde(default = "default_concurrency")]
    pub teardown_concurrency: usize,
    /// Deallocation attempts per node when rolling back a failed
    /// provisioning (default: 3).
    #[serde(default = "default_rollback_attempts")]
    pub rollback_attempts: u32,
}

/// SSH session defaults, used for settings no option has set.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Login user.
    #[serde(default)]
    pub user: Option<String>,
    /// Remote port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Verify host keys (default: false, lab hosts are ephemeral).
    #[serde(default)]
    pub strict_host_key_checking: bool,
    /// SSH connect timeout in seconds (default: 30).
    #[serde(default = "default_ssh_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// Default value functions
fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_abort_timeout_ms() -> u64 {
    5000
}

fn default_concurrency() -> usize {
    8
}

fn default_rollback_attempts() -> u32 {
    3
}

fn default_ssh_connect_timeout_secs() -> u64 {
    30
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            abort_timeout_ms: default_abort_timeout_ms(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provision_concurrency: default_concurrency(),
            teardown_concurrency: default_concurrency(),
            rollback_attempts: default_rollback_attempts(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: None,
            strict_host_key_checking: false,
            connect_timeout_secs: default_ssh_connect_timeout_secs(),
        }
    }
}

impl ControlConfig {
    /// Dial timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Abort acknowledgement timeout.
    pub fn abort_timeout(&self) -> Duration {
        Duration::from_millis(self.abort_timeout_ms)
    }
}

impl LabConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall every operation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("control.connect_timeout_secs", self.control.connect_timeout_secs == 0),
            ("control.request_timeout_secs", self.control.request_timeout_secs == 0),
            ("provider.provision_concurrency", self.provider.provision_concurrency == 0),
            ("provider.teardown_concurrency", self.provider.teardown_concurrency == 0),
            ("provider.rollback_attempts", self.provider.rollback_attempts == 0),
        ];
        match checks.iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(ConfigError::Invalid {
                field: (*field).to_string(),
                reason: "must be greater than zero".to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Dotted field name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

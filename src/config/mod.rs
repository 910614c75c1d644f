//! Configuration for shellpilot
//!
//! All sections default sensibly, so an empty or partial file is valid. See
//! [`loader::ConfigLoader`] for the search order.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote shell session settings
    pub session: SessionConfig,

    /// Plan executor settings
    pub executor: ExecutorConfig,

    /// Safety classifier settings
    pub safety: SafetyConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Remote shell session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Remote access client binary
    pub ssh_binary: String,

    /// Helper used to feed passwords to the client
    pub password_helper: String,

    /// How long to wait for the first prompt before forcing readiness
    pub connect_timeout_secs: u64,

    /// Output silence required after the prompt before the session counts as ready
    pub prompt_quiet_period_ms: u64,

    /// Grace window between SIGTERM and a forced kill on disconnect
    pub disconnect_grace_ms: u64,

    /// Keep-alive interval passed to the client
    pub server_alive_interval_secs: u64,

    /// Upper bound for the rolling output buffer
    pub max_buffer_bytes: usize,

    /// Extra options appended verbatim before the destination
    pub extra_ssh_options: Vec<String>,

    /// Shell used by the local transport
    pub local_shell: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            password_helper: "sshpass".to_string(),
            connect_timeout_secs: 10,
            prompt_quiet_period_ms: 300,
            disconnect_grace_ms: 500,
            server_alive_interval_secs: 30,
            max_buffer_bytes: 4 * 1024 * 1024,
            extra_ssh_options: Vec::new(),
            local_shell: PathBuf::from("/bin/sh"),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn prompt_quiet_period(&self) -> Duration {
        Duration::from_millis(self.prompt_quiet_period_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

/// Plan executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Step timeout used when a plan file omits one
    pub default_step_timeout_secs: u64,

    /// Output polling interval while waiting on a command
    pub poll_interval_ms: u64,

    /// Output silence (with a prompt at the tail) that counts as completion
    pub stable_after_ms: u64,

    /// Pause before retrying a failed step
    pub retry_delay_ms: u64,

    /// Append an exit-status marker to every command
    pub capture_exit_status: bool,

    /// Retry budget used when a plan file omits one
    pub default_max_retries: u32,

    /// Plan deadline used when a plan file omits one
    pub default_max_total_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: 60,
            poll_interval_ms: 50,
            stable_after_ms: 500,
            retry_delay_ms: 0,
            capture_exit_status: true,
            default_max_retries: 0,
            default_max_total_secs: 600,
        }
    }
}

/// Safety classifier configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Additional regex patterns treated as dangerous
    pub extra_patterns: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

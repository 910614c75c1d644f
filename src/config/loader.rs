//! Configuration File Loading
//!
//! Searches the standard locations for `config.toml` / `config.json`, falls
//! back to defaults, and validates ranges before handing the config out.

use super::Config;
use crate::error::{Error, Result};
use crate::security_audit;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "shellpilot";

/// Configuration file loader
pub struct ConfigLoader {
    /// Directories searched for configuration files
    search_paths: Vec<PathBuf>,
    /// Supported configuration file formats
    supported_formats: Vec<ConfigFormat>,
    /// Current configuration file path (if loaded)
    current_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl ConfigFormat {
    /// Format implied by a file extension; TOML when unknown
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Json => "JSON",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            ConfigFormat::Toml => "config.toml",
            ConfigFormat::Json => "config.json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Fall back to the default config if none exists
    pub create_default: bool,
    /// Validate configuration after loading
    pub validate: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            create_default: true,
            validate: true,
        }
    }
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            search_paths: Self::get_search_paths(),
            supported_formats: vec![ConfigFormat::Toml, ConfigFormat::Json],
            current_path: None,
        }
    }

    /// Load configuration with default options
    pub fn load() -> Result<Config> {
        Self::load_with_options(LoadOptions::default())
    }

    /// Load configuration with custom options
    pub fn load_with_options(options: LoadOptions) -> Result<Config> {
        Self::new().load_from_search_paths(&options)
    }

    /// Load from this loader's search paths
    pub fn load_from_search_paths(&mut self, options: &LoadOptions) -> Result<Config> {
        if let Some((path, config)) = self.find_and_load_config()? {
            if options.validate {
                validate_config(&config)?;
            }
            security_audit::log_config_event(false, Some(&format!("path={}", path.display())));
            self.current_path = Some(path);
            return Ok(config);
        }

        if options.create_default {
            debug!("No configuration file found, using defaults");
            let config = Config::default();
            if options.validate {
                validate_config(&config)?;
            }
            Ok(config)
        } else {
            Err(Error::ConfigNotFound)
        }
    }

    /// Load and validate one explicit file
    pub fn load_from_path(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(Error::ConfigLoadFailed {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }
        let config = load_config_file(path, ConfigFormat::from_path(path)).inspect_err(|e| {
            security_audit::log_config_event(true, Some(&e.to_string()));
        })?;
        validate_config(&config)?;
        security_audit::log_config_event(false, Some(&format!("path={}", path.display())));
        Ok(config)
    }

    /// Save configuration to the current path or default location
    pub fn save(&self, config: &Config) -> Result<PathBuf> {
        let path = self
            .current_path
            .clone()
            .unwrap_or_else(Self::get_default_config_path);
        self.save_to_path(config, &path)?;
        Ok(path)
    }

    /// Save configuration to a specific path, format chosen by extension
    pub fn save_to_path(&self, config: &Config, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::ConfigSaveFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let format = ConfigFormat::from_path(path);
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| {
                Error::ConfigSerializationFailed {
                    format: format.name().to_string(),
                    reason: e.to_string(),
                }
            })?,
            ConfigFormat::Toml => {
                toml::to_string_pretty(config).map_err(|e| Error::ConfigSerializationFailed {
                    format: format.name().to_string(),
                    reason: e.to_string(),
                })?
            }
        };

        fs::write(path, content).map_err(|e| Error::ConfigSaveFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Find and load configuration from search paths
    fn find_and_load_config(&self) -> Result<Option<(PathBuf, Config)>> {
        for dir in &self.search_paths {
            for format in &self.supported_formats {
                let config_path = dir.join(format.file_name());

                if config_path.exists() {
                    match load_config_file(&config_path, *format) {
                        Ok(config) => return Ok(Some((config_path, config))),
                        Err(e) => {
                            warn!(
                                "Failed to load config from {}: {}",
                                config_path.display(),
                                e
                            );
                            security_audit::log_config_event(true, Some(&e.to_string()));
                            continue;
                        }
                    }
                }
            }
        }

        Ok(None)
    }

    /// Default search directories, highest priority first
    fn get_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg_config).join(APP_DIR));
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(APP_DIR));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".shellpilot"));
        }

        if let Ok(cwd) = env::current_dir() {
            paths.push(cwd.join(".shellpilot"));
        }

        paths
    }

    /// Get the default configuration path
    fn get_default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Get the current configuration file path
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// List all search paths
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Clear all search paths and add a single path
    pub fn set_search_path(&mut self, path: PathBuf) {
        self.search_paths = vec![path];
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a configuration file in the given format
fn load_config_file(path: &Path, format: ConfigFormat) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigLoadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    match format {
        ConfigFormat::Toml => toml::from_str(&content).map_err(|e| Error::ConfigParseFailed {
            format: format.name().to_string(),
            reason: e.to_string(),
        }),
        ConfigFormat::Json => {
            serde_json::from_str(&content).map_err(|e| Error::ConfigParseFailed {
                format: format.name().to_string(),
                reason: e.to_string(),
            })
        }
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::ConfigValidationFailed {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate configuration ranges
pub fn validate_config(config: &Config) -> Result<()> {
    let session = &config.session;

    if session.ssh_binary.trim().is_empty() {
        return Err(invalid("session.ssh_binary", "Client binary cannot be empty"));
    }

    if session.password_helper.trim().is_empty() {
        return Err(invalid(
            "session.password_helper",
            "Password helper cannot be empty",
        ));
    }

    if session.connect_timeout_secs == 0 || session.connect_timeout_secs > 300 {
        return Err(invalid(
            "session.connect_timeout_secs",
            "Connect timeout must be between 1 and 300 seconds",
        ));
    }

    if session.prompt_quiet_period_ms > 10_000 {
        return Err(invalid(
            "session.prompt_quiet_period_ms",
            "Prompt quiet period cannot exceed 10 seconds",
        ));
    }

    if session.disconnect_grace_ms > 30_000 {
        return Err(invalid(
            "session.disconnect_grace_ms",
            "Disconnect grace window cannot exceed 30 seconds",
        ));
    }

    if session.max_buffer_bytes < 4096 {
        return Err(invalid(
            "session.max_buffer_bytes",
            "Output buffer must hold at least 4KB",
        ));
    }

    if session.max_buffer_bytes > 256 * 1024 * 1024 {
        return Err(invalid(
            "session.max_buffer_bytes",
            "Output buffer cannot exceed 256MB",
        ));
    }

    let executor = &config.executor;

    if executor.default_step_timeout_secs == 0 || executor.default_step_timeout_secs > 86_400 {
        return Err(invalid(
            "executor.default_step_timeout_secs",
            "Step timeout must be between 1 second and 24 hours",
        ));
    }

    if executor.poll_interval_ms == 0 || executor.poll_interval_ms > 5_000 {
        return Err(invalid(
            "executor.poll_interval_ms",
            "Poll interval must be between 1 and 5000 milliseconds",
        ));
    }

    if executor.stable_after_ms < executor.poll_interval_ms {
        return Err(invalid(
            "executor.stable_after_ms",
            "Stability window must be at least one poll interval",
        ));
    }

    if executor.default_max_total_secs == 0 {
        return Err(invalid(
            "executor.default_max_total_secs",
            "Plan deadline must be greater than 0",
        ));
    }

    for pattern in &config.safety.extra_patterns {
        if let Err(e) = regex::Regex::new(pattern) {
            return Err(invalid("safety.extra_patterns", &e.to_string()));
        }
    }

    if config.logging.level.trim().is_empty() {
        return Err(invalid("logging.level", "Log level cannot be empty"));
    }

    Ok(())
}

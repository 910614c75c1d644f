//! Error types and Result aliases for shellpilot

use std::fmt;
use std::path::PathBuf;

/// Result type alias for shellpilot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for shellpilot
#[derive(Debug)]
pub enum Error {
    // === Connect errors ===
    /// The remote-access client binary is not on PATH
    ClientNotFound {
        program: String,
    },

    /// Password authentication requested but the password helper is missing
    PasswordHelperMissing {
        program: String,
    },

    /// The OS refused to start the client
    PermissionDenied {
        program: String,
        reason: String,
    },

    /// Spawning the client failed for another reason
    SpawnFailed {
        program: String,
        reason: String,
    },

    /// The client started but exited before the session became usable
    ConnectFailed {
        host: String,
        exit_status: Option<i32>,
        output_excerpt: String,
    },

    // === Session errors ===
    /// No live session to talk to
    NotConnected,

    /// Remote process exited
    SessionTerminated {
        exit_status: Option<i32>,
    },

    /// Writing to the session input failed
    SendFailed {
        reason: String,
    },

    /// Delivering a signal to the client process failed
    SignalFailed {
        signal: String,
        reason: String,
    },

    // === Execution errors ===
    /// Plan failed validation
    InvalidPlan {
        reason: String,
    },

    /// Another plan is already running on this executor
    PlanAlreadyRunning,

    // === Interactive controller errors ===
    /// `confirm` called without a pending command
    NoPendingConfirmation,

    /// A new plan request was issued while a command awaits confirmation
    ConfirmationPending {
        command: String,
    },

    /// Operation not valid in the controller's current state
    InvalidControllerState {
        operation: String,
        state: String,
    },

    /// The external planner failed
    Planner {
        reason: String,
    },

    // === Configuration errors ===
    /// Failed to load configuration file
    ConfigLoadFailed {
        path: PathBuf,
        reason: String,
    },

    /// Failed to save configuration file
    ConfigSaveFailed {
        path: PathBuf,
        reason: String,
    },

    /// Configuration file not found
    ConfigNotFound,

    /// Configuration validation failed
    ConfigValidationFailed {
        field: String,
        reason: String,
    },

    /// Failed to serialize configuration
    ConfigSerializationFailed {
        format: String,
        reason: String,
    },

    /// Failed to parse configuration
    ConfigParseFailed {
        format: String,
        reason: String,
    },

    /// Failed to load a plan file
    PlanLoadFailed {
        path: PathBuf,
        reason: String,
    },

    // === I/O and serialization errors ===
    /// I/O errors
    Io(std::io::Error),

    /// Serialization errors
    Serde(serde_json::Error),

    /// TOML parsing errors
    Toml(toml::de::Error),

    /// Regex compilation errors
    Regex(regex::Error),

    // === Generic fallback (use sparingly) ===
    /// Generic errors (for cases not yet categorized)
    Other(String),
}

impl Error {
    /// True for the errors `connect` can return before a session exists
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Error::ClientNotFound { .. }
                | Error::PasswordHelperMissing { .. }
                | Error::PermissionDenied { .. }
                | Error::SpawnFailed { .. }
                | Error::ConnectFailed { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Connect errors
            Error::ClientNotFound { program } => {
                write!(f, "Remote access client '{}' not found in PATH", program)
            }
            Error::PasswordHelperMissing { program } => {
                write!(
                    f,
                    "Password authentication requires '{}', which was not found in PATH",
                    program
                )
            }
            Error::PermissionDenied { program, reason } => {
                write!(f, "Permission denied starting '{}': {}", program, reason)
            }
            Error::SpawnFailed { program, reason } => {
                write!(f, "Failed to spawn '{}': {}", program, reason)
            }
            Error::ConnectFailed {
                host,
                exit_status,
                output_excerpt,
            } => {
                let status = exit_status.map_or("unknown".to_string(), |c| c.to_string());
                write!(
                    f,
                    "Connection to '{}' failed (exit status {}): {}",
                    host, status, output_excerpt
                )
            }

            // Session errors
            Error::NotConnected => write!(f, "Shell session is not connected"),
            Error::SessionTerminated { exit_status } => match exit_status {
                Some(code) => write!(f, "Remote session terminated with exit status {}", code),
                None => write!(f, "Remote session terminated"),
            },
            Error::SendFailed { reason } => {
                write!(f, "Failed to send input to session: {}", reason)
            }
            Error::SignalFailed { signal, reason } => {
                write!(f, "Failed to send {} to client process: {}", signal, reason)
            }

            // Execution errors
            Error::InvalidPlan { reason } => write!(f, "Invalid plan: {}", reason),
            Error::PlanAlreadyRunning => {
                write!(f, "A plan is already running on this executor")
            }

            // Interactive controller errors
            Error::NoPendingConfirmation => write!(f, "No command is awaiting confirmation"),
            Error::ConfirmationPending { command } => {
                write!(f, "Command '{}' is still awaiting confirmation", command)
            }
            Error::InvalidControllerState { operation, state } => {
                write!(f, "Cannot {} while controller is {}", operation, state)
            }
            Error::Planner { reason } => write!(f, "Planner error: {}", reason),

            // Configuration errors
            Error::ConfigLoadFailed { path, reason } => {
                write!(f, "Failed to load config from '{}': {}", path.display(), reason)
            }
            Error::ConfigSaveFailed { path, reason } => {
                write!(f, "Failed to save config to '{}': {}", path.display(), reason)
            }
            Error::ConfigNotFound => write!(f, "Configuration file not found"),
            Error::ConfigValidationFailed { field, reason } => {
                write!(f, "Configuration validation failed for '{}': {}", field, reason)
            }
            Error::ConfigSerializationFailed { format, reason } => {
                write!(f, "Failed to serialize config as {}: {}", format, reason)
            }
            Error::ConfigParseFailed { format, reason } => {
                write!(f, "Failed to parse {} config: {}", format, reason)
            }
            Error::PlanLoadFailed { path, reason } => {
                write!(f, "Failed to load plan from '{}': {}", path.display(), reason)
            }

            // I/O and serialization errors
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serde(err) => write!(f, "Serialization error: {}", err),
            Error::Toml(err) => write!(f, "TOML parsing error: {}", err),
            Error::Regex(err) => write!(f, "Regex compilation error: {}", err),

            // Generic fallback
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Serde(err) => Some(err),
            Error::Toml(err) => Some(err),
            Error::Regex(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Toml(err)
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Regex(err)
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

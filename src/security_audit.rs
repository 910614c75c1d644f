//! Security Audit Logging
//!
//! Audit trail for connection lifecycle and command-safety decisions.
//!
//! ## Security Policy
//!
//! - **NEVER** log passwords, passphrases, or credentials
//! - Hosts and commands are sanitized before they reach the log line
//! - INFO for normal events, WARN for dangerous commands and denied confirmations
//!
//! ## Events Logged
//!
//! - Connection attempts (host and auth kind only)
//! - Session start/end
//! - Dangerous commands flagged by the safety classifier
//! - Confirmation granted/denied in interactive mode
//! - Configuration loads/errors

use tracing::{info, warn};

/// Security audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Remote session requested
    ConnectionAttempt,
    /// Remote shell became ready
    SessionStart,
    /// Remote shell went away
    SessionEnd,
    /// Safety classifier matched a command
    DangerousCommandFlagged,
    /// A pending command was confirmed by the operator
    ConfirmationGranted,
    /// A pending command was rejected by the operator
    ConfirmationDenied,
    /// Configuration file loaded
    ConfigLoaded,
    /// Configuration file error
    ConfigError,
}

impl SecurityEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> &'static str {
        match self {
            SecurityEvent::ConnectionAttempt => "Remote connection initiated",
            SecurityEvent::SessionStart => "Remote session established",
            SecurityEvent::SessionEnd => "Remote session terminated",
            SecurityEvent::DangerousCommandFlagged => "Dangerous command flagged",
            SecurityEvent::ConfirmationGranted => "Command confirmed by operator",
            SecurityEvent::ConfirmationDenied => "Command rejected by operator",
            SecurityEvent::ConfigLoaded => "Configuration loaded successfully",
            SecurityEvent::ConfigError => "Configuration loading error",
        }
    }

    /// Events that warrant WARN level
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            SecurityEvent::DangerousCommandFlagged | SecurityEvent::ConfirmationDenied
        )
    }
}

/// Log a security audit event
///
/// Never pass sensitive data as metadata. Hostnames, counts, exit codes and
/// sanitized command text only.
///
/// ```
/// use shellpilot::security_audit::{log_security_event, SecurityEvent};
///
/// log_security_event(SecurityEvent::ConnectionAttempt, Some("host=example.com"));
/// ```
pub fn log_security_event(event: SecurityEvent, metadata: Option<&str>) {
    let event_desc = event.description();

    let log_message = if let Some(meta) = metadata {
        format!("SECURITY AUDIT: {} | {}", event_desc, meta)
    } else {
        format!("SECURITY AUDIT: {}", event_desc)
    };

    if event.is_suspicious() {
        warn!("{}", log_message);
    } else {
        info!("{}", log_message);
    }
}

/// Log a connection attempt (host and auth kind, no credentials)
pub fn log_connection_attempt(host: &str, auth_kind: &str) {
    log_security_event(
        SecurityEvent::ConnectionAttempt,
        Some(&format!(
            "host={} auth={}",
            sanitize_hostname(host),
            sanitize_command(auth_kind)
        )),
    );
}

/// Log session start
pub fn log_session_start(host: &str) {
    log_security_event(
        SecurityEvent::SessionStart,
        Some(&format!("host={}", sanitize_hostname(host))),
    );
}

/// Log session end
pub fn log_session_end(host: &str, exit_status: Option<i32>, duration_secs: u64) {
    let status = exit_status.map_or("unknown".to_string(), |c| c.to_string());
    log_security_event(
        SecurityEvent::SessionEnd,
        Some(&format!(
            "host={} exit_status={} duration={}s",
            sanitize_hostname(host),
            status,
            duration_secs
        )),
    );
}

/// Log a command flagged by the safety classifier
pub fn log_dangerous_command(command: &str, reason: &str) {
    log_security_event(
        SecurityEvent::DangerousCommandFlagged,
        Some(&format!(
            "reason=\"{}\" command=\"{}\"",
            reason,
            sanitize_command(command)
        )),
    );
}

/// Log an operator decision on a pending command
pub fn log_confirmation(command: &str, granted: bool) {
    let event = if granted {
        SecurityEvent::ConfirmationGranted
    } else {
        SecurityEvent::ConfirmationDenied
    };
    log_security_event(
        event,
        Some(&format!("command=\"{}\"", sanitize_command(command))),
    );
}

/// Log configuration events
pub fn log_config_event(is_error: bool, details: Option<&str>) {
    let event = if is_error {
        SecurityEvent::ConfigError
    } else {
        SecurityEvent::ConfigLoaded
    };
    log_security_event(event, details);
}

/// Sanitize hostname to prevent log injection
fn sanitize_hostname(host: &str) -> String {
    host.chars()
        .filter(|c| c.is_alphanumeric() || *c == '.' || *c == '-' || *c == '@' || *c == ':')
        .take(100)
        .collect()
}

/// Flatten a command to one printable line
fn sanitize_command(command: &str) -> String {
    command
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .filter(|c| *c != '"')
        .take(200)
        .collect()
}

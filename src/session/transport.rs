//! Session transports
//!
//! A transport knows how to build the client process for a session. The
//! session owns stdio wiring, lifecycle and teardown; the transport only picks
//! the program, its arguments and environment.
//!
//! Host-key checking is disabled for SSH sessions: sessions are opened
//! unattended and an interactive host-key question would hang the connect.
//! This trusts the network path to the host.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::models::{AuthMethod, ConnectionTarget};

/// Environment variable the password helper reads (`sshpass -e`)
const PASSWORD_ENV: &str = "SSHPASS";

/// Builds the client process for a session
pub trait Transport: Send + Sync + fmt::Debug {
    /// Program reported in spawn errors
    fn program(&self) -> String;

    /// Host reported in connect errors and audit lines
    fn host(&self) -> String;

    /// Auth kind for audit lines
    fn auth_kind(&self) -> &'static str;

    /// Resolve binaries and build the command (stdio is wired by the session)
    fn command(&self) -> Result<Command>;
}

/// SSH client options used by [`SshTransport`]
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub ssh_binary: String,
    pub password_helper: String,
    pub server_alive_interval_secs: u64,
    pub extra_options: Vec<String>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SshOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            ssh_binary: config.ssh_binary.clone(),
            password_helper: config.password_helper.clone(),
            server_alive_interval_secs: config.server_alive_interval_secs,
            extra_options: config.extra_ssh_options.clone(),
        }
    }
}

/// Remote shell through the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshTransport {
    target: ConnectionTarget,
    options: SshOptions,
}

impl SshTransport {
    pub fn new(target: ConnectionTarget, options: SshOptions) -> Self {
        Self { target, options }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Arguments passed to `ssh` (never contains the password)
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-tt".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.options.server_alive_interval_secs),
        ];

        if self.target.port != crate::models::target::DEFAULT_PORT {
            args.push("-p".to_string());
            args.push(self.target.port.to_string());
        }

        match &self.target.auth {
            AuthMethod::PrivateKey { path } => {
                args.push("-i".to_string());
                args.push(path.display().to_string());
                args.push("-o".to_string());
                args.push("IdentitiesOnly=yes".to_string());
            }
            AuthMethod::Password { .. } => {
                args.push("-o".to_string());
                args.push("PreferredAuthentications=password,keyboard-interactive".to_string());
                args.push("-o".to_string());
                args.push("PubkeyAuthentication=no".to_string());
            }
            AuthMethod::Agent => {}
        }

        args.extend(self.options.extra_options.iter().cloned());
        args.push(self.target.destination());
        args
    }
}

impl Transport for SshTransport {
    fn program(&self) -> String {
        match self.target.auth {
            AuthMethod::Password { .. } => self.options.password_helper.clone(),
            _ => self.options.ssh_binary.clone(),
        }
    }

    fn host(&self) -> String {
        self.target.host.clone()
    }

    fn auth_kind(&self) -> &'static str {
        self.target.auth.kind()
    }

    fn command(&self) -> Result<Command> {
        let ssh = find_command(&self.options.ssh_binary).ok_or_else(|| Error::ClientNotFound {
            program: self.options.ssh_binary.clone(),
        })?;

        let command = match &self.target.auth {
            AuthMethod::Password { secret } => {
                let helper = find_command(&self.options.password_helper).ok_or_else(|| {
                    Error::PasswordHelperMissing {
                        program: self.options.password_helper.clone(),
                    }
                })?;
                let mut command = Command::new(helper);
                command
                    .arg("-e")
                    .arg(ssh)
                    .args(self.ssh_args())
                    .env(PASSWORD_ENV, secret.as_str());
                command
            }
            _ => {
                let mut command = Command::new(ssh);
                command.args(self.ssh_args());
                command
            }
        };

        debug!(
            "Built ssh command for {} (auth={})",
            self.target,
            self.target.auth.kind()
        );
        Ok(command)
    }
}

/// Local interactive shell, for dry runs and tests
#[derive(Debug, Clone)]
pub struct LocalShellTransport {
    shell: PathBuf,
}

impl LocalShellTransport {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for LocalShellTransport {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

impl Transport for LocalShellTransport {
    fn program(&self) -> String {
        self.shell.display().to_string()
    }

    fn host(&self) -> String {
        "localhost".to_string()
    }

    fn auth_kind(&self) -> &'static str {
        "local"
    }

    fn command(&self) -> Result<Command> {
        let shell = find_command(&self.shell.to_string_lossy()).ok_or_else(|| {
            Error::ClientNotFound {
                program: self.program(),
            }
        })?;

        let mut command = Command::new(shell);
        command
            .arg("-i")
            .env("PS1", "$ ")
            .env("PS2", "> ")
            .env_remove("ENV")
            .env_remove("PROMPT_COMMAND");
        Ok(command)
    }
}

/// Resolve `program` against `PATH` (or check it directly if it contains a separator)
pub fn find_command(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

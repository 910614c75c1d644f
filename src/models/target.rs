//! Connection Target Model
//!
//! Where to connect and how to authenticate.
//!
//! ## Security Note
//!
//! Passwords live in [`Zeroizing`] memory, are redacted from `Debug`, are never
//! serialized, and never appear on a command line. The SSH transport hands them
//! to the password helper through its environment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// How to authenticate against the remote host
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password fed through the password helper
    Password {
        #[serde(skip)]
        secret: Zeroizing<String>,
    },
    /// Private key file
    PrivateKey { path: PathBuf },
    /// Whatever the system client does by default (agent, config, keys)
    #[default]
    Agent,
}

impl AuthMethod {
    /// Password auth from a plain string (the copy is zeroized on drop)
    pub fn password(secret: impl Into<String>) -> Self {
        AuthMethod::Password {
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// Short label for logs and audit lines
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::Password { .. } => "password",
            AuthMethod::PrivateKey { .. } => "private_key",
            AuthMethod::Agent => "agent",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password { .. } => f.write_str("Password(<redacted>)"),
            AuthMethod::PrivateKey { path } => f.debug_tuple("PrivateKey").field(path).finish(),
            AuthMethod::Agent => f.write_str("Agent"),
        }
    }
}

/// A remote host to open a shell on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth: AuthMethod,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            auth: AuthMethod::Agent,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    /// `user@host` as passed to the client
    pub fn destination(&self) -> String {
        if self.username.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.username, self.host)
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == DEFAULT_PORT {
            write!(f, "{}", self.destination())
        } else {
            write!(f, "{}:{}", self.destination(), self.port)
        }
    }
}

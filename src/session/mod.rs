//! Remote shell sessions
//!
//! A [`ShellSession`] owns one client process (SSH or a local shell), pumps its
//! stdout and stderr into a rolling, normalized output buffer, detects when the
//! remote prompt is ready, and tears everything down in a fixed order on
//! disconnect or remote exit.
//!
//! Executors talk to sessions through [`ShellChannel`] so they can be driven by
//! a scripted double in tests.

pub mod buffer;
pub mod prompt;
pub mod shell;
pub mod signals;
pub mod transport;

pub use buffer::OutputBuffer;
pub use shell::{SessionSettings, SessionStatus, ShellSession};
pub use transport::{LocalShellTransport, SshOptions, SshTransport, Transport};

use async_trait::async_trait;

use crate::error::Result;

/// What an executor needs from a live shell
#[async_trait]
pub trait ShellChannel: Send + Sync {
    /// Write `text` followed by a newline. Does not wait for output.
    async fn send(&self, text: &str) -> Result<()>;

    /// Absolute position of the end of the output buffer
    fn output_mark(&self) -> u64;

    /// Normalized output appended since `mark`
    fn output_since(&self, mark: u64) -> String;

    /// Whether the client process is still attached
    fn is_connected(&self) -> bool;

    /// Exit status of the client once it has gone away
    fn exit_status(&self) -> Option<i32> {
        None
    }
}

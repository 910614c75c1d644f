//! Client process signals
//!
//! Used by session teardown to ask the client to exit before forcing it.

use crate::error::{Error, Result};

/// Signals the session sends to its client process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Termination signal (graceful shutdown)
    Terminate,
    /// Kill signal (forceful termination)
    Kill,
}

/// Deliver `signal` to `pid`
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    let nix_signal = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };

    debug!("Sending {:?} to pid {}", signal, pid);
    kill(Pid::from_raw(pid as i32), nix_signal).map_err(|e| Error::SignalFailed {
        signal: format!("{:?}", signal),
        reason: e.to_string(),
    })
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, signal: Signal) -> Result<()> {
    Err(Error::SignalFailed {
        signal: format!("{:?}", signal),
        reason: "signals are not supported on this platform".to_string(),
    })
}

/// Whether a process with `pid` still exists
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::unistd::Pid;
    nix::sys::signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

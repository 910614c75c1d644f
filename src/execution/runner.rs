//! Command runner
//!
//! Sends one command through a [`ShellChannel`] and waits for it to finish.
//! A remote shell gives no structured completion signal, so completion is
//! inferred in this order:
//!
//! 1. the exit marker printed after the command (when exit capture is on)
//! 2. output quiet for `stable_after` with a prompt at the tail
//! 3. the timeout
//!
//! A command that times out keeps running on the remote host; nothing here
//! interrupts it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::session::{prompt, ShellChannel};

/// Text shared by the wrapper and the marker it prints
const MARKER_PREFIX: &str = "__SHELLPILOT_EXIT_";

/// Any printed marker, including ones left behind by earlier commands.
/// The echoed wrapper shows `%s`, never digits.
static ANY_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"__SHELLPILOT_EXIT_[0-9a-f]+_\d+__").expect("exit marker pattern is valid")
});

/// Polling and completion knobs
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub poll_interval: Duration,
    pub stable_after: Duration,
    pub capture_exit_status: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from(&ExecutorConfig::default())
    }
}

impl From<&ExecutorConfig> for RunSettings {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            stable_after: Duration::from_millis(config.stable_after_ms),
            capture_exit_status: config.capture_exit_status,
        }
    }
}

/// What came back from one command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// Normalized output with marker lines removed
    pub output: String,
    pub exit_status: Option<i32>,
    pub timed_out: bool,
    /// The session went away while waiting
    pub session_lost: bool,
    pub duration: Duration,
}

/// Exit-status marker for one send.
///
/// Each send gets its own nonce, so a command that timed out and finishes
/// later cannot complete a command sent after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitMarker {
    /// `__SHELLPILOT_EXIT_<nonce>_`
    tag: String,
}

impl Default for ExitMarker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitMarker {
    /// Marker with a fresh random nonce
    pub fn new() -> Self {
        Self::with_nonce(&Uuid::new_v4().simple().to_string())
    }

    /// Marker for a known nonce (lowercase hex)
    pub fn with_nonce(nonce: &str) -> Self {
        Self {
            tag: format!("{}{}_", MARKER_PREFIX, nonce),
        }
    }

    /// Append the exit-status printer to `command`
    pub fn wrap(&self, command: &str) -> String {
        let trimmed = command.trim_end();
        let printer = format!("printf '\\n{}%s__\\n' \"$?\"", self.tag);

        if trimmed.contains('\n') || trimmed.contains('#') {
            // A trailing comment or heredoc would swallow an inline suffix
            format!("{}\n{}", trimmed, printer)
        } else if trimmed.ends_with(';') || (trimmed.ends_with('&') && !trimmed.ends_with("&&")) {
            format!("{} {}", trimmed, printer)
        } else {
            format!("{}; {}", trimmed, printer)
        }
    }

    /// The line a shell prints for exit status `code`
    pub fn line(&self, code: i32) -> String {
        format!("{}{}__", self.tag, code)
    }

    /// Exit status from this marker, if it has been printed
    pub fn find(&self, output: &str) -> Option<i32> {
        self.locate(output).map(|(_, code)| code)
    }

    /// Byte offset and status of the first printed occurrence
    fn locate(&self, output: &str) -> Option<(usize, i32)> {
        let mut from = 0;
        while let Some(pos) = output[from..].find(&self.tag) {
            let start = from + pos;
            let rest = &output[start + self.tag.len()..];
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits > 0 && rest[digits..].starts_with("__") {
                if let Ok(code) = rest[..digits].parse() {
                    return Some((start, code));
                }
            }
            from = start + self.tag.len();
        }
        None
    }
}

/// Captured output with the marker, anything after it, and echoed wrapper
/// lines removed. Without a marker, a trailing prompt line is dropped.
///
/// Output up to the last marker of an earlier command belongs to that
/// command and is dropped as well.
pub fn clean_output(raw: &str, marker: Option<&ExitMarker>) -> String {
    let body = match marker.and_then(|m| m.locate(raw)) {
        Some((start, _)) => &raw[..start],
        None if prompt::ends_with_prompt(raw) => match raw.rfind('\n') {
            Some(pos) => &raw[..pos],
            None => "",
        },
        None => raw,
    };

    let body = match ANY_MARKER.find_iter(body).last() {
        Some(stale) => {
            debug!("Dropping output left over from an earlier command");
            let after = &body[stale.end()..];
            after.split_once('\n').map_or("", |(_, rest)| rest)
        }
        None => body,
    };

    let kept: Vec<&str> = body
        .split('\n')
        .filter(|line| !line.contains(MARKER_PREFIX))
        .collect();
    kept.join("\n").trim_end_matches('\n').to_string()
}

/// Drop the terminal's echo of `wire` from the start of `output`.
///
/// Only the first echoed line is recognized; continuation lines of a
/// multi-line command stay in the output.
pub fn strip_echo(output: &str, wire: &str) -> String {
    let echoed = wire.lines().next().unwrap_or_default().trim();
    if echoed.is_empty() {
        return output.to_string();
    }
    match output.split_once('\n') {
        Some((first, rest)) if first.trim_end().ends_with(echoed) => rest.to_string(),
        None if output.trim_end().ends_with(echoed) => String::new(),
        _ => output.to_string(),
    }
}

/// Send `command` and wait for it to complete, time out, or lose the session.
///
/// Returns `Err` only when the command could not be sent.
pub async fn run_command(
    channel: &dyn ShellChannel,
    command: &str,
    limit: Duration,
    settings: &RunSettings,
) -> Result<CommandOutcome> {
    let started = Instant::now();
    let deadline = started + limit;
    let mark = channel.output_mark();

    let marker = settings.capture_exit_status.then(ExitMarker::new);
    let wire = match &marker {
        Some(marker) => marker.wrap(command),
        None => command.to_string(),
    };
    channel.send(&wire).await?;
    debug!("Command sent, waiting up to {:?}", limit);

    let finished = |raw: &str, exit_status: Option<i32>, timed_out: bool, session_lost: bool| {
        CommandOutcome {
            output: strip_echo(&clean_output(raw, marker.as_ref()), &wire),
            exit_status,
            timed_out,
            session_lost,
            duration: started.elapsed(),
        }
    };

    let mut last_len = 0usize;
    let mut last_change = Instant::now();

    loop {
        let raw = channel.output_since(mark);
        let now = Instant::now();

        if let Some(code) = marker.as_ref().and_then(|m| m.find(&raw)) {
            return Ok(finished(&raw, Some(code), false, false));
        }

        if raw.len() != last_len {
            last_len = raw.len();
            last_change = now;
        } else if now.duration_since(last_change) >= settings.stable_after
            && prompt::ends_with_prompt(&raw)
            && !waiting_on_marker(&raw, marker.as_ref())
        {
            debug!("Output stable at a prompt, treating command as complete");
            return Ok(finished(&raw, None, false, false));
        }

        if !channel.is_connected() {
            // One more read: the pumps may have appended after our last look
            let raw = channel.output_since(mark);
            let code = marker.as_ref().and_then(|m| m.find(&raw));
            return Ok(finished(&raw, code, false, code.is_none()));
        }

        if now >= deadline {
            warn!("Command did not complete within {:?}", limit);
            return Ok(finished(&raw, None, true, false));
        }

        tokio::time::sleep(settings.poll_interval.min(deadline - now)).await;
    }
}

/// The prompt at the tail follows an earlier command's marker, so ours is
/// still queued behind it
fn waiting_on_marker(raw: &str, marker: Option<&ExitMarker>) -> bool {
    marker.is_some() && ANY_MARKER.is_match(raw)
}

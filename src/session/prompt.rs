//! Remote prompt detection
//!
//! Best-effort heuristic: a shell is considered to be waiting for input when
//! the unterminated final line of its output looks like a prompt. Custom
//! prompts that don't fit (no trailing `$`/`#`/`%`/`>`) are only recognized
//! through the connect timeout fallback.

/// Longest prompt accepted without a `user@host` or `host:path` shape
const MAX_BARE_PROMPT_LEN: usize = 50;

/// Characters a prompt line may end with
const PROMPT_TERMINATORS: [char; 4] = ['$', '#', '%', '>'];

/// Whether `line` looks like a shell prompt
///
/// Common shapes: `user@host:~$ `, `[user@host dir]# `, `host:path% `, `$ `.
pub fn is_prompt_line(line: &str) -> bool {
    let candidate = line.strip_suffix(' ').unwrap_or(line);
    if candidate.trim().is_empty() {
        return false;
    }
    let Some(last) = candidate.chars().last() else {
        return false;
    };

    PROMPT_TERMINATORS.contains(&last)
        && (candidate.contains('@')
            || candidate.contains(':')
            || candidate.chars().count() < MAX_BARE_PROMPT_LEN)
}

/// Whether normalized output currently ends at a prompt.
///
/// Only the final line counts and it must not be newline-terminated: a prompt
/// echoed earlier in the output does not mean the shell is idle now.
pub fn ends_with_prompt(output: &str) -> bool {
    if output.ends_with('\n') {
        return false;
    }
    let last_line = output.rsplit('\n').next().unwrap_or(output);
    is_prompt_line(last_line)
}

/// The prompt text at the end of `output`, if any
pub fn detect_prompt(output: &str) -> Option<&str> {
    if !ends_with_prompt(output) {
        return None;
    }
    output.rsplit('\n').next()
}

//! Terminal output normalization
//!
//! Remote shells emit color codes, cursor movement, window-title updates and
//! CRLF line endings. Everything that reaches the output buffer, the criterion
//! evaluator or a log line goes through [`normalize`] first so it can be matched
//! as plain text.
//!
//! [`normalize`] is pure and idempotent. [`StreamNormalizer`] is the variant used
//! by the output pump: it holds back sequences split across reads so that
//! streaming a byte sequence in chunks yields the same text as normalizing it in
//! one go.

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest escape sequence we are willing to hold back between reads.
/// Anything longer is treated as garbage and flushed through the normalizer.
const MAX_PENDING_ESCAPE: usize = 256;

/// Every escape sequence family we strip, in one alternation:
/// CSI, OSC (BEL or ST terminated), DCS/SOS/PM/APC strings, charset
/// designation, keypad modes, and the remaining two-byte ESC sequences.
/// The 8-bit C1 CSI introducer is handled as well.
static ESCAPE_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-?]*[ -/]*[@-~]",
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        r"|\x1b[PX^_][^\x1b]*\x1b\\",
        r"|\x1b[()*+][0-9A-Za-z]",
        r"|\x1b[@-Z\\-_=>78]",
        r"|\x{9b}[0-?]*[ -/]*[@-~]",
    ))
    .expect("escape sequence pattern is valid")
});

/// Strip terminal control sequences and canonicalize line endings.
///
/// The result never contains ESC, C1 controls, or carriage returns, so
/// `normalize(normalize(x).as_bytes()) == normalize(x)`.
pub fn normalize(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    normalize_str(&text)
}

/// [`normalize`] for input that is already text
pub fn normalize_str(text: &str) -> String {
    let stripped = ESCAPE_SEQUENCE.replace_all(text, "");
    let unified = stripped.replace("\r\n", "\n").replace('\r', "\n");

    unified
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect()
}

/// Last `max_chars` characters of `text`, prefixed with an ellipsis when cut.
///
/// Used for error messages and terminal errors that need to carry a readable
/// slice of the remote output.
pub fn tail_excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim_end();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - max_chars).collect();
    format!("…{}", tail)
}

/// Chunk-aware normalizer used by the session output pump
#[derive(Debug, Default)]
pub struct StreamNormalizer {
    /// Bytes held back from the previous chunk
    pending: Vec<u8>,
}

impl StreamNormalizer {
    /// Create a new stream normalizer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the text that is safe to emit now
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let cut = pending_tail_start(&self.pending);
        let ready: Vec<u8> = self.pending.drain(..cut).collect();
        normalize(&ready)
    }

    /// Flush whatever was held back (end of stream)
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        normalize(&rest)
    }

    /// Number of bytes currently held back
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Index where the incomplete tail of `buf` begins (`buf.len()` if none).
fn pending_tail_start(buf: &[u8]) -> usize {
    let mut cut = buf.len();

    if let Some(pos) = buf.iter().rposition(|&b| b == 0x1b) {
        if buf.len() - pos <= MAX_PENDING_ESCAPE && !escape_complete(&buf[pos..]) {
            cut = pos;
        }
    }

    // A CR followed only by escape sequences might still pair with a later LF
    if let Some(cr) = buf[..cut].iter().rposition(|&b| b == b'\r') {
        if cut - cr <= MAX_PENDING_ESCAPE && only_escapes(&buf[cr + 1..cut]) {
            cut = cr;
        }
    }

    if let Some(start) = incomplete_utf8_start(&buf[..cut]) {
        cut = start;
    }

    cut
}

/// Whether `bytes` consists of nothing but complete escape sequences
fn only_escapes(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return true;
    }
    if bytes[0] != 0x1b {
        return false;
    }
    let text = String::from_utf8_lossy(bytes);
    ESCAPE_SEQUENCE.replace_all(&text, "").is_empty()
}

/// Whether the escape sequence starting at `seq[0]` is terminated within `seq`
fn escape_complete(seq: &[u8]) -> bool {
    if seq.len() < 2 {
        return false;
    }
    match seq[1] {
        b'[' => seq[2..].iter().any(|b| (0x40..=0x7e).contains(b)),
        b']' => {
            seq[2..].contains(&0x07) || seq[2..].windows(2).any(|w| w == [0x1b, b'\\'])
        }
        b'P' | b'X' | b'^' | b'_' => seq[2..].windows(2).any(|w| w == [0x1b, b'\\']),
        b'(' | b')' | b'*' | b'+' => seq.len() >= 3,
        _ => true,
    }
}

/// Start of a truncated UTF-8 code point at the end of `buf`, if any
fn incomplete_utf8_start(buf: &[u8]) -> Option<usize> {
    let len = buf.len();
    for back in 1..=len.min(3) {
        let i = len - back;
        let b = buf[i];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let needed = match b {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { Some(i) } else { None };
    }
    None
}

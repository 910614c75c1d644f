//! Rolling output buffer
//!
//! Holds the normalized session output. Readers address it with absolute
//! offsets (total characters ever appended), so a mark taken before sending a
//! command stays valid after older text has been dropped.

/// Bounded text buffer with absolute offsets
#[derive(Debug)]
pub struct OutputBuffer {
    text: String,
    /// Characters dropped from the front so far
    dropped: u64,
    /// Characters currently held
    held: u64,
    max_bytes: usize,
    /// When text was last appended
    last_append: Option<std::time::Instant>,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            text: String::new(),
            dropped: 0,
            held: 0,
            max_bytes: max_bytes.max(1),
            last_append: None,
        }
    }

    /// Append normalized text, trimming the front if over capacity
    pub fn append(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.text.push_str(chunk);
        self.held += chunk.chars().count() as u64;
        self.last_append = Some(std::time::Instant::now());

        if self.text.len() > self.max_bytes {
            let excess = self.text.len() - self.max_bytes;
            let mut cut = excess;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            let removed = self.text[..cut].chars().count() as u64;
            self.text.drain(..cut);
            self.dropped += removed;
            self.held -= removed;
        }
    }

    /// Absolute offset of the end of the buffer
    pub fn mark(&self) -> u64 {
        self.dropped + self.held
    }

    /// Text appended since `mark`. If part of it was already dropped, returns
    /// whatever is still held.
    pub fn since(&self, mark: u64) -> String {
        if mark <= self.dropped {
            return self.text.clone();
        }
        let skip = (mark - self.dropped) as usize;
        self.text.chars().skip(skip).collect()
    }

    /// Everything currently held
    pub fn contents(&self) -> &str {
        &self.text
    }

    /// Final line (text after the last newline)
    pub fn last_line(&self) -> &str {
        match self.text.rfind('\n') {
            Some(pos) => &self.text[pos + 1..],
            None => &self.text,
        }
    }

    /// Time since the last non-empty append
    pub fn idle_for(&self) -> Option<std::time::Duration> {
        self.last_append.map(|at| at.elapsed())
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

//! Criterion Model
//!
//! A single checkable condition over a command's captured output and exit
//! status. Used both as a per-step success/failure condition and as a plan-wide
//! condition over the combined output.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a criterion checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CriterionKind {
    /// Exit status equals `code`
    ExitCode { code: i32 },
    /// Output contains `text`
    Contains { text: String },
    /// Output matches the regular expression `pattern`
    Matches { pattern: String },
    /// Output does not contain `text`
    NotContains { text: String },
    /// The command hit its timeout
    TimedOut,
}

/// A described condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    /// Human-readable description, reported when this criterion decides a step
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: CriterionKind,
}

impl Criterion {
    pub fn new(description: impl Into<String>, kind: CriterionKind) -> Self {
        Self {
            description: description.into(),
            kind,
        }
    }

    pub fn exit_code(code: i32) -> Self {
        Self::new(format!("exit status is {}", code), CriterionKind::ExitCode { code })
    }

    pub fn contains(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(
            format!("output contains '{}'", text),
            CriterionKind::Contains { text },
        )
    }

    pub fn not_contains(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(
            format!("output does not contain '{}'", text),
            CriterionKind::NotContains { text },
        )
    }

    pub fn matches(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        Self::new(
            format!("output matches /{}/", pattern),
            CriterionKind::Matches { pattern },
        )
    }

    pub fn timed_out() -> Self {
        Self::new("command timed out", CriterionKind::TimedOut)
    }

    /// Whether the criterion holds.
    ///
    /// `None` means it cannot be decided from what was captured: an exit-code
    /// check without an exit status, or a pattern that does not compile.
    pub fn holds(&self, output: &str, exit_status: Option<i32>, timed_out: bool) -> Option<bool> {
        match &self.kind {
            CriterionKind::ExitCode { code } => exit_status.map(|status| status == *code),
            CriterionKind::Contains { text } => Some(output.contains(text.as_str())),
            CriterionKind::NotContains { text } => Some(!output.contains(text.as_str())),
            CriterionKind::Matches { pattern } => match Regex::new(pattern) {
                Ok(regex) => Some(regex.is_match(output)),
                Err(e) => {
                    warn!("Criterion pattern '{}' does not compile: {}", pattern, e);
                    None
                }
            },
            CriterionKind::TimedOut => Some(timed_out),
        }
    }

    /// Compile check for regex criteria
    pub fn validate(&self) -> std::result::Result<(), regex::Error> {
        if let CriterionKind::Matches { pattern } = &self.kind {
            Regex::new(pattern)?;
        }
        Ok(())
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.description.is_empty() {
            return f.write_str(&self.description);
        }
        match &self.kind {
            CriterionKind::ExitCode { code } => write!(f, "exit status is {}", code),
            CriterionKind::Contains { text } => write!(f, "output contains '{}'", text),
            CriterionKind::NotContains { text } => write!(f, "output does not contain '{}'", text),
            CriterionKind::Matches { pattern } => write!(f, "output matches /{}/", pattern),
            CriterionKind::TimedOut => f.write_str("command timed out"),
        }
    }
}

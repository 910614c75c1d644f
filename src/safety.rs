//! Command safety classification
//!
//! Rule-based, conservative detection of destructive shell commands. A match
//! never blocks anything on its own: it only routes the command through the
//! confirmation gate (interactive mode) or gets logged and audited (batch mode).
//!
//! False positives are acceptable, false negatives are not. Extend
//! [`DANGER_RULES`] whenever a new destructive utility shows up.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Outcome of classifying a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SafetyVerdict {
    /// No rule matched
    Safe,
    /// At least one rule matched; `reason` names the first one
    Dangerous { reason: String },
}

impl SafetyVerdict {
    /// Whether the command needs explicit confirmation
    pub fn is_dangerous(&self) -> bool {
        matches!(self, SafetyVerdict::Dangerous { .. })
    }

    /// The matched rule, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            SafetyVerdict::Safe => None,
            SafetyVerdict::Dangerous { reason } => Some(reason),
        }
    }
}

/// Built-in danger rules: (pattern, reason)
const DANGER_RULES: &[(&str, &str)] = &[
    // Recursive deletion of root, home, cwd, a glob, or a top-level directory
    (
        r#"\brm\s+(?:-{1,2}[\w-]+\s+)*(?:-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)(?:\s+-{1,2}[\w-]+)*\s+(?:--\s+)?["']?(?:/|/\*|~/?\*?|\*|\.{1,2}/?\*?|\$HOME/?\*?|/[^/\s;&|"']+/?\*?)["']?(?:\s|;|&|\||$)"#,
        "Recursive deletion of a root-adjacent path",
    ),
    (
        r#"\brm\s+(?:[^;&|]*\s)?(?:-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)\b[^;&|]*\s["']?/(?:etc|var|usr|home|boot|lib\w*|opt|srv|root|bin|sbin)\b"#,
        "Recursive deletion under a system directory",
    ),
    (r"--no-preserve-root", "Deletion with root protection disabled"),
    // Filesystem creation and partitioning
    (r"\bmkfs(?:\.\w+)?\b", "Filesystem formatting"),
    (r"\b(?:mke2fs|mkswap|wipefs)\b", "Filesystem or signature wipe"),
    (r"\b(?:fdisk|sfdisk|cfdisk|gdisk|sgdisk|parted)\b", "Disk partitioning"),
    // Raw device writes
    (r"\bdd\b[^;&|]*\bof=/dev/", "Direct disk write"),
    (
        r">\s*/dev/(?:sd|hd|vd|xvd|nvme|mmcblk|disk|md|dm-)",
        "Redirect into a block device",
    ),
    (r"\bshred\b", "Secure file destruction"),
    // Process-level hazards
    (r":\(\)\s*\{", "Fork bomb pattern"),
    // Any function whose body pipes into a backgrounded job
    (
        r"(?:^|[\s;&|])[^\s(){};|&]+\s*\(\)\s*\{[^}]*\|[^}]*&",
        "Fork bomb pattern",
    ),
    (
        r"\bfunction\s+[^\s(){};|&]+\s*(?:\(\)\s*)?\{[^}]*\|[^}]*&",
        "Fork bomb pattern",
    ),
    (r"\bkill\s+-(?:9|KILL|SIGKILL)\s+(?:-1|1)\b", "Killing all processes or init"),
    (r"\bkillall5\b", "Killing all processes"),
    // Power state
    (r"\b(?:shutdown|reboot|halt|poweroff)\b", "Host power state change"),
    (r"\binit\s+[06]\b", "Runlevel change to halt or reboot"),
    (r"\bsystemctl\s+(?:poweroff|reboot|halt|kexec)\b", "Host power state change"),
    // Permissions and ownership on the root filesystem
    (
        r"\bchmod\s+(?:-[a-zA-Z]+\s+)*(?:0?777|0?666|a\+rwx)\s+/",
        "Dangerous permissions on root",
    ),
    (
        r"\bchown\s+(?:-[a-zA-Z]*R[a-zA-Z]*|--recursive)\s+\S+\s+/(?:\s|$)",
        "Recursive ownership change of root",
    ),
    (
        r#"\bch(?:mod|own|grp)\s+(?:\S+\s+)*?(?:-[a-zA-Z]*R[a-zA-Z]*|--recursive)\b[^;&|]*\s["']?/(?:[^/\s;&|"']+/?)?["']?(?:\s|;|&|\||$)"#,
        "Recursive permission change on root or a top-level directory",
    ),
    (
        r#"\bmv\s+(?:-{1,2}[\w-]+\s+)*["']?/(?:[^/\s;&|"']+)?/?["']?(?:\s|;|&|\||$)"#,
        "Moving root or a top-level directory",
    ),
    // Remote code execution
    (r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|k|da)?sh\b", "Piping a download to a shell"),
    // Credential and account databases
    (r">\s*/etc/(?:passwd|shadow|group|sudoers)\b", "Overwriting an account database"),
    (r">\s*/etc/\S", "Redirect into a system configuration file"),
    (r"\btee\s+(?:-a\s+)?/etc/\S", "Redirect into a system configuration file"),
    (r"\b(?:userdel|deluser)\b", "Deleting a user account"),
    (r"\bpasswd\s+-d\b", "Removing a user password"),
    // Privilege escalation combined with destructive verbs
    (
        r"\b(?:sudo|doas|su\s+-c)\b[^;]*\b(?:rm|dd|mkfs|chmod|chown|truncate|kill|killall|pkill|userdel|iptables|systemctl)\b",
        "Privilege escalation with a destructive command",
    ),
    // Service and network state
    (r"\biptables\s+(?:-F|--flush)\b", "Flushing firewall rules"),
    (r"\bnft\s+flush\s+ruleset\b", "Flushing firewall rules"),
    (r"\bcrontab\s+-r\b", "Removing all cron jobs"),
    // Bulk deletion
    (r"\bfind\b[^;&|]*\s-delete\b", "Bulk deletion via find"),
    (r"\bfind\b[^;&|]*-exec\s+rm\b", "Bulk deletion via find"),
    (r"\btruncate\s+(?:-s\s*0|--size[= ]0)\s+/", "Truncating a system file"),
    (r"(?i)\bdrop\s+(?:database|schema|table)\b", "Dropping a database object"),
];

static BUILTIN_RULES: Lazy<Vec<DangerRule>> = Lazy::new(|| {
    DANGER_RULES
        .iter()
        .filter_map(|(pattern, reason)| match Regex::new(pattern) {
            Ok(regex) => Some(DangerRule {
                regex,
                reason: (*reason).to_string(),
            }),
            Err(e) => {
                warn!("Failed to compile danger rule '{}': {}", pattern, e);
                None
            }
        })
        .collect()
});

#[derive(Debug, Clone)]
struct DangerRule {
    regex: Regex,
    reason: String,
}

/// Safety classifier with the built-in ruleset plus optional custom patterns
#[derive(Debug, Clone, Default)]
pub struct SafetyClassifier {
    /// User-supplied rules checked after the built-ins
    custom_rules: Vec<DangerRule>,
}

impl SafetyClassifier {
    /// Classifier with only the built-in rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier with additional patterns (e.g. from `[safety] extra_patterns`)
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut classifier = Self::new();
        for pattern in patterns {
            classifier.add_pattern(pattern.as_ref(), "Matches a configured danger pattern")?;
        }
        Ok(classifier)
    }

    /// Add a custom rule
    pub fn add_pattern(&mut self, pattern: &str, reason: &str) -> Result<()> {
        let regex = Regex::new(pattern)?;
        self.custom_rules.push(DangerRule {
            regex,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Classify a command string
    pub fn classify(&self, command: &str) -> SafetyVerdict {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return SafetyVerdict::Safe;
        }

        BUILTIN_RULES
            .iter()
            .chain(self.custom_rules.iter())
            .find(|rule| rule.regex.is_match(trimmed))
            .map_or(SafetyVerdict::Safe, |rule| SafetyVerdict::Dangerous {
                reason: rule.reason.clone(),
            })
    }

    /// Number of active rules
    pub fn rule_count(&self) -> usize {
        BUILTIN_RULES.len() + self.custom_rules.len()
    }
}

/// Classify with the built-in ruleset
pub fn classify(command: &str) -> SafetyVerdict {
    static DEFAULT: Lazy<SafetyClassifier> = Lazy::new(SafetyClassifier::new);
    DEFAULT.classify(command)
}

//! Execution Plan Model
//!
//! An ordered list of [`PlanStep`]s with plan-wide criteria and limits. Plans
//! are immutable once built; the executor only borrows them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{Criterion, CriterionKind};

fn default_step_timeout() -> u64 {
    60
}

fn default_max_total_time() -> u64 {
    600
}

/// One proposed command with its pass/fail conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub success_criteria: Vec<Criterion>,
    #[serde(default)]
    pub failure_criteria: Vec<Criterion>,
    /// Informational only, never evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default = "default_step_timeout")]
    pub timeout_secs: u64,
    /// Overrides the plan's retry budget for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            description: String::new(),
            command: command.into(),
            success_criteria: Vec::new(),
            failure_criteria: Vec::new(),
            expected_output: None,
            timeout_secs: default_step_timeout(),
            max_retries: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_success(mut self, criterion: Criterion) -> Self {
        self.success_criteria.push(criterion);
        self
    }

    pub fn with_failure(mut self, criterion: Criterion) -> Self {
        self.failure_criteria.push(criterion);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Title for display, falling back to the id
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

/// A whole plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<PlanStep>,
    /// Evaluated once over the combined output of all steps
    #[serde(default)]
    pub success_criteria: Vec<Criterion>,
    #[serde(default)]
    pub failure_criteria: Vec<Criterion>,
    #[serde(default = "default_max_total_time")]
    pub max_total_time_secs: u64,
    #[serde(default)]
    pub max_retries_per_step: u32,
}

impl ExecutionPlan {
    pub fn new(title: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            steps,
            success_criteria: Vec::new(),
            failure_criteria: Vec::new(),
            max_total_time_secs: default_max_total_time(),
            max_retries_per_step: 0,
        }
    }

    pub fn with_max_total_time(mut self, limit: Duration) -> Self {
        self.max_total_time_secs = limit.as_secs();
        self
    }

    pub fn with_max_retries_per_step(mut self, retries: u32) -> Self {
        self.max_retries_per_step = retries;
        self
    }

    pub fn with_success(mut self, criterion: Criterion) -> Self {
        self.success_criteria.push(criterion);
        self
    }

    pub fn with_failure(mut self, criterion: Criterion) -> Self {
        self.failure_criteria.push(criterion);
        self
    }

    pub fn max_total_time(&self) -> Duration {
        Duration::from_secs(self.max_total_time_secs)
    }

    /// Retry budget for `step`
    pub fn retries_for(&self, step: &PlanStep) -> u32 {
        step.max_retries.unwrap_or(self.max_retries_per_step)
    }

    /// Structural checks run before execution
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(invalid("plan has no steps"));
        }
        if self.max_total_time_secs == 0 {
            return Err(invalid("max_total_time_secs must be greater than 0"));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(invalid("every step needs a non-empty id"));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(invalid(&format!("duplicate step id '{}'", step.id)));
            }
            if step.command.trim().is_empty() {
                return Err(invalid(&format!("step '{}' has an empty command", step.id)));
            }
            if step.timeout_secs == 0 {
                return Err(invalid(&format!(
                    "step '{}' timeout must be greater than 0",
                    step.id
                )));
            }
            for criterion in step.success_criteria.iter().chain(&step.failure_criteria) {
                criterion.validate().map_err(|e| {
                    invalid(&format!("step '{}' criterion '{}': {}", step.id, criterion, e))
                })?;
            }
            if has_timeout_check(&step.success_criteria) {
                return Err(invalid(&format!(
                    "step '{}': 'timed_out' is only allowed as a failure criterion",
                    step.id
                )));
            }
        }

        for criterion in self.success_criteria.iter().chain(&self.failure_criteria) {
            criterion
                .validate()
                .map_err(|e| invalid(&format!("plan criterion '{}': {}", criterion, e)))?;
        }
        if has_timeout_check(&self.success_criteria) {
            return Err(invalid("plan: 'timed_out' is only allowed as a failure criterion"));
        }

        Ok(())
    }

    /// Load a plan from a TOML or JSON file (by extension)
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::PlanLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let plan: ExecutionPlan = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
            _ => toml::from_str(&content).map_err(|e| e.to_string()),
        }
        .map_err(|reason| Error::PlanLoadFailed {
            path: path.to_path_buf(),
            reason,
        })?;

        debug!("Loaded plan '{}' with {} steps", plan.title, plan.steps.len());
        Ok(plan)
    }
}

/// A timed-out command fails before success criteria are looked at, so a
/// `timed_out` success check could never hold
fn has_timeout_check(criteria: &[Criterion]) -> bool {
    criteria.iter().any(|c| c.kind == CriterionKind::TimedOut)
}

fn invalid(reason: &str) -> Error {
    Error::InvalidPlan {
        reason: reason.to_string(),
    }
}

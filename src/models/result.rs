//! Execution Result Models
//!
//! What the executor and the interactive controller record about each command
//! they ran, and the final verdict of a plan run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::ExecutorState;
use crate::models::PlanStep;

/// Why a step or a run did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("step '{step_id}' timed out after {timeout_secs}s: {excerpt}")]
    StepTimeout {
        step_id: String,
        timeout_secs: u64,
        excerpt: String,
    },

    #[error("{} failed criterion '{criterion}': {excerpt}", scope(.step_id))]
    CriterionFailure {
        /// `None` for plan-wide criteria
        step_id: Option<String>,
        criterion: String,
        excerpt: String,
    },

    #[error("{} could not be evaluated: {reason}", scope(.step_id))]
    Inconclusive {
        step_id: Option<String>,
        reason: String,
    },

    #[error("plan exceeded its time limit of {limit_secs}s")]
    PlanTimeout { limit_secs: u64 },

    #[error("execution cancelled")]
    Cancelled { step_id: Option<String> },

    #[error("remote session terminated{}", status_suffix(.exit_status))]
    SessionTerminated { exit_status: Option<i32> },

    #[error("failed to send step '{step_id}': {reason}")]
    SendFailed { step_id: String, reason: String },
}

fn scope(step_id: &Option<String>) -> String {
    match step_id {
        Some(id) => format!("step '{}'", id),
        None => "plan".to_string(),
    }
}

fn status_suffix(exit_status: &Option<i32>) -> String {
    exit_status.map_or(String::new(), |code| format!(" with exit status {}", code))
}

/// Outcome of one step (including all of its retries)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub command: String,
    pub success: bool,
    /// Normalized output of the last attempt
    pub output: String,
    pub exit_status: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Retries consumed beyond the first attempt
    pub retries: u32,
    pub error: Option<ExecutionError>,
    pub started_at: DateTime<Utc>,
}

impl StepResult {
    /// Result for a command that never reached the shell
    pub fn not_run(step: &PlanStep, error: ExecutionError, retries: u32) -> Self {
        Self {
            step_id: step.id.clone(),
            command: step.command.clone(),
            success: false,
            output: String::new(),
            exit_status: None,
            timed_out: false,
            duration_ms: 0,
            retries,
            error: Some(error),
            started_at: Utc::now(),
        }
    }
}

/// Final verdict of a plan run, produced exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecutionResult {
    pub success: bool,
    /// Final executor state (`Succeeded`, `Failed` or `Cancelled`)
    pub state: ExecutorState,
    pub results: Vec<StepResult>,
    pub duration_ms: u64,
    pub message: String,
    pub terminal_error: Option<ExecutionError>,
}

impl PlanExecutionResult {
    /// Number of steps that succeeded
    pub fn succeeded_steps(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

/// A command proposed by the planner, held until the operator decides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub step: PlanStep,
    /// Planner's explanation of the step
    pub note: String,
    pub dangerous: bool,
    pub danger_reason: Option<String>,
}

impl PendingConfirmation {
    pub fn command(&self) -> &str {
        &self.step.command
    }
}

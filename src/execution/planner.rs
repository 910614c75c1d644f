//! Planner boundary
//!
//! The interactive controller asks a [`Planner`] for one step at a time. The
//! planner itself (typically a language model behind an API) lives outside
//! this crate; [`ScriptedPlanner`] replays a fixed plan and backs the CLI's
//! interactive mode.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::Result;
use crate::models::{ExecutionPlan, PlanStep, StepResult};

/// What the controller knows about the remote side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteContext {
    pub host: String,
    pub username: String,
    pub working_directory: Option<String>,
    /// Tail of the most recent command output
    pub recent_output: String,
}

/// Input for one planning round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerRequest {
    pub task: String,
    pub prior_results: Vec<StepResult>,
    pub context: RemoteContext,
    /// Set when the operator rejected the previous proposal
    pub rejected_command: Option<String>,
}

/// A planner's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannerResponse {
    /// Next command to propose, with an explanation for the operator
    Step { step: PlanStep, note: String },
    /// The task is complete
    Done { summary: String },
}

/// Source of proposed steps
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_step(&self, request: PlannerRequest) -> Result<PlannerResponse>;
}

/// Replays the steps of a fixed plan, one per request.
///
/// A rejected command is simply skipped: the next request gets the following
/// step.
#[derive(Debug)]
pub struct ScriptedPlanner {
    steps: Mutex<VecDeque<PlanStep>>,
    total: usize,
}

impl ScriptedPlanner {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        let total = steps.len();
        Self {
            steps: Mutex::new(steps.into()),
            total,
        }
    }

    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        Self::new(plan.steps.clone())
    }

    /// Steps not yet proposed
    pub fn remaining(&self) -> usize {
        self.steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn next_step(&self, request: PlannerRequest) -> Result<PlannerResponse> {
        if let Some(rejected) = &request.rejected_command {
            debug!("Scripted planner skipping rejected command '{}'", rejected);
        }

        let next = self
            .steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();

        Ok(match next {
            Some(step) => {
                let note = if step.description.is_empty() {
                    step.display_title().to_string()
                } else {
                    step.description.clone()
                };
                PlannerResponse::Step { step, note }
            }
            None => {
                let succeeded = request.prior_results.iter().filter(|r| r.success).count();
                PlannerResponse::Done {
                    summary: format!(
                        "Scripted plan finished: {} of {} steps ran, {} succeeded",
                        request.prior_results.len(),
                        self.total,
                        succeeded
                    ),
                }
            }
        })
    }
}

//! Criterion evaluation
//!
//! Decides whether a captured command result satisfies a step's criteria:
//!
//! 1. a timed-out command fails
//! 2. any matching failure criterion fails (first match wins)
//! 3. every success criterion must hold; declaring none means success
//!
//! A success criterion that cannot be decided (an exit-code check with no
//! captured exit status) makes the result [`EvaluationOutcome::Inconclusive`].

use serde::{Deserialize, Serialize};

use crate::models::{Criterion, ExecutionPlan, PlanStep, StepResult};

/// Verdict for one step or a whole plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    Success,
    /// `criterion` names what decided the failure
    Failure { criterion: String },
    Inconclusive { reason: String },
}

impl EvaluationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EvaluationOutcome::Success)
    }
}

/// Evaluate one step's result
pub fn evaluate(
    step: &PlanStep,
    output: &str,
    exit_status: Option<i32>,
    timed_out: bool,
) -> EvaluationOutcome {
    if timed_out {
        return EvaluationOutcome::Failure {
            criterion: format!("completed within {}s", step.timeout_secs),
        };
    }

    evaluate_criteria(
        &step.success_criteria,
        &step.failure_criteria,
        output,
        exit_status,
    )
}

/// Evaluate the plan-wide criteria over the combined output of all steps,
/// using the last step's exit status
pub fn evaluate_global(plan: &ExecutionPlan, results: &[StepResult]) -> EvaluationOutcome {
    if plan.success_criteria.is_empty() && plan.failure_criteria.is_empty() {
        return EvaluationOutcome::Success;
    }

    let combined = combined_output(results);
    let exit_status = results.last().and_then(|r| r.exit_status);
    evaluate_criteria(
        &plan.success_criteria,
        &plan.failure_criteria,
        &combined,
        exit_status,
    )
}

/// All step outputs joined by newlines
pub fn combined_output(results: &[StepResult]) -> String {
    results
        .iter()
        .map(|r| r.output.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn evaluate_criteria(
    success: &[Criterion],
    failure: &[Criterion],
    output: &str,
    exit_status: Option<i32>,
) -> EvaluationOutcome {
    // Undecidable failure criteria count as "did not match"
    if let Some(hit) = failure
        .iter()
        .find(|c| c.holds(output, exit_status, false) == Some(true))
    {
        return EvaluationOutcome::Failure {
            criterion: hit.to_string(),
        };
    }

    let mut undecided = None;
    for criterion in success {
        match criterion.holds(output, exit_status, false) {
            Some(true) => {}
            Some(false) => {
                return EvaluationOutcome::Failure {
                    criterion: criterion.to_string(),
                }
            }
            None => {
                undecided.get_or_insert(criterion);
            }
        }
    }

    match undecided {
        Some(criterion) => EvaluationOutcome::Inconclusive {
            reason: format!("cannot decide '{}' from the captured result", criterion),
        },
        None => EvaluationOutcome::Success,
    }
}

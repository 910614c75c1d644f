//! Plan executor
//!
//! Runs an [`ExecutionPlan`] step by step over a [`ShellChannel`]:
//!
//! ```text
//! Idle ──► Running ──► AwaitingStepResult ──┬──► (next step) Running
//!                          ▲                ├──► Retrying ──┘
//!                          └────────────────┤
//!                                           └──► Succeeded | Failed | Cancelled
//! ```
//!
//! Before every attempt the executor checks the cancel flag, the plan
//! deadline and the session; right after every capture it checks the deadline
//! again. Exhausting a step's retries fails the plan and no later step runs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::evaluator::{self, EvaluationOutcome};
use super::runner::{self, CommandOutcome, RunSettings};
use crate::ansi;
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::models::{
    ExecutionError, ExecutionPlan, PlanExecutionResult, PlanStep, StepResult,
};
use crate::safety::{SafetyClassifier, SafetyVerdict};
use crate::security_audit;
use crate::session::ShellChannel;
use crate::state::Observable;

/// Characters of output carried in an error excerpt
const EXCERPT_CHARS: usize = 300;

/// Executor lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    #[default]
    Idle,
    Running,
    AwaitingStepResult,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutorState {
    /// A plan is in flight
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ExecutorState::Running | ExecutorState::AwaitingStepResult | ExecutorState::Retrying
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutorState::Succeeded | ExecutorState::Failed | ExecutorState::Cancelled
        )
    }
}

/// Observable progress of the current (or last) run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionProgress {
    pub state: ExecutorState,
    pub plan_title: String,
    /// Index of the step being worked on
    pub current_step: Option<usize>,
    pub current_step_id: Option<String>,
    /// Zero-based attempt of the current step
    pub attempt: u32,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub results: Vec<StepResult>,
}

/// Cooperative cancellation flag, checked between steps and retries
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executor knobs
#[derive(Debug, Clone, Default)]
pub struct ExecutorSettings {
    pub run: RunSettings,
    pub retry_delay: Duration,
}

impl From<&ExecutorConfig> for ExecutorSettings {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            run: RunSettings::from(config),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// How a run left the step loop
struct RunEnd {
    state: ExecutorState,
    error: Option<ExecutionError>,
}

/// Supervised, single-flight plan runner
pub struct PlanExecutor {
    channel: Arc<dyn ShellChannel>,
    classifier: SafetyClassifier,
    settings: ExecutorSettings,
    progress: Observable<ExecutionProgress>,
    cancel: CancelHandle,
}

impl PlanExecutor {
    pub fn new(channel: Arc<dyn ShellChannel>, settings: ExecutorSettings) -> Self {
        Self {
            channel,
            classifier: SafetyClassifier::new(),
            settings,
            progress: Observable::default(),
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: SafetyClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Request cancellation of the running plan
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancel.cancel();
    }

    /// Handle that cancels this executor from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn state(&self) -> ExecutorState {
        self.progress.read(|p| p.state)
    }

    pub fn progress(&self) -> ExecutionProgress {
        self.progress.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionProgress> {
        self.progress.subscribe()
    }

    /// Run `plan` to completion.
    ///
    /// `Err` only for an invalid plan or when another plan is already running;
    /// every run outcome, including failures, comes back as `Ok`.
    pub async fn execute_plan(&self, plan: &ExecutionPlan) -> Result<PlanExecutionResult> {
        plan.validate()?;

        let claimed = self.progress.transition(|p| {
            if p.state.is_active() {
                return false;
            }
            *p = ExecutionProgress {
                state: ExecutorState::Running,
                plan_title: plan.title.clone(),
                total_steps: plan.steps.len(),
                ..ExecutionProgress::default()
            };
            true
        });
        if !claimed {
            return Err(Error::PlanAlreadyRunning);
        }
        self.cancel.reset();

        info!(
            "Executing plan '{}' ({} steps, limit {}s)",
            plan.title,
            plan.steps.len(),
            plan.max_total_time_secs
        );

        let started = Instant::now();
        let mut results = Vec::with_capacity(plan.steps.len());
        let mut end = self.run_steps(plan, started, &mut results).await;

        if end.state == ExecutorState::Succeeded {
            end = match evaluator::evaluate_global(plan, &results) {
                EvaluationOutcome::Success => end,
                EvaluationOutcome::Failure { criterion } => RunEnd {
                    state: ExecutorState::Failed,
                    error: Some(ExecutionError::CriterionFailure {
                        step_id: None,
                        criterion,
                        excerpt: ansi::tail_excerpt(
                            &evaluator::combined_output(&results),
                            EXCERPT_CHARS,
                        ),
                    }),
                },
                EvaluationOutcome::Inconclusive { reason } => RunEnd {
                    state: ExecutorState::Failed,
                    error: Some(ExecutionError::Inconclusive {
                        step_id: None,
                        reason,
                    }),
                },
            };
        }

        let message = match (&end.state, &end.error) {
            (ExecutorState::Succeeded, _) => {
                format!("All {} steps succeeded", results.len())
            }
            (ExecutorState::Cancelled, _) => format!(
                "Cancelled after {} of {} steps",
                results.iter().filter(|r| r.success).count(),
                plan.steps.len()
            ),
            (_, Some(error)) => error.to_string(),
            (_, None) => "Plan failed".to_string(),
        };

        match end.state {
            ExecutorState::Succeeded => info!("Plan '{}': {}", plan.title, message),
            ExecutorState::Cancelled => warn!("Plan '{}': {}", plan.title, message),
            _ => error!("Plan '{}' failed: {}", plan.title, message),
        }

        self.progress.update(|p| {
            p.state = end.state;
            p.current_step = None;
            p.current_step_id = None;
            p.results = results.clone();
        });

        Ok(PlanExecutionResult {
            success: end.state == ExecutorState::Succeeded,
            state: end.state,
            results,
            duration_ms: started.elapsed().as_millis() as u64,
            message,
            terminal_error: end.error,
        })
    }

    async fn run_steps(
        &self,
        plan: &ExecutionPlan,
        started: Instant,
        results: &mut Vec<StepResult>,
    ) -> RunEnd {
        let limit = plan.max_total_time();
        let deadline = started + limit;

        for (index, step) in plan.steps.iter().enumerate() {
            let budget = plan.retries_for(step);
            let mut attempt = 0u32;
            let mut last: Option<StepResult> = None;

            loop {
                if let Some(end) = self.checkpoint(step, plan, started) {
                    results.extend(last.take());
                    return end;
                }

                self.progress.update(|p| {
                    p.state = if attempt == 0 {
                        ExecutorState::Running
                    } else {
                        ExecutorState::Retrying
                    };
                    p.current_step = Some(index);
                    p.current_step_id = Some(step.id.clone());
                    p.attempt = attempt;
                });

                if let SafetyVerdict::Dangerous { reason } = self.classifier.classify(&step.command) {
                    warn!("Step '{}' runs a dangerous command: {}", step.id, reason);
                    security_audit::log_dangerous_command(&step.command, &reason);
                }

                self.progress
                    .update(|p| p.state = ExecutorState::AwaitingStepResult);
                let wait = step
                    .timeout()
                    .min(deadline.saturating_duration_since(Instant::now()));
                let attempt_started = chrono::Utc::now();

                let outcome = match runner::run_command(
                    self.channel.as_ref(),
                    &step.command,
                    wait,
                    &self.settings.run,
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let error = send_error(self.channel.as_ref(), step, e);
                        results.push(StepResult::not_run(step, error.clone(), attempt));
                        return failed(error);
                    }
                };

                let mut result = step_result(step, &outcome, attempt, attempt_started);

                if started.elapsed() >= limit {
                    let error = ExecutionError::PlanTimeout {
                        limit_secs: plan.max_total_time_secs,
                    };
                    result.error = Some(error.clone());
                    results.push(result);
                    return failed(error);
                }

                if outcome.session_lost {
                    let error = ExecutionError::SessionTerminated {
                        exit_status: self.channel.exit_status(),
                    };
                    result.error = Some(error.clone());
                    results.push(result);
                    return failed(error);
                }

                match evaluator::evaluate(step, &outcome.output, outcome.exit_status, outcome.timed_out)
                {
                    EvaluationOutcome::Success => {
                        result.success = true;
                        debug!("Step '{}' succeeded on attempt {}", step.id, attempt + 1);
                        results.push(result);
                        self.progress.update(|p| {
                            p.completed_steps += 1;
                            p.results = results.clone();
                        });
                        break;
                    }
                    EvaluationOutcome::Failure { criterion } => {
                        result.error =
                            Some(failure_error(step, &outcome, criterion, wait.as_secs()));
                    }
                    EvaluationOutcome::Inconclusive { reason } => {
                        result.error = Some(ExecutionError::Inconclusive {
                            step_id: Some(step.id.clone()),
                            reason,
                        });
                    }
                }

                if attempt >= budget {
                    let error = result.error.clone();
                    results.push(result);
                    return RunEnd {
                        state: ExecutorState::Failed,
                        error,
                    };
                }

                attempt += 1;
                warn!(
                    "Step '{}' failed ({}), retry {} of {}",
                    step.id,
                    result
                        .error
                        .as_ref()
                        .map_or_else(String::new, ToString::to_string),
                    attempt,
                    budget
                );
                self.progress.update(|p| {
                    p.state = ExecutorState::Retrying;
                    p.attempt = attempt;
                });
                last = Some(result);

                let pause = self
                    .settings
                    .retry_delay
                    .min(deadline.saturating_duration_since(Instant::now()));
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
        }

        RunEnd {
            state: ExecutorState::Succeeded,
            error: None,
        }
    }

    /// Cancel flag, plan deadline and session liveness, in that order
    fn checkpoint(&self, step: &PlanStep, plan: &ExecutionPlan, started: Instant) -> Option<RunEnd> {
        if self.cancel.is_cancelled() {
            info!("Cancelled before step '{}'", step.id);
            return Some(RunEnd {
                state: ExecutorState::Cancelled,
                error: Some(ExecutionError::Cancelled {
                    step_id: Some(step.id.clone()),
                }),
            });
        }

        if started.elapsed() >= plan.max_total_time() {
            return Some(failed(ExecutionError::PlanTimeout {
                limit_secs: plan.max_total_time_secs,
            }));
        }

        if !self.channel.is_connected() {
            return Some(failed(ExecutionError::SessionTerminated {
                exit_status: self.channel.exit_status(),
            }));
        }

        None
    }
}

fn failed(error: ExecutionError) -> RunEnd {
    RunEnd {
        state: ExecutorState::Failed,
        error: Some(error),
    }
}

/// Tail of `output` carried in run errors
fn excerpt(output: &str) -> String {
    ansi::tail_excerpt(output, EXCERPT_CHARS)
}

/// Run error for a command that could not be sent
pub(crate) fn send_error(
    channel: &dyn ShellChannel,
    step: &PlanStep,
    error: Error,
) -> ExecutionError {
    match error {
        Error::NotConnected | Error::SessionTerminated { .. } => ExecutionError::SessionTerminated {
            exit_status: channel.exit_status(),
        },
        other => ExecutionError::SendFailed {
            step_id: step.id.clone(),
            reason: other.to_string(),
        },
    }
}

/// Run error for an attempt whose criteria failed
pub(crate) fn failure_error(
    step: &PlanStep,
    outcome: &CommandOutcome,
    criterion: String,
    timeout_secs: u64,
) -> ExecutionError {
    if outcome.timed_out {
        ExecutionError::StepTimeout {
            step_id: step.id.clone(),
            timeout_secs,
            excerpt: excerpt(&outcome.output),
        }
    } else {
        ExecutionError::CriterionFailure {
            step_id: Some(step.id.clone()),
            criterion,
            excerpt: excerpt(&outcome.output),
        }
    }
}

/// StepResult for a captured attempt, not yet evaluated
pub(crate) fn step_result(
    step: &PlanStep,
    outcome: &CommandOutcome,
    retries: u32,
    started_at: chrono::DateTime<chrono::Utc>,
) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        command: step.command.clone(),
        success: false,
        output: outcome.output.clone(),
        exit_status: outcome.exit_status,
        timed_out: outcome.timed_out,
        duration_ms: outcome.duration.as_millis() as u64,
        retries,
        error: None,
        started_at,
    }
}

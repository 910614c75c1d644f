//! Interactive step controller
//!
//! Drives a task one proposed command at a time. Every command the planner
//! proposes waits for an explicit operator decision:
//!
//! ```text
//! Idle ─start_task─► AwaitingPlan ─step─► AwaitingConfirmation ─confirm─► Executing
//!   ▲                  ▲    │                  │                            │
//!   │                  │    └─done─► Completed │                            │
//!   │                  └──── cancel_step ──────┘                            │
//!   │                  └────────────────────────────────────────────────────┘
//!   └─ start_task (from Completed)          stop() from anywhere ─► Stopped
//! ```
//!
//! Nothing is ever sent to the shell outside `confirm`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use super::evaluator::{self, EvaluationOutcome};
use super::executor::{failure_error, send_error, step_result};
use super::planner::{Planner, PlannerRequest, PlannerResponse, RemoteContext};
use super::runner::{self, RunSettings};
use crate::ansi;
use crate::error::{Error, Result};
use crate::models::{ExecutionError, PendingConfirmation, PlanStep, StepResult};
use crate::safety::{SafetyClassifier, SafetyVerdict};
use crate::security_audit;
use crate::session::ShellChannel;
use crate::state::Observable;

/// Characters of recent output passed to the planner
const CONTEXT_OUTPUT_CHARS: usize = 2000;

/// Controller lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    #[default]
    Idle,
    AwaitingPlan,
    AwaitingConfirmation,
    Executing,
    Completed,
    Stopped,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::AwaitingPlan => "awaiting a plan",
            ControllerState::AwaitingConfirmation => "awaiting confirmation",
            ControllerState::Executing => "executing",
            ControllerState::Completed => "completed",
            ControllerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Everything an observer needs to render the controller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerSnapshot {
    pub state: ControllerState,
    pub task: Option<String>,
    pub pending: Option<PendingConfirmation>,
    pub results: Vec<StepResult>,
    /// Commands the operator rejected, never counted as failures
    pub cancelled_commands: Vec<String>,
    /// Latest planner note, summary or error
    pub last_message: Option<String>,
}

/// Host identity reported to the planner
#[derive(Debug, Clone, Default)]
pub struct ControllerContext {
    pub host: String,
    pub username: String,
}

/// Human-in-the-loop controller over one shell channel
pub struct InteractiveController {
    channel: Arc<dyn ShellChannel>,
    planner: Arc<dyn Planner>,
    classifier: SafetyClassifier,
    settings: RunSettings,
    context: ControllerContext,
    snapshot: Observable<ControllerSnapshot>,
}

impl InteractiveController {
    pub fn new(
        channel: Arc<dyn ShellChannel>,
        planner: Arc<dyn Planner>,
        settings: RunSettings,
    ) -> Self {
        Self {
            channel,
            planner,
            classifier: SafetyClassifier::new(),
            settings,
            context: ControllerContext::default(),
            snapshot: Observable::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: SafetyClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_context(mut self, context: ControllerContext) -> Self {
        self.context = context;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.snapshot.read(|s| s.state)
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot.subscribe()
    }

    /// Command currently awaiting a decision
    pub fn pending(&self) -> Option<PendingConfirmation> {
        self.snapshot.read(|s| s.pending.clone())
    }

    /// Begin a new task and ask the planner for its first step
    pub async fn start_task(&self, description: &str) -> Result<()> {
        let mut current = ControllerState::Idle;
        let started = self.snapshot.transition(|s| {
            current = s.state;
            if !matches!(s.state, ControllerState::Idle | ControllerState::Completed) {
                return false;
            }
            *s = ControllerSnapshot {
                state: ControllerState::AwaitingPlan,
                task: Some(description.to_string()),
                ..ControllerSnapshot::default()
            };
            true
        });
        if !started {
            return Err(Error::InvalidControllerState {
                operation: "start a task".to_string(),
                state: current.to_string(),
            });
        }

        info!("Interactive task started: {}", description);
        self.plan_next(None).await
    }

    /// Run the pending command. `Ok(None)` once stopped.
    ///
    /// A planner failure after the command ran is recorded in
    /// `last_message` (the controller stays in `AwaitingPlan`); use
    /// [`request_next_step`](Self::request_next_step) to retry.
    pub async fn confirm(&self) -> Result<Option<StepResult>> {
        let mut stopped = false;
        let mut taken: Option<PendingConfirmation> = None;
        self.snapshot.transition(|s| {
            if s.state == ControllerState::Stopped {
                stopped = true;
                return false;
            }
            if s.state != ControllerState::AwaitingConfirmation {
                return false;
            }
            taken = s.pending.take();
            s.state = ControllerState::Executing;
            true
        });

        if stopped {
            debug!("Confirm ignored, controller stopped");
            return Ok(None);
        }
        let Some(pending) = taken else {
            return Err(Error::NoPendingConfirmation);
        };

        security_audit::log_confirmation(pending.command(), true);
        let result = self.run_step(&pending.step).await;

        let mut still_running = false;
        self.snapshot.update(|s| {
            s.results.push(result.clone());
            if s.state == ControllerState::Executing {
                s.state = ControllerState::AwaitingPlan;
                still_running = true;
            }
        });

        if still_running {
            if let Err(e) = self.plan_next(None).await {
                warn!("Planner failed after '{}': {}", pending.command(), e);
            }
        }
        Ok(Some(result))
    }

    /// Discard the pending command and ask the planner for an alternative.
    /// Never touches the shell. A no-op once stopped.
    pub async fn cancel_step(&self) -> Result<()> {
        let mut stopped = false;
        let mut rejected: Option<String> = None;
        self.snapshot.transition(|s| {
            if s.state == ControllerState::Stopped {
                stopped = true;
                return false;
            }
            if s.state != ControllerState::AwaitingConfirmation {
                return false;
            }
            let Some(pending) = s.pending.take() else {
                return false;
            };
            let command = pending.step.command;
            s.cancelled_commands.push(command.clone());
            s.last_message = Some(format!("Cancelled: {}", command));
            s.state = ControllerState::AwaitingPlan;
            rejected = Some(command);
            true
        });

        if stopped {
            return Ok(());
        }
        let Some(command) = rejected else {
            return Err(Error::NoPendingConfirmation);
        };

        security_audit::log_confirmation(&command, false);
        info!("Operator cancelled '{}'", command);
        if let Err(e) = self.plan_next(Some(command)).await {
            warn!("Planner failed after a cancelled step: {}", e);
        }
        Ok(())
    }

    /// Ask the planner again, e.g. after it failed
    pub async fn request_next_step(&self) -> Result<()> {
        let (state, pending) = self.snapshot.read(|s| (s.state, s.pending.clone()));
        match state {
            ControllerState::AwaitingPlan => self.plan_next(None).await,
            ControllerState::AwaitingConfirmation => Err(Error::ConfirmationPending {
                command: pending.map(|p| p.step.command).unwrap_or_default(),
            }),
            ControllerState::Stopped => Ok(()),
            other => Err(Error::InvalidControllerState {
                operation: "request the next step".to_string(),
                state: other.to_string(),
            }),
        }
    }

    /// Stop the task. Idempotent; leaves the shell session alone.
    pub fn stop(&self) {
        let changed = self.snapshot.transition(|s| {
            if s.state == ControllerState::Stopped {
                return false;
            }
            s.state = ControllerState::Stopped;
            s.pending = None;
            true
        });
        if changed {
            info!("Interactive controller stopped");
        }
    }

    /// One planning round; moves to AwaitingConfirmation or Completed
    async fn plan_next(&self, rejected_command: Option<String>) -> Result<()> {
        let request = self.snapshot.read(|s| PlannerRequest {
            task: s.task.clone().unwrap_or_default(),
            prior_results: s.results.clone(),
            context: RemoteContext {
                host: self.context.host.clone(),
                username: self.context.username.clone(),
                working_directory: None,
                recent_output: s
                    .results
                    .last()
                    .map(|r| ansi::tail_excerpt(&r.output, CONTEXT_OUTPUT_CHARS))
                    .unwrap_or_default(),
            },
            rejected_command,
        });

        let response = match self.planner.next_step(request).await {
            Ok(response) => response,
            Err(e) => {
                let reason = e.to_string();
                self.snapshot.transition(|s| {
                    if s.state != ControllerState::AwaitingPlan {
                        return false;
                    }
                    s.last_message = Some(format!("Planner error: {}", reason));
                    true
                });
                return Err(Error::Planner { reason });
            }
        };

        match response {
            PlannerResponse::Step { step, note } => {
                let verdict = self.classifier.classify(&step.command);
                if let SafetyVerdict::Dangerous { reason } = &verdict {
                    warn!("Proposed command '{}' is dangerous: {}", step.command, reason);
                    security_audit::log_dangerous_command(&step.command, reason);
                }
                let pending = PendingConfirmation {
                    step,
                    note: note.clone(),
                    dangerous: verdict.is_dangerous(),
                    danger_reason: verdict.reason().map(str::to_string),
                };
                let accepted = self.snapshot.transition(|s| {
                    if s.state != ControllerState::AwaitingPlan {
                        return false;
                    }
                    s.pending = Some(pending);
                    s.last_message = Some(note);
                    s.state = ControllerState::AwaitingConfirmation;
                    true
                });
                if !accepted {
                    debug!("Planner response discarded, controller moved on");
                }
            }
            PlannerResponse::Done { summary } => {
                info!("Interactive task complete: {}", summary);
                self.snapshot.transition(|s| {
                    if s.state != ControllerState::AwaitingPlan {
                        return false;
                    }
                    s.last_message = Some(summary);
                    s.state = ControllerState::Completed;
                    true
                });
            }
        }
        Ok(())
    }

    /// Run a confirmed step through the same runner and evaluator as plans
    async fn run_step(&self, step: &PlanStep) -> StepResult {
        let started_at = chrono::Utc::now();
        let outcome = match runner::run_command(
            self.channel.as_ref(),
            &step.command,
            step.timeout(),
            &self.settings,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Could not send '{}': {}", step.command, e);
                let error = send_error(self.channel.as_ref(), step, e);
                return StepResult::not_run(step, error, 0);
            }
        };

        let mut result = step_result(step, &outcome, 0, started_at);
        if outcome.session_lost {
            result.error = Some(ExecutionError::SessionTerminated {
                exit_status: self.channel.exit_status(),
            });
            return result;
        }

        match evaluator::evaluate(step, &outcome.output, outcome.exit_status, outcome.timed_out) {
            EvaluationOutcome::Success => result.success = true,
            EvaluationOutcome::Failure { criterion } => {
                result.error = Some(failure_error(step, &outcome, criterion, step.timeout_secs));
            }
            EvaluationOutcome::Inconclusive { reason } => {
                result.error = Some(ExecutionError::Inconclusive {
                    step_id: Some(step.id.clone()),
                    reason,
                });
            }
        }
        result
    }
}

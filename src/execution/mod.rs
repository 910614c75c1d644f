//! Command execution over a live shell session
//!
//! - [`runner`] sends one command and decides when it finished
//! - [`evaluator`] judges captured output against criteria
//! - [`executor`] runs whole plans with retries and time limits
//! - [`interactive`] proposes one command at a time for operator approval
//! - [`planner`] is the seam that supplies those proposals

pub mod evaluator;
pub mod executor;
pub mod interactive;
pub mod planner;
pub mod runner;

pub use evaluator::{evaluate, evaluate_global, EvaluationOutcome};
pub use executor::{
    CancelHandle, ExecutionProgress, ExecutorSettings, ExecutorState, PlanExecutor,
};
pub use interactive::{
    ControllerContext, ControllerSnapshot, ControllerState, InteractiveController,
};
pub use planner::{Planner, PlannerRequest, PlannerResponse, RemoteContext, ScriptedPlanner};
pub use runner::{run_command, CommandOutcome, RunSettings};

//! Core data models for shellpilot
//!
//! Connection targets, plans and their criteria, and the results recorded while
//! running them.

pub mod criterion;
pub mod plan;
pub mod result;
pub mod target;

// Re-exports for convenience
pub use criterion::{Criterion, CriterionKind};
pub use plan::{ExecutionPlan, PlanStep};
pub use result::{ExecutionError, PendingConfirmation, PlanExecutionResult, StepResult};
pub use target::{AuthMethod, ConnectionTarget};

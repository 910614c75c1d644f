//! Test Utilities and Mocks
//!
//! Shared helpers for the shellpilot test suites. Each test binary pulls this
//! in with `#[path = "../test_utils/mod.rs"] mod test_utils;`, so not every
//! helper is used by every binary.

#![allow(dead_code)]


// Re-exports for convenience
pub use fixtures::{fast_run_settings, fast_executor_settings, sample_plan, step};
pub use scripted_shell::{Reply, ScriptedShell};

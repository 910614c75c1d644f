//! shellpilot - supervised remote shell automation
//!
//! shellpilot keeps one interactive shell open on a remote host (through the
//! system `ssh` client) and runs commands in it on behalf of a plan or an
//! operator. Every command is screened by a safety classifier, every result is
//! judged against explicit pass/fail criteria, and the session stays alive
//! across commands so `cd`, exported variables and sourced environments carry
//! over from one step to the next.
//!
//! ## Module Organization
//!
//! ### Core Functionality
//!
//! - [`session`] - Remote shell session: spawn, readiness, output capture, teardown
//! - [`execution`] - Command runner, criterion evaluator, plan executor, interactive controller
//! - [`models`] - Plans, steps, criteria, results, connection targets
//! - [`safety`] - Dangerous command classification
//! - [`ansi`] - Escape sequence stripping and line-ending normalization
//!
//! ### Supporting Modules
//!
//! - [`config`] - TOML/JSON configuration loading and validation
//! - [`security_audit`] - Audit trail for connections and operator decisions
//! - [`state`] - Observable state cells shared with observers
//! - [`mod@error`] - Error types and Result aliases
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use shellpilot::{ConnectionTarget, ExecutionPlan, PlanExecutor, PlanStep, ShellSession};
//! use shellpilot::models::Criterion;
//!
//! # async fn run() -> shellpilot::Result<()> {
//! let config = shellpilot::init()?;
//! let target = ConnectionTarget::new("db01.example.com", "ops");
//! let session = Arc::new(ShellSession::ssh(target, &config.session));
//! session.connect().await?;
//!
//! let plan = ExecutionPlan::new(
//!     "disk check",
//!     vec![PlanStep::new("df", "df -h /").with_success(Criterion::exit_code(0))],
//! );
//! let executor = PlanExecutor::new(session.clone(), (&config.executor).into());
//! let result = executor.execute_plan(&plan).await?;
//! println!("{}", result.message);
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Session pumps:** one tokio task per output stream feeds a bounded buffer
//! - **Exit watcher:** one task owns the child and publishes its exit status
//! - **Executors:** poll the buffer through the [`session::ShellChannel`] seam
//!
//! State changes are published through `tokio::sync::watch` channels so a
//! front end can observe sessions, plans and the interactive controller
//! without holding locks.

#![allow(unexpected_cfgs)]

#[macro_use]
extern crate tracing;

pub mod ansi;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod safety;
pub mod security_audit;
pub mod session;
pub mod state;

// Re-exports for core functionality
pub use config::loader::ConfigLoader;
pub use config::Config;
pub use error::{Error, Result};
pub use execution::{
    ControllerState, ExecutorState, InteractiveController, PlanExecutor, Planner,
    ScriptedPlanner,
};
pub use models::{ConnectionTarget, ExecutionPlan, PlanExecutionResult, PlanStep, StepResult};
pub use safety::{SafetyClassifier, SafetyVerdict};
pub use session::{ShellChannel, ShellSession};

use std::path::Path;

// Version information
/// The current version of shellpilot from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The application name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// The application description from Cargo.toml
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Load configuration from the default search paths
///
/// A missing or unreadable file is not fatal: the failure is logged and the
/// built-in defaults are used.
///
/// # Examples
///
/// ```no_run
/// match shellpilot::init() {
///     Ok(config) => println!("connect timeout: {}s", config.session.connect_timeout_secs),
///     Err(e) => eprintln!("Initialization failed: {}", e),
/// }
/// ```
pub fn init() -> Result<Config> {
    info!("Initializing {} v{}", NAME, VERSION);
    let config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load configuration: {}. Using defaults", e);
            Config::default()
        }
    };
    check_environment(&config);
    Ok(config)
}

/// Load configuration from an explicit file
///
/// Unlike [`init`], a bad file here is an error: the caller asked for it.
pub fn init_with_config(path: &Path) -> Result<Config> {
    info!("Initializing {} v{} with {}", NAME, VERSION, path.display());
    let config = ConfigLoader::load_from_path(path)?;
    check_environment(&config);
    Ok(config)
}

/// Warn early about missing client binaries
fn check_environment(config: &Config) {
    if session::transport::find_command(&config.session.ssh_binary).is_none() {
        warn!(
            "'{}' not found in PATH; remote sessions will fail to start",
            config.session.ssh_binary
        );
    }
    if std::env::var("HOME").is_err() {
        warn!("HOME environment variable not set");
    }
}

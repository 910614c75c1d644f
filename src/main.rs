//! shellpilot command line
//!
//! Runs plan files against a remote host (or a local shell), steps through
//! them interactively, and exposes the safety classifier for quick checks.

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use shellpilot::execution::{ControllerContext, ControllerState, ExecutorSettings, RunSettings};
use shellpilot::models::AuthMethod;
use shellpilot::{
    Config, ConnectionTarget, ExecutionPlan, InteractiveController, PlanExecutor,
    SafetyClassifier, ScriptedPlanner, ShellSession,
};

#[derive(Debug, Parser)]
#[command(name = "shellpilot", version, about = "Supervised remote shell automation")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "SHELLPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every step of a plan file unattended
    Run {
        /// Plan file (.toml or .json)
        plan: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Walk a plan file one confirmed command at a time
    Interactive {
        /// Plan file (.toml or .json)
        plan: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        /// Task description shown to the operator
        #[arg(long)]
        task: Option<String>,
    },
    /// Report whether a command would be flagged as dangerous
    Classify {
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Validate a plan file without connecting anywhere
    CheckPlan { plan: PathBuf },
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Remote host
    #[arg(long, required_unless_present = "local")]
    host: Option<String>,
    /// Remote user (defaults to $USER)
    #[arg(long, short)]
    user: Option<String>,
    #[arg(long, short, default_value_t = shellpilot::models::target::DEFAULT_PORT)]
    port: u16,
    /// Private key file
    #[arg(long, conflicts_with = "password_env")]
    key: Option<PathBuf>,
    /// Environment variable holding the password
    #[arg(long)]
    password_env: Option<String>,
    /// Use a local shell instead of a remote host
    #[arg(long, conflicts_with = "host")]
    local: bool,
}

impl TargetArgs {
    fn session(&self, config: &Config) -> anyhow::Result<ShellSession> {
        if self.local {
            return Ok(ShellSession::local(&config.session));
        }
        let Some(host) = &self.host else {
            bail!("--host is required unless --local is given");
        };
        Ok(ShellSession::ssh(self.target(host)?, &config.session))
    }

    fn target(&self, host: &str) -> anyhow::Result<ConnectionTarget> {
        let user = match &self.user {
            Some(user) => user.clone(),
            None => env::var("USER").context("--user not given and $USER is not set")?,
        };
        let auth = if let Some(key) = &self.key {
            AuthMethod::PrivateKey { path: key.clone() }
        } else if let Some(var) = &self.password_env {
            let secret = env::var(var).with_context(|| format!("${} is not set", var))?;
            AuthMethod::password(secret)
        } else {
            AuthMethod::Agent
        };
        Ok(ConnectionTarget::new(host, user)
            .with_port(self.port)
            .with_auth(auth))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    // Logging comes up first so configuration load events are recorded
    let filter = init_logging(cli.debug);
    let config = load_configuration(cli.config.as_deref())?;
    apply_configured_level(&filter, cli.debug, &config);
    debug!("Debug mode enabled");

    match cli.command {
        Command::Run { plan, target, json } => run_plan(&config, &plan, &target, json).await,
        Command::Interactive { plan, target, task } => {
            run_interactive(&config, &plan, &target, task).await
        }
        Command::Classify { command } => Ok(classify(&config, &command.join(" "))),
        Command::CheckPlan { plan } => check_plan(&plan),
    }
}

/// Level forced from the environment or command line, if any
fn forced_level(debug: bool) -> Option<String> {
    if let Ok(filter) = env::var("RUST_LOG") {
        return Some(filter);
    }
    let debug_env = env::var("SHELLPILOT_DEBUG")
        .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    (debug || debug_env).then(|| "debug".to_string())
}

fn init_logging(debug: bool) -> reload::Handle<EnvFilter, Registry> {
    let initial = forced_level(debug).unwrap_or_else(|| "info".to_string());
    let (filter, handle) = reload::Layer::new(EnvFilter::new(initial));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
    handle
}

/// Switch to `[logging] level` unless the environment or `--debug` decided
fn apply_configured_level(
    handle: &reload::Handle<EnvFilter, Registry>,
    debug: bool,
    config: &Config,
) {
    if forced_level(debug).is_some() {
        return;
    }
    if let Err(e) = handle.reload(EnvFilter::new(&config.logging.level)) {
        warn!("Could not apply log level '{}': {}", config.logging.level, e);
    }
}

fn load_configuration(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => shellpilot::init_with_config(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(shellpilot::init()?),
    }
}

fn classifier(config: &Config) -> anyhow::Result<SafetyClassifier> {
    SafetyClassifier::with_patterns(&config.safety.extra_patterns)
        .context("compiling safety.extra_patterns")
}

fn load_plan(path: &Path) -> anyhow::Result<ExecutionPlan> {
    let plan = ExecutionPlan::load(path)?;
    plan.validate()?;
    Ok(plan)
}

async fn run_plan(
    config: &Config,
    plan_path: &Path,
    target: &TargetArgs,
    json: bool,
) -> anyhow::Result<i32> {
    let plan = load_plan(plan_path)?;
    let session = Arc::new(target.session(config)?);
    session.connect().await?;
    info!("Connected to {}", session.host());

    let executor = PlanExecutor::new(session.clone(), ExecutorSettings::from(&config.executor))
        .with_classifier(classifier(config)?);

    let cancel = executor.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling plan");
            cancel.cancel();
        }
    });

    let result = executor.execute_plan(&plan).await;
    ctrl_c.abort();
    if let Err(e) = session.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for step in &result.results {
            let mark = if step.success { "ok" } else { "FAILED" };
            println!(
                "[{}] {} ({} retries, {} ms)",
                mark, step.command, step.retries, step.duration_ms
            );
            if let Some(error) = &step.error {
                println!("      {}", error);
            }
        }
        println!("{}", result.message);
    }
    Ok(if result.success { 0 } else { 1 })
}

async fn run_interactive(
    config: &Config,
    plan_path: &Path,
    target: &TargetArgs,
    task: Option<String>,
) -> anyhow::Result<i32> {
    let plan = load_plan(plan_path)?;
    let session = Arc::new(target.session(config)?);
    session.connect().await?;

    let context = ControllerContext {
        host: session.host(),
        username: target.user.clone().unwrap_or_default(),
    };
    let controller = InteractiveController::new(
        session.clone(),
        Arc::new(ScriptedPlanner::from_plan(&plan)),
        RunSettings::from(&config.executor),
    )
    .with_classifier(classifier(config)?)
    .with_context(context);

    let outcome = operator_loop(&controller, task.unwrap_or_else(|| plan.title.clone())).await;
    controller.stop();
    if let Err(e) = session.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    outcome?;

    let snapshot = controller.snapshot();
    let failed = snapshot.results.iter().filter(|r| !r.success).count();
    println!(
        "{} command(s) run, {} failed, {} cancelled",
        snapshot.results.len(),
        failed,
        snapshot.cancelled_commands.len()
    );
    Ok(if failed == 0 { 0 } else { 1 })
}

async fn operator_loop(controller: &InteractiveController, task: String) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    controller.start_task(&task).await?;

    loop {
        match controller.state() {
            ControllerState::AwaitingConfirmation => {}
            ControllerState::Completed | ControllerState::Stopped => break,
            ControllerState::AwaitingPlan => {
                // The planner failed last round; say why and stop
                let message = controller.snapshot().last_message.unwrap_or_default();
                bail!("no next step: {}", message);
            }
            other => bail!("unexpected controller state: {}", other),
        }

        let Some(pending) = controller.pending() else {
            break;
        };
        if !pending.note.is_empty() {
            println!("# {}", pending.note);
        }
        if let Some(reason) = &pending.danger_reason {
            println!("!! DANGEROUS: {}", reason);
        }
        println!("$ {}", pending.command());
        print!("run? [y]es / [n]o / [q]uit: ");
        std::io::stdout().flush()?;

        let answer = lines.next_line().await?.unwrap_or_else(|| "q".to_string());
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => {
                if let Some(result) = controller.confirm().await? {
                    print!("{}", result.output);
                    if !result.output.ends_with('\n') && !result.output.is_empty() {
                        println!();
                    }
                    match &result.error {
                        Some(error) => println!("-> failed: {}", error),
                        None => println!("-> ok"),
                    }
                }
            }
            "n" | "no" => controller.cancel_step().await?,
            "q" | "quit" => {
                controller.stop();
                break;
            }
            other => println!("unrecognized answer '{}'", other),
        }
    }

    if let Some(message) = controller.snapshot().last_message {
        println!("{}", message);
    }
    Ok(())
}

fn classify(config: &Config, command: &str) -> i32 {
    let classifier = match classifier(config) {
        Ok(classifier) => classifier,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return 2;
        }
    };
    match classifier.classify(command) {
        shellpilot::SafetyVerdict::Safe => {
            println!("safe");
            0
        }
        shellpilot::SafetyVerdict::Dangerous { reason } => {
            println!("dangerous: {}", reason);
            1
        }
    }
}

fn check_plan(path: &Path) -> anyhow::Result<i32> {
    let plan = load_plan(path)?;
    let classifier = SafetyClassifier::new();
    println!("{}: {} step(s), limit {}s", plan.title, plan.steps.len(), plan.max_total_time_secs);
    for step in &plan.steps {
        let flag = match classifier.classify(&step.command) {
            shellpilot::SafetyVerdict::Dangerous { reason } => format!("  [dangerous: {}]", reason),
            shellpilot::SafetyVerdict::Safe => String::new(),
        };
        println!("  {} - {}{}", step.id, step.command, flag);
    }
    Ok(0)
}

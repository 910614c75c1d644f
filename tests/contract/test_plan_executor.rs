//! Contract Tests for the Plan Executor
//!
//! These tests define how a plan runs over a shell channel: step order,
//! retries, time limits, cancellation, session loss and the final verdict.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use shellpilot::error::Error;
use shellpilot::execution::{ExecutorState, PlanExecutor};
use shellpilot::models::{Criterion, ExecutionError, ExecutionPlan};
use test_utils::{fast_executor_settings, sample_plan, step, Reply, ScriptedShell};

fn executor(shell: &ScriptedShell) -> PlanExecutor {
    PlanExecutor::new(Arc::new(shell.clone()), fast_executor_settings())
}

#[tokio::test]
async fn test_successful_plan_runs_every_step_in_order() {
    let shell = ScriptedShell::new()
        .on("systemctl is-active nginx", Reply::ok("active"))
        .on("nginx -t", Reply::ok("nginx: configuration file /etc/nginx/nginx.conf test is successful"))
        .on("ss -ltn", Reply::ok("LISTEN 0 511 0.0.0.0:80 0.0.0.0:*"));

    let result = executor(&shell).execute_plan(&sample_plan()).await.unwrap();

    assert!(result.success, "{}", result.message);
    assert_eq!(result.state, ExecutorState::Succeeded);
    assert_eq!(result.results.len(), 3);
    assert_eq!(result.succeeded_steps(), 3);
    assert_eq!(result.terminal_error, None);
    assert_eq!(
        shell.sent(),
        vec!["systemctl is-active nginx", "nginx -t", "ss -ltn"]
    );
    assert_eq!(result.results[0].output, "active");
    assert_eq!(result.results[0].exit_status, Some(0));
}

#[tokio::test]
async fn test_failing_step_stops_the_plan() {
    let shell = ScriptedShell::new()
        .on("systemctl is-active nginx", Reply::ok("active"))
        .on("nginx -t", Reply::exit("nginx: [emerg] unknown directive \"lsten\"", 1));

    let result = executor(&shell).execute_plan(&sample_plan()).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.state, ExecutorState::Failed);
    assert_eq!(result.results.len(), 2, "the third step must not run");
    assert_eq!(shell.sent().len(), 2);
    match &result.terminal_error {
        Some(ExecutionError::CriterionFailure { step_id, excerpt, .. }) => {
            assert_eq!(step_id.as_deref(), Some("config"));
            assert!(excerpt.contains("[emerg]"));
        }
        other => panic!("expected criterion failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_until_success() {
    let shell = ScriptedShell::new()
        .on("curl -sf localhost/health", Reply::exit("connection refused", 7))
        .on("curl -sf localhost/health", Reply::exit("connection refused", 7))
        .on("curl -sf localhost/health", Reply::ok("ok"));

    let plan = ExecutionPlan::new(
        "wait for app",
        vec![step("health", "curl -sf localhost/health").with_max_retries(3)],
    );
    let result = executor(&shell).execute_plan(&plan).await.unwrap();

    assert!(result.success);
    assert_eq!(result.results.len(), 1, "one result per step");
    assert_eq!(result.results[0].retries, 2);
    assert_eq!(shell.sent().len(), 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let shell = ScriptedShell::new().on("false", Reply::exit("", 1));
    let plan = ExecutionPlan::new("p", vec![step("f", "false")]).with_max_retries_per_step(2);

    let result = executor(&shell).execute_plan(&plan).await.unwrap();

    assert!(!result.success);
    assert_eq!(shell.sent().len(), 3, "first attempt plus two retries");
    assert_eq!(result.results.len(), 1);
    assert_eq!(result.results[0].retries, 2);
    assert!(result.results[0].error.is_some());
}

#[tokio::test]
async fn test_step_override_beats_plan_retry_budget() {
    let shell = ScriptedShell::new().on("false", Reply::exit("", 1));
    let plan = ExecutionPlan::new("p", vec![step("f", "false").with_max_retries(0)])
        .with_max_retries_per_step(5);

    executor(&shell).execute_plan(&plan).await.unwrap();
    assert_eq!(shell.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout() {
    let shell = ScriptedShell::new().on("tail -f /var/log/syslog", Reply::hang("Oct 12 kernel: eth0 up"));
    let plan = ExecutionPlan::new(
        "p",
        vec![step("tail", "tail -f /var/log/syslog").with_timeout(Duration::from_secs(2))],
    );

    let result = executor(&shell).execute_plan(&plan).await.unwrap();

    assert!(!result.success);
    assert!(result.results[0].timed_out);
    match &result.terminal_error {
        Some(ExecutionError::StepTimeout { step_id, timeout_secs, excerpt }) => {
            assert_eq!(step_id, "tail");
            assert_eq!(*timeout_secs, 2);
            assert!(excerpt.contains("eth0 up"));
        }
        other => panic!("expected step timeout, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_late_marker_from_timed_out_attempt_is_ignored() {
    // The first attempt finishes remotely while the retry is still running
    let shell = ScriptedShell::new()
        .on(
            "sleep 1.5; echo first-out",
            Reply::delayed("first-out", 0, Duration::from_millis(1500)),
        )
        .on(
            "sleep 1.5; echo first-out",
            Reply::delayed("retry-out", 0, Duration::from_millis(900)),
        )
        .on("echo second-out", Reply::ok("second-out"));
    let plan = ExecutionPlan::new(
        "p",
        vec![
            step("slow", "sleep 1.5; echo first-out")
                .with_timeout(Duration::from_secs(1))
                .with_max_retries(1),
            step("second", "echo second-out").with_success(Criterion::contains("second-out")),
        ],
    );

    let result = executor(&shell).execute_plan(&plan).await.unwrap();

    assert!(result.success, "{}", result.message);
    let slow = &result.results[0];
    assert_eq!(slow.retries, 1);
    assert!(slow.output.contains("retry-out"), "{:?}", slow.output);
    assert!(!slow.output.contains("first-out"), "{:?}", slow.output);
    assert!(slow.duration_ms >= 900, "{}", slow.duration_ms);
    assert_eq!(result.results[1].output, "second-out");
}

#[tokio::test(start_paused = true)]
async fn test_plan_time_limit() {
    let shell = ScriptedShell::new()
        .on("apt-get update", Reply::delayed("Hit:1 http://archive", 0, Duration::from_secs(3)))
        .on("apt-get -y upgrade", Reply::ok("done"));
    let plan = ExecutionPlan::new(
        "patch",
        vec![
            step("update", "apt-get update"),
            step("upgrade", "apt-get -y upgrade"),
        ],
    )
    .with_max_total_time(Duration::from_secs(2));

    let result = executor(&shell).execute_plan(&plan).await.unwrap();

    assert!(!result.success);
    assert_eq!(
        result.terminal_error,
        Some(ExecutionError::PlanTimeout { limit_secs: 2 })
    );
    assert_eq!(shell.sent(), vec!["apt-get update"]);
}

#[tokio::test]
async fn test_session_lost_mid_plan() {
    let shell = ScriptedShell::new()
        .on("uptime", Reply::ok(" 09:14:02 up 12 days"))
        .on("sudo systemctl restart sshd", Reply::disconnect("", Some(255)));
    let plan = ExecutionPlan::new(
        "restart",
        vec![
            step("uptime", "uptime"),
            step("restart", "sudo systemctl restart sshd"),
            step("after", "uptime"),
        ],
    );

    let result = executor(&shell).execute_plan(&plan).await.unwrap();

    assert!(!result.success);
    assert_eq!(
        result.terminal_error,
        Some(ExecutionError::SessionTerminated {
            exit_status: Some(255)
        })
    );
    assert_eq!(result.results.len(), 2);
    assert_eq!(shell.sent().len(), 2);
}

#[tokio::test]
async fn test_disconnected_before_start() {
    let shell = ScriptedShell::new();
    shell.drop_connection(None);

    let result = executor(&shell).execute_plan(&sample_plan()).await.unwrap();

    assert!(!result.success);
    assert!(matches!(
        result.terminal_error,
        Some(ExecutionError::SessionTerminated { exit_status: None })
    ));
    assert!(result.results.is_empty());
    assert!(shell.sent().is_empty());
}

#[tokio::test]
async fn test_send_failure_recorded() {
    let shell = ScriptedShell::new().failing_sends();
    let result = executor(&shell).execute_plan(&sample_plan()).await.unwrap();

    assert!(!result.success);
    assert!(matches!(
        result.terminal_error,
        Some(ExecutionError::SendFailed { ref step_id, .. }) if step_id == "status"
    ));
    assert_eq!(result.results.len(), 1);
}

#[tokio::test]
async fn test_cancel_between_steps() {
    let shell = ScriptedShell::new()
        .on("make build", Reply::delayed("compiling", 0, Duration::from_millis(300)));
    let plan = ExecutionPlan::new(
        "build",
        vec![step("build", "make build"), step("install", "make install")],
    );
    let executor = Arc::new(executor(&shell));

    let running = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.execute_plan(&plan).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    executor.cancel();

    let result = running.await.unwrap().unwrap();
    assert_eq!(result.state, ExecutorState::Cancelled);
    assert!(!result.success);
    assert_eq!(
        result.terminal_error,
        Some(ExecutionError::Cancelled {
            step_id: Some("install".to_string())
        })
    );
    assert_eq!(shell.sent(), vec!["make build"], "the in-flight step finishes, no new step starts");
    assert_eq!(executor.state(), ExecutorState::Cancelled);
}

#[tokio::test]
async fn test_second_plan_rejected_while_running() {
    let shell = ScriptedShell::new()
        .on("sleep 1", Reply::delayed("", 0, Duration::from_millis(300)));
    let plan = ExecutionPlan::new("slow", vec![step("s", "sleep 1")]);
    let executor = Arc::new(executor(&shell));

    let first = {
        let executor = executor.clone();
        let plan = plan.clone();
        tokio::spawn(async move { executor.execute_plan(&plan).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        executor.execute_plan(&plan).await,
        Err(Error::PlanAlreadyRunning)
    ));
    assert!(first.await.unwrap().unwrap().success);
    // Idle again: a new run is accepted
    assert!(executor.execute_plan(&plan).await.unwrap().success);
}

#[tokio::test]
async fn test_invalid_plan_rejected_without_sending() {
    let shell = ScriptedShell::new();
    let plan = ExecutionPlan::new("empty", vec![]);
    assert!(matches!(
        executor(&shell).execute_plan(&plan).await,
        Err(Error::InvalidPlan { .. })
    ));
    assert!(shell.sent().is_empty());
}

#[tokio::test]
async fn test_global_criteria_decide_after_all_steps() {
    let shell = ScriptedShell::new()
        .on("pg_dump app > /backup/app.sql", Reply::ok(""))
        .on("ls -l /backup", Reply::ok("-rw-r--r-- 1 postgres postgres 0 Oct 12 app.sql"));
    let plan = ExecutionPlan::new(
        "backup",
        vec![
            step("dump", "pg_dump app > /backup/app.sql"),
            step("list", "ls -l /backup"),
        ],
    )
    .with_failure(Criterion::contains("postgres 0 "));

    let result = executor(&shell).execute_plan(&plan).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.succeeded_steps(), 2);
    assert!(matches!(
        result.terminal_error,
        Some(ExecutionError::CriterionFailure { step_id: None, .. })
    ));
}

#[tokio::test]
async fn test_progress_observable() {
    let shell = ScriptedShell::new();
    let executor = executor(&shell);
    let mut progress = executor.subscribe();
    assert_eq!(progress.borrow().state, ExecutorState::Idle);

    let result = executor.execute_plan(&sample_plan()).await.unwrap();
    assert!(progress.has_changed().unwrap());
    let last = progress.borrow_and_update().clone();
    assert_eq!(last.state, result.state);
    assert_eq!(last.total_steps, 3);
    assert_eq!(last.results.len(), result.results.len());
}

#[tokio::test]
async fn test_output_without_marker_is_inconclusive_for_exit_checks() {
    let shell = ScriptedShell::new().on(
        "hostname",
        Reply::PromptOnly {
            output: "web01".to_string(),
        },
    );
    let mut settings = fast_executor_settings();
    settings.run.capture_exit_status = false;
    let executor = PlanExecutor::new(Arc::new(shell.clone()), settings);

    let plan = ExecutionPlan::new("p", vec![step("h", "hostname")]);
    let result = executor.execute_plan(&plan).await.unwrap();

    assert_eq!(result.results[0].output, "web01");
    assert!(matches!(
        result.terminal_error,
        Some(ExecutionError::Inconclusive { .. })
    ));
    assert_eq!(shell.wire(), vec!["hostname"]);
}

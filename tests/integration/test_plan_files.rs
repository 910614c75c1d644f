//! Integration tests for plan and configuration files on disk

use std::fs;
use std::time::Duration;

use shellpilot::config::loader::{ConfigLoader, LoadOptions};
use shellpilot::config::Config;
use shellpilot::error::Error;
use shellpilot::models::{CriterionKind, ExecutionPlan};
use tempfile::TempDir;

const TOML_PLAN: &str = r#"
title = "rotate nginx logs"
description = "Force a logrotate run and confirm nginx reopened its files"
max_total_time_secs = 120
max_retries_per_step = 1

[[steps]]
id = "rotate"
title = "Run logrotate"
command = "sudo logrotate -f /etc/logrotate.d/nginx"
timeout_secs = 30

[[steps.success_criteria]]
type = "exit_code"
code = 0

[[steps]]
id = "verify"
command = "ls -l /var/log/nginx"
max_retries = 3

[[steps.success_criteria]]
description = "fresh access log"
type = "matches"
pattern = 'access\.log$'

[[steps.failure_criteria]]
type = "contains"
text = "No such file"

[[failure_criteria]]
type = "not_contains"
text = "access.log"
"#;

const JSON_PLAN: &str = r#"{
  "title": "disk report",
  "steps": [
    {
      "id": "df",
      "command": "df -h /",
      "success_criteria": [{ "type": "contains", "text": "/" }]
    }
  ]
}"#;

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_toml_plan() {
    let dir = TempDir::new().unwrap();
    let plan = ExecutionPlan::load(&write(&dir, "rotate.toml", TOML_PLAN)).unwrap();

    plan.validate().unwrap();
    assert_eq!(plan.title, "rotate nginx logs");
    assert_eq!(plan.max_total_time(), Duration::from_secs(120));
    assert_eq!(plan.steps.len(), 2);

    let rotate = &plan.steps[0];
    assert_eq!(rotate.timeout(), Duration::from_secs(30));
    assert_eq!(plan.retries_for(rotate), 1);
    assert_eq!(
        rotate.success_criteria[0].kind,
        CriterionKind::ExitCode { code: 0 }
    );

    let verify = &plan.steps[1];
    assert_eq!(verify.display_title(), "verify");
    assert_eq!(plan.retries_for(verify), 3);
    assert_eq!(verify.success_criteria[0].description, "fresh access log");
    assert_eq!(verify.failure_criteria.len(), 1);
    assert_eq!(plan.failure_criteria.len(), 1);
}

#[test]
fn test_load_json_plan_with_defaults() {
    let dir = TempDir::new().unwrap();
    let plan = ExecutionPlan::load(&write(&dir, "disk.json", JSON_PLAN)).unwrap();

    plan.validate().unwrap();
    assert_eq!(plan.steps[0].timeout(), Duration::from_secs(60));
    assert_eq!(plan.max_total_time(), Duration::from_secs(600));
    assert_eq!(plan.max_retries_per_step, 0);
    assert!(plan.success_criteria.is_empty());
}

#[test]
fn test_toml_plan_reloads_as_json() {
    let dir = TempDir::new().unwrap();
    let plan = ExecutionPlan::load(&write(&dir, "rotate.toml", TOML_PLAN)).unwrap();

    let saved = serde_json::to_string_pretty(&plan).unwrap();
    let again = ExecutionPlan::load(&write(&dir, "saved.json", &saved)).unwrap();
    assert_eq!(again, plan);
}

#[test]
fn test_missing_plan_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    match ExecutionPlan::load(&path) {
        Err(Error::PlanLoadFailed { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected PlanLoadFailed, got {:?}", other),
    }
}

#[test]
fn test_malformed_plan_file() {
    let dir = TempDir::new().unwrap();
    let toml_path = write(&dir, "broken.toml", "title = \"x\"\n[[steps]]\nid = 1\n");
    assert!(matches!(
        ExecutionPlan::load(&toml_path),
        Err(Error::PlanLoadFailed { .. })
    ));

    let json_path = write(&dir, "broken.json", "{ \"title\": ");
    assert!(matches!(
        ExecutionPlan::load(&json_path),
        Err(Error::PlanLoadFailed { .. })
    ));
}

#[test]
fn test_loaded_plan_validation_errors() {
    let dir = TempDir::new().unwrap();

    let duplicate = r#"
title = "dup"
[[steps]]
id = "a"
command = "uptime"
[[steps]]
id = "a"
command = "w"
"#;
    let plan = ExecutionPlan::load(&write(&dir, "dup.toml", duplicate)).unwrap();
    match plan.validate() {
        Err(Error::InvalidPlan { reason }) => assert!(reason.contains("duplicate step id 'a'")),
        other => panic!("expected InvalidPlan, got {:?}", other),
    }

    let bad_regex = r#"
title = "regex"
[[steps]]
id = "grep"
command = "dmesg"
[[steps.success_criteria]]
type = "matches"
pattern = "(unclosed"
"#;
    let plan = ExecutionPlan::load(&write(&dir, "regex.toml", bad_regex)).unwrap();
    match plan.validate() {
        Err(Error::InvalidPlan { reason }) => assert!(reason.contains("step 'grep'")),
        other => panic!("expected InvalidPlan, got {:?}", other),
    }

    let zero_timeout = r#"
title = "zero"
[[steps]]
id = "z"
command = "true"
timeout_secs = 0
"#;
    let plan = ExecutionPlan::load(&write(&dir, "zero.toml", zero_timeout)).unwrap();
    assert!(matches!(plan.validate(), Err(Error::InvalidPlan { .. })));
}

#[test]
fn test_partial_config_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "config.toml",
        r#"
[session]
connect_timeout_secs = 20
extra_ssh_options = ["-o", "ProxyJump=bastion"]

[safety]
extra_patterns = ['\bdocker\s+system\s+prune\b']
"#,
    );

    let config = ConfigLoader::load_from_path(&path).unwrap();
    assert_eq!(config.session.connect_timeout_secs, 20);
    assert_eq!(config.session.extra_ssh_options.len(), 2);
    assert_eq!(config.session.ssh_binary, "ssh");
    assert_eq!(config.executor, Config::default().executor);
    assert_eq!(config.safety.extra_patterns.len(), 1);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();

    let path = write(&dir, "config.toml", "[executor]\npoll_interval_ms = 0\n");
    match ConfigLoader::load_from_path(&path) {
        Err(Error::ConfigValidationFailed { field, .. }) => {
            assert_eq!(field, "executor.poll_interval_ms")
        }
        other => panic!("expected ConfigValidationFailed, got {:?}", other),
    }

    let path = write(&dir, "bad.json", "{ \"safety\": { \"extra_patterns\": [\"[\"] } }");
    match ConfigLoader::load_from_path(&path) {
        Err(Error::ConfigValidationFailed { field, .. }) => {
            assert_eq!(field, "safety.extra_patterns")
        }
        other => panic!("expected ConfigValidationFailed, got {:?}", other),
    }

    let path = write(&dir, "garbage.toml", "[session\n");
    assert!(matches!(
        ConfigLoader::load_from_path(&path),
        Err(Error::ConfigParseFailed { .. })
    ));
}

#[test]
fn test_search_path_discovery_and_save() {
    let dir = TempDir::new().unwrap();
    write(&dir, "config.json", r#"{ "logging": { "level": "debug" } }"#);

    let mut loader = ConfigLoader::new();
    loader.set_search_path(dir.path().to_path_buf());
    let mut config = loader
        .load_from_search_paths(&LoadOptions::default())
        .unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(loader.current_path(), Some(dir.path().join("config.json").as_path()));

    config.executor.retry_delay_ms = 250;
    let saved = loader.save(&config).unwrap();
    assert_eq!(saved, dir.path().join("config.json"));
    assert_eq!(ConfigLoader::load_from_path(&saved).unwrap(), config);
}

#[test]
fn test_search_path_without_config() {
    let dir = TempDir::new().unwrap();
    let mut loader = ConfigLoader::new();
    loader.set_search_path(dir.path().to_path_buf());

    let config = loader
        .load_from_search_paths(&LoadOptions::default())
        .unwrap();
    assert_eq!(config, Config::default());
    assert!(loader.current_path().is_none());

    let strict = LoadOptions {
        create_default: false,
        validate: true,
    };
    assert!(matches!(
        loader.load_from_search_paths(&strict),
        Err(Error::ConfigNotFound)
    ));
}

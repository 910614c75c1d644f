//! Security tests: credentials never leak
//!
//! A password must not reach a command line, a `Debug` dump, a serialized
//! target, an error message, or the session output buffer.

use shellpilot::config::SessionConfig;
use shellpilot::error::Error;
use shellpilot::models::{AuthMethod, ConnectionTarget};
use shellpilot::session::{SshOptions, SshTransport, Transport};

const SECRET: &str = "c0rrect-h0rse-battery";

fn password_target() -> ConnectionTarget {
    ConnectionTarget::new("db01.internal", "postgres")
        .with_port(2222)
        .with_auth(AuthMethod::password(SECRET))
}

#[test]
fn test_password_absent_from_ssh_args() {
    let transport = SshTransport::new(password_target(), SshOptions::default());
    let args = transport.ssh_args();

    assert!(args.iter().all(|arg| !arg.contains(SECRET)), "{:?}", args);
    assert!(args.contains(&"postgres@db01.internal".to_string()));
    assert!(args.contains(&"2222".to_string()));
    assert!(args.contains(&"PubkeyAuthentication=no".to_string()));
}

#[test]
fn test_password_only_in_helper_environment() {
    // Any resolvable program stands in for the client and the helper
    let options = SshOptions {
        ssh_binary: "sh".to_string(),
        password_helper: "sh".to_string(),
        ..SshOptions::default()
    };
    let transport = SshTransport::new(password_target(), options);
    let command = transport.command().unwrap();
    let std_command = command.as_std();

    let args: Vec<String> = std_command
        .get_args()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    assert_eq!(args.first().map(String::as_str), Some("-e"));
    assert!(args.iter().all(|arg| !arg.contains(SECRET)));

    let from_env = std_command
        .get_envs()
        .find(|(key, _)| *key == "SSHPASS")
        .and_then(|(_, value)| value)
        .map(|value| value.to_string_lossy().into_owned());
    assert_eq!(from_env.as_deref(), Some(SECRET));
}

#[test]
fn test_key_auth_has_no_password_environment() {
    let target = ConnectionTarget::new("web01", "ops").with_auth(AuthMethod::PrivateKey {
        path: "/home/ops/.ssh/id_ed25519".into(),
    });
    let options = SshOptions {
        ssh_binary: "sh".to_string(),
        ..SshOptions::default()
    };
    let command = SshTransport::new(target, options).command().unwrap();

    assert!(command
        .as_std()
        .get_envs()
        .all(|(key, _)| key != "SSHPASS"));
    let args: Vec<_> = command.as_std().get_args().collect();
    assert!(args.iter().any(|arg| *arg == "/home/ops/.ssh/id_ed25519"));
}

#[test]
fn test_debug_output_redacts_password() {
    let target = password_target();
    let transport = SshTransport::new(target.clone(), SshOptions::default());

    for dump in [
        format!("{:?}", target.auth),
        format!("{:?}", target),
        format!("{:#?}", target),
        format!("{:?}", transport),
        target.to_string(),
    ] {
        assert!(!dump.contains(SECRET), "leaked in {}", dump);
    }
}

#[test]
fn test_serialized_target_omits_password() {
    let target = password_target();

    let json = serde_json::to_string(&target).unwrap();
    assert!(!json.contains(SECRET));
    assert!(json.contains("\"type\":\"password\""));

    let toml = toml::to_string(&target).unwrap();
    assert!(!toml.contains(SECRET));

    // Deserializing yields an empty secret, never a stale one
    let back: ConnectionTarget = serde_json::from_str(&json).unwrap();
    assert_eq!(back.auth.kind(), "password");
    assert!(!format!("{:?}", back).contains(SECRET));
}

#[tokio::test]
async fn test_connect_errors_do_not_carry_password() {
    let config = SessionConfig {
        ssh_binary: "sh".to_string(),
        password_helper: "/nonexistent/sshpass".to_string(),
        ..SessionConfig::default()
    };
    let session = shellpilot::ShellSession::ssh(password_target(), &config);

    let err = session.connect().await.unwrap_err();
    assert!(err.is_connect_error());
    assert!(!err.to_string().contains(SECRET));
    assert!(!format!("{:?}", err).contains(SECRET));
    assert!(!session.output().contains(SECRET));
}

#[test]
fn test_missing_client_reported_without_credentials() {
    let options = SshOptions {
        ssh_binary: "/nonexistent/ssh".to_string(),
        ..SshOptions::default()
    };
    let transport = SshTransport::new(password_target(), options);

    match transport.command() {
        Err(Error::ClientNotFound { program }) => {
            assert_eq!(program, "/nonexistent/ssh");
            assert!(!program.contains(SECRET));
        }
        other => panic!("expected ClientNotFound, got {:?}", other.map(|_| ())),
    }
}

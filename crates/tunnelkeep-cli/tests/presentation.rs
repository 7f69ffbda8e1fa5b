//! Smoke tests for the read-only presentation layer

use std::path::PathBuf;

use tempfile::TempDir;
use tunnelkeep_cli::{diagnose, render, repl};
use tunnelkeep_core::{Registry, RegistrySettings, TunnelKind, TunnelSpec, TunnelStatus};

fn registry(tmp: &TempDir) -> Registry {
    Registry::new(RegistrySettings {
        config_path: tmp.path().join("config.json"),
        log_dir: tmp.path().join("logs"),
        ssh_program: PathBuf::from("ssh"),
    })
}

fn spec(name: &str, kind: TunnelKind) -> TunnelSpec {
    TunnelSpec {
        name: name.to_string(),
        user: "deploy".to_string(),
        host: "bastion".to_string(),
        port: 22,
        ssh_key: tmp_key(),
        kind,
        local_port: 5432,
        remote_host: "db.internal".to_string(),
        remote_port: 5432,
        reconnect_delay: 5,
    }
}

fn tmp_key() -> PathBuf {
    PathBuf::from("/tmp/nonexistent-test-key")
}

#[tokio::test]
async fn render_and_diagnose_leave_state_untouched() {
    let tmp = TempDir::new().unwrap();
    let registry = registry(&tmp);
    registry.add(spec("db", TunnelKind::Forward)).await.unwrap();
    registry.add(spec("cache", TunnelKind::Reverse)).await.unwrap();

    render::print_status(&registry).await;
    diagnose::report(&registry).await;

    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|t| t.status == TunnelStatus::Stopped));
    assert!(snapshot.iter().all(|t| !t.active));
}

#[test]
fn parse_covers_the_command_catalogue() {
    use repl::Command;

    for (line, expected) in [
        ("status", Command::Status),
        ("start", Command::StartAll),
        ("stop", Command::StopAll),
        ("add", Command::Add),
        ("diagnose", Command::Diagnose),
        ("watch", Command::Watch),
        ("help", Command::Help),
        ("quit", Command::Quit),
    ] {
        assert_eq!(repl::parse(line), expected, "{}", line);
    }
}

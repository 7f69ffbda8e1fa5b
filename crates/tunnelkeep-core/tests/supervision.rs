//! End-to-end supervision scenarios
//!
//! Each test drives a registry against a scripted stand-in for the SSH
//! client: a shell script that emits canned diagnostics and exits (or keeps
//! running) the way a real `ssh` would in the scenario under test.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tunnelkeep_core::{
    Registry, RegistrySettings, TunnelKind, TunnelSnapshot, TunnelSpec, TunnelStatus,
};

fn write_fake_ssh(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn registry_with(tmp: &TempDir, ssh_program: PathBuf) -> Registry {
    Registry::new(RegistrySettings {
        config_path: tmp.path().join("config.json"),
        log_dir: tmp.path().join("logs"),
        ssh_program,
    })
}

fn spec(name: &str, kind: TunnelKind, reconnect_delay: u64) -> TunnelSpec {
    TunnelSpec {
        name: name.to_string(),
        user: "deploy".to_string(),
        host: "bastion.example.com".to_string(),
        port: 22,
        ssh_key: PathBuf::from("/tmp/nonexistent-test-key"),
        kind,
        local_port: 15432,
        remote_host: "db.internal".to_string(),
        remote_port: 5432,
        reconnect_delay,
    }
}

/// Poll snapshots until `check` passes or `timeout` elapses.
async fn wait_for<F>(registry: &Registry, timeout: Duration, mut check: F) -> bool
where
    F: FnMut(&[TunnelSnapshot]) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = registry.snapshot().await;
        if check(&snapshot) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn the(snapshot: &[TunnelSnapshot], name: &str) -> TunnelSnapshot {
    snapshot
        .iter()
        .find(|t| t.spec.name == name)
        .expect("tunnel present")
        .clone()
}

/// A short-lived clean child cycles STARTING -> RUNNING -> RECONNECTING and
/// keeps incrementing the restart counter.
#[tokio::test]
async fn happy_reconnect_cycles_and_counts() {
    let tmp = TempDir::new().unwrap();
    // Lives past the settle window so RUNNING is observable, then exits clean.
    let ssh = write_fake_ssh(tmp.path(), "fake-ssh", "sleep 3\nexit 0");
    let registry = registry_with(&tmp, ssh);
    registry.add(spec("db", TunnelKind::Forward, 1)).await.unwrap();

    assert_eq!(
        registry.start("db").await.unwrap(),
        tunnelkeep_core::StartOutcome::Started
    );

    let saw_running = wait_for(&registry, Duration::from_secs(6), |s| {
        the(s, "db").status == TunnelStatus::Running
    })
    .await;
    assert!(saw_running, "tunnel never reached RUNNING");

    let retried = wait_for(&registry, Duration::from_secs(12), |s| {
        the(s, "db").restart_count >= 2
    })
    .await;
    assert!(retried, "supervisor never started a second attempt");

    registry.shutdown().await;
}

/// `Permission denied` in early output classifies as AUTH_ERROR within one
/// cycle, and the supervisor keeps retrying.
#[tokio::test]
async fn auth_failure_is_classified_from_output() {
    let tmp = TempDir::new().unwrap();
    let ssh = write_fake_ssh(
        tmp.path(),
        "fake-ssh",
        "echo 'Permission denied (publickey).'\nexit 255",
    );
    let registry = registry_with(&tmp, ssh);
    registry.add(spec("db", TunnelKind::Forward, 1)).await.unwrap();
    registry.start("db").await.unwrap();

    let classified = wait_for(&registry, Duration::from_secs(6), |s| {
        the(s, "db").status == TunnelStatus::AuthError
    })
    .await;
    assert!(classified, "AUTH_ERROR never observed");

    let still_retrying = wait_for(&registry, Duration::from_secs(8), |s| {
        the(s, "db").restart_count >= 2
    })
    .await;
    assert!(still_retrying, "restart counter stopped incrementing");

    registry.shutdown().await;
}

/// A reverse tunnel whose child reports a remote-forwarding failure but keeps
/// running is classified PORT_ERROR, killed, and retried after the delay.
#[tokio::test]
async fn reverse_port_conflict_kills_and_retries() {
    let tmp = TempDir::new().unwrap();
    let ssh = write_fake_ssh(
        tmp.path(),
        "fake-ssh",
        "echo 'Warning: remote port forwarding failed for listen port 6983'\nsleep 30",
    );
    let registry = registry_with(&tmp, ssh);
    registry.add(spec("cache", TunnelKind::Reverse, 1)).await.unwrap();
    registry.start("cache").await.unwrap();

    // Reverse settle window is 5s; allow slack.
    let classified = wait_for(&registry, Duration::from_secs(10), |s| {
        the(s, "cache").status == TunnelStatus::PortError
    })
    .await;
    assert!(classified, "PORT_ERROR never observed");

    let retried = wait_for(&registry, Duration::from_secs(10), |s| {
        the(s, "cache").restart_count >= 2
    })
    .await;
    assert!(retried, "no fresh attempt after the port conflict");

    registry.shutdown().await;
}

/// Exit code 255 with no diagnostics still buckets as AUTH_ERROR.
#[tokio::test]
async fn exit_code_255_buckets_as_auth() {
    let tmp = TempDir::new().unwrap();
    let ssh = write_fake_ssh(tmp.path(), "fake-ssh", "exit 255");
    let registry = registry_with(&tmp, ssh);
    registry.add(spec("db", TunnelKind::Forward, 30)).await.unwrap();
    registry.start("db").await.unwrap();

    let classified = wait_for(&registry, Duration::from_secs(6), |s| {
        the(s, "db").status == TunnelStatus::AuthError
    })
    .await;
    assert!(classified, "exit 255 did not bucket as AUTH_ERROR");

    registry.shutdown().await;
}

/// Global shutdown brings every running tunnel to STOPPED within the bound.
#[tokio::test]
async fn graceful_shutdown_stops_all_workers() {
    let tmp = TempDir::new().unwrap();
    let ssh = write_fake_ssh(tmp.path(), "fake-ssh", "sleep 30");
    let registry = registry_with(&tmp, ssh);
    registry.add(spec("db", TunnelKind::Forward, 1)).await.unwrap();
    registry.add(spec("web", TunnelKind::Forward, 1)).await.unwrap();

    assert_eq!(registry.start_all().await, 2);
    let both_running = wait_for(&registry, Duration::from_secs(6), |s| {
        s.iter().all(|t| t.status == TunnelStatus::Running)
    })
    .await;
    assert!(both_running, "tunnels never reached RUNNING");

    registry.shutdown().await;

    let snapshot = registry.snapshot().await;
    assert!(snapshot.iter().all(|t| t.status == TunnelStatus::Stopped));
    assert!(tmp.path().join("logs/db.log").exists());
    assert!(tmp.path().join("logs/web.log").exists());
}

/// Stopping one tunnel leaves the other workers untouched.
#[tokio::test]
async fn stop_single_tunnel_leaves_others_running() {
    let tmp = TempDir::new().unwrap();
    let ssh = write_fake_ssh(tmp.path(), "fake-ssh", "sleep 30");
    let registry = registry_with(&tmp, ssh);
    for name in ["db-prod", "web-dev", "api-test"] {
        registry.add(spec(name, TunnelKind::Forward, 1)).await.unwrap();
    }

    registry.start_all().await;
    let all_running = wait_for(&registry, Duration::from_secs(6), |s| {
        s.iter().all(|t| t.status == TunnelStatus::Running)
    })
    .await;
    assert!(all_running, "tunnels never reached RUNNING");

    registry.stop("web-dev").await.unwrap();

    let snapshot = registry.snapshot().await;
    let stopped = the(&snapshot, "web-dev");
    assert_eq!(stopped.status, TunnelStatus::Stopped);
    assert!(!stopped.active, "stop must clear the worker handle");

    for name in ["db-prod", "api-test"] {
        let t = the(&snapshot, name);
        assert_eq!(t.status, TunnelStatus::Running, "{} was disturbed", name);
        assert!(t.active, "{} lost its worker", name);
    }

    registry.shutdown().await;
}

/// After a reset of a healthy tunnel the restart counter reads exactly 1:
/// the first attempt of the fresh worker.
#[tokio::test]
async fn reset_zeroes_the_restart_counter() {
    let tmp = TempDir::new().unwrap();
    let ssh = write_fake_ssh(tmp.path(), "fake-ssh", "sleep 30");
    let registry = registry_with(&tmp, ssh);
    registry.add(spec("db", TunnelKind::Forward, 60)).await.unwrap();

    registry.start("db").await.unwrap();
    let running = wait_for(&registry, Duration::from_secs(6), |s| {
        the(s, "db").status == TunnelStatus::Running && the(s, "db").restart_count == 1
    })
    .await;
    assert!(running);

    registry.reset("db").await.unwrap();

    let fresh = wait_for(&registry, Duration::from_secs(6), |s| {
        the(s, "db").status == TunnelStatus::Running && the(s, "db").restart_count == 1
    })
    .await;
    assert!(fresh, "fresh worker did not settle at restart_count == 1");

    // The counter must not drift upward while the child stays healthy.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(the(&registry.snapshot().await, "db").restart_count, 1);

    registry.shutdown().await;
}

/// Double-start is a no-op; the second request reports AlreadyRunning.
#[tokio::test]
async fn double_start_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let ssh = write_fake_ssh(tmp.path(), "fake-ssh", "sleep 30");
    let registry = registry_with(&tmp, ssh);
    registry.add(spec("db", TunnelKind::Forward, 1)).await.unwrap();

    assert_eq!(
        registry.start("db").await.unwrap(),
        tunnelkeep_core::StartOutcome::Started
    );
    assert_eq!(
        registry.start("db").await.unwrap(),
        tunnelkeep_core::StartOutcome::AlreadyRunning
    );

    registry.shutdown().await;
}

/// Event logs carry the `[timestamp] [Restart #N]` line contract.
#[tokio::test]
async fn event_log_lines_are_stamped() {
    let tmp = TempDir::new().unwrap();
    let ssh = write_fake_ssh(tmp.path(), "fake-ssh", "exit 0");
    let registry = registry_with(&tmp, ssh);
    registry.add(spec("db", TunnelKind::Forward, 30)).await.unwrap();
    registry.start("db").await.unwrap();

    let reconnecting = wait_for(&registry, Duration::from_secs(6), |s| {
        the(s, "db").status == TunnelStatus::Reconnecting
    })
    .await;
    assert!(reconnecting);
    registry.shutdown().await;

    let content = std::fs::read_to_string(tmp.path().join("logs/db.log")).unwrap();
    assert!(content.contains("[Restart #1] 🚀 Starting SSH tunnel"));
    assert!(content.contains("💔 Tunnel died, reconnecting..."));
    assert!(content.contains("👋 Tunnel worker exiting"));
}

//! Environment diagnostics for the `diagnose` command
//!
//! Checks the pieces a tunnel silently depends on: the logs directory, the
//! config file, and each tunnel's private key file (presence and permission
//! mode). Reverse tunnels additionally get a reminder about the server-side
//! requirements that cannot be verified from here.

use std::path::Path;

use tunnelkeep_core::{Registry, TunnelKind};

/// Print a diagnostics report for the whole registry.
pub async fn report(registry: &Registry) {
    let settings = registry.settings();
    let snapshot = registry.snapshot().await;

    println!();
    println!("🔍 Diagnostics");
    println!("──────────────");

    if settings.log_dir.is_dir() {
        println!("✅ Logs directory {:?} exists", settings.log_dir);
    } else {
        println!("❌ Logs directory {:?} is missing", settings.log_dir);
    }

    if settings.config_path.is_file() {
        println!("✅ Config file {:?} exists", settings.config_path);
    } else {
        println!("❌ Config file {:?} is missing", settings.config_path);
    }

    let mut any_reverse = false;
    for tunnel in &snapshot {
        check_key_file(&tunnel.spec.name, &tunnel.spec.ssh_key);
        any_reverse |= tunnel.spec.kind == TunnelKind::Reverse;
    }

    if any_reverse {
        println!();
        println!("ℹ️  Reverse tunnels need the SSH server to accept remote forwards:");
        println!("   AllowTcpForwarding yes (and GatewayPorts for non-loopback binds)");
        println!("   in the server's sshd_config. This cannot be verified from here.");
    }
    println!();
}

fn check_key_file(tunnel: &str, key: &Path) {
    match std::fs::metadata(key) {
        Err(_) => println!("❌ [{}] key file {:?} is missing", tunnel, key),
        #[cfg(unix)]
        Ok(meta) => {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                println!(
                    "⚠️  [{}] key file {:?} has mode {:o}; SSH wants 0600 or tighter",
                    tunnel, key, mode
                );
            } else {
                println!("✅ [{}] key file {:?} (mode {:o})", tunnel, key, mode);
            }
        }
        #[cfg(not(unix))]
        Ok(_) => println!("✅ [{}] key file {:?} exists", tunnel, key),
    }
}

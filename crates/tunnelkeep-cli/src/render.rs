//! Status renderer
//!
//! Read-only projection of the registry for the operator: clears the screen
//! (so `watch` feels live), prints a two-line block per tunnel and a summary
//! footer with counts per status bucket.

use chrono::Local;
use tunnelkeep_core::{Registry, TunnelSnapshot, TunnelStatus};

const BANNER: &str = "\
╔══════════════════════════════════════════════════════════════════════════╗
║  tunnelkeep - SSH tunnel fleet supervisor                                ║
╚══════════════════════════════════════════════════════════════════════════╝";

fn status_symbol(status: TunnelStatus) -> &'static str {
    match status {
        TunnelStatus::Stopped => "⭕",
        TunnelStatus::Starting => "🔄",
        TunnelStatus::Running => "🔗",
        TunnelStatus::Reconnecting => "⚡",
        TunnelStatus::Error | TunnelStatus::AuthError | TunnelStatus::PortError => "❌",
    }
}

/// Clear the terminal and render the current table.
pub async fn print_status(registry: &Registry) {
    let snapshot = registry.snapshot().await;
    // Snapshot taken; everything below runs without the lock.
    print!("\x1b[2J\x1b[1;1H");
    println!("{}", BANNER);
    println!();
    println!(
        "Live Status [{}] | Tunnels: {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        snapshot.len()
    );
    println!();

    for tunnel in &snapshot {
        print_tunnel(tunnel);
    }

    print_summary(&snapshot);
}

fn print_tunnel(tunnel: &TunnelSnapshot) {
    println!(
        "{} {} {}",
        status_symbol(tunnel.status),
        tunnel.spec.name,
        tunnel.spec.chain()
    );

    let mut line = format!(
        "   Status: {} | Restarts: {} | Delay: {}s",
        tunnel.status, tunnel.restart_count, tunnel.spec.reconnect_delay
    );
    if let Some(last) = tunnel.last_restart {
        let ago = Local::now().signed_duration_since(last).num_seconds().max(0);
        line.push_str(&format!(" | Last: {}s ago", ago));
    }
    println!("{}", line);
    println!();
}

fn print_summary(snapshot: &[TunnelSnapshot]) {
    let count = |f: fn(TunnelStatus) -> bool| snapshot.iter().filter(|t| f(t.status)).count();
    let running = count(|s| s == TunnelStatus::Running);
    let reconnecting = count(|s| matches!(s, TunnelStatus::Starting | TunnelStatus::Reconnecting));
    let errors = count(|s| s.is_error());
    let stopped = count(|s| s == TunnelStatus::Stopped);

    println!("┌─ Summary ──────────────────────────────────────────────────────────────────┐");
    println!(
        "│ Running: {}  Starting/Reconnecting: {}  Errors: {}  Stopped: {}  Total: {} tunnels",
        running,
        reconnecting,
        errors,
        stopped,
        snapshot.len()
    );
    println!("└────────────────────────────────────────────────────────────────────────────┘");
}

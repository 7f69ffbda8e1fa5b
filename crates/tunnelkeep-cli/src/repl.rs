//! Line-oriented command interpreter
//!
//! Reads one line at a time and dispatches to the registry. Input arrives
//! over a channel fed by a dedicated stdin thread, so the loop can race a
//! pending read against the shutdown flag and never blocks shutdown on the
//! operator pressing enter. The registry lock is never held across a read.

use std::io::Write as _;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use tunnelkeep_core::{
    probe, Registry, SshCommand, StartOutcome, TunnelKind, TunnelSnapshot, TunnelSpec,
};

use crate::diagnose;
use crate::render;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    StartAll,
    Start(String),
    StopAll,
    Stop(String),
    Reset(String),
    Add,
    TestAll,
    Test(String),
    DebugAll,
    Debug(String),
    Diagnose,
    Watch,
    Help,
    Quit,
    Usage(&'static str),
    Unknown(String),
}

/// Parse one input line. Leading/trailing whitespace around the keyword and
/// the argument is trimmed; an empty line renders the status.
pub fn parse(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Status;
    }

    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim()),
        None => (line, ""),
    };

    match (keyword, rest) {
        ("status", "") => Command::Status,
        ("start", "") => Command::StartAll,
        ("start", name) => Command::Start(name.to_string()),
        ("stop", "") => Command::StopAll,
        ("stop", name) => Command::Stop(name.to_string()),
        ("reset", "") => Command::Usage("reset <tunnel_name>"),
        ("reset", name) => Command::Reset(name.to_string()),
        ("add", "") => Command::Add,
        ("test", "") => Command::TestAll,
        ("test", name) => Command::Test(name.to_string()),
        ("debug", "") => Command::DebugAll,
        ("debug", name) => Command::Debug(name.to_string()),
        ("diagnose", "") => Command::Diagnose,
        ("watch", "") => Command::Watch,
        ("help", "") => Command::Help,
        ("quit", "") | ("exit", "") => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

/// Run the interactive loop until quit, EOF or global shutdown.
pub async fn run(registry: &Registry, input: &mut mpsc::UnboundedReceiver<String>) {
    render::print_status(registry).await;
    println!("=== Interactive Command Mode ===");
    println!(
        "Commands: status, start [name], stop [name], reset <name>, add, \
         test [name], debug [name], diagnose, watch, help, quit"
    );
    println!();

    let mut shutdown = registry.shutdown_rx();
    loop {
        if *shutdown.borrow() {
            break;
        }
        print!("tunnel> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = input.recv() => match line {
                Some(line) => line,
                // EOF on stdin: behave like quit
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        if !dispatch(registry, input, &mut shutdown, parse(&line)).await {
            break;
        }
    }
}

/// Execute one command. Returns false when the loop should end.
async fn dispatch(
    registry: &Registry,
    input: &mut mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
    command: Command,
) -> bool {
    match command {
        Command::Status => {
            render::print_status(registry).await;
            println!();
        }
        Command::StartAll => {
            println!("⚡ Starting all tunnels...");
            let started = registry.start_all().await;
            println!("✅ Started {} tunnel(s)", started);
            println!();
        }
        Command::Start(name) => match registry.start(&name).await {
            Ok(StartOutcome::Started) => println!("🚀 Started tunnel '{}'", name),
            Ok(StartOutcome::AlreadyRunning) => {
                println!("⚠️  Tunnel '{}' is already running", name)
            }
            Err(e) => println!("❌ {}", e),
        },
        Command::StopAll => {
            println!("🛑 Stopping all tunnels...");
            registry.stop_all().await;
            println!("✅ All tunnels stopped");
            println!();
        }
        Command::Stop(name) => match registry.stop(&name).await {
            Ok(()) => println!("🛑 Stopped tunnel '{}'", name),
            Err(e) => println!("❌ {}", e),
        },
        Command::Reset(name) => match registry.reset(&name).await {
            Ok(()) => println!("🔄 Reset tunnel '{}'", name),
            Err(e) => println!("❌ {}", e),
        },
        Command::Add => add_interactive(registry, input).await,
        Command::TestAll => run_probe(registry, None).await,
        Command::Test(name) => run_probe(registry, Some(&name)).await,
        Command::DebugAll => print_commands(registry, None).await,
        Command::Debug(name) => print_commands(registry, Some(&name)).await,
        Command::Diagnose => diagnose::report(registry).await,
        Command::Watch => watch_loop(registry, shutdown).await,
        Command::Help => print_help(),
        Command::Quit => {
            println!("👋 Signing off, tunnels coming down...");
            return false;
        }
        Command::Usage(usage) => println!("❌ Usage: {}", usage),
        Command::Unknown(line) => {
            println!("❌ Unknown command: {} (type 'help' for commands)", line);
            println!();
        }
    }
    true
}

/// Select snapshot entries for a probe/debug target.
async fn targets(registry: &Registry, name: Option<&str>) -> Option<Vec<TunnelSnapshot>> {
    let snapshot = registry.snapshot().await;
    match name {
        Some(name) => match snapshot.into_iter().find(|t| t.spec.name == name) {
            Some(t) => Some(vec![t]),
            None => {
                println!("❌ Tunnel '{}' not found", name);
                None
            }
        },
        None => {
            if snapshot.is_empty() {
                println!("❌ No tunnels configured");
                return None;
            }
            Some(snapshot)
        }
    }
}

/// Probe the loopback side of one or all tunnels.
async fn run_probe(registry: &Registry, name: Option<&str>) {
    let Some(targets) = targets(registry, name).await else {
        return;
    };
    for tunnel in &targets {
        let port = tunnel.spec.local_port;
        match probe::probe_local_port(port).await {
            Ok(()) => println!(
                "✅ [{}] 127.0.0.1:{} is accepting connections",
                tunnel.spec.name, port
            ),
            Err(e) => println!("❌ [{}] 127.0.0.1:{}: {}", tunnel.spec.name, port, e),
        }
        if tunnel.spec.kind == TunnelKind::Reverse {
            println!("   ℹ️  Reverse tunnel: this probes only the local service side");
        }
    }
    println!();
}

/// Print the exact SSH command line(s) that the supervisor would spawn.
async fn print_commands(registry: &Registry, name: Option<&str>) {
    let Some(targets) = targets(registry, name).await else {
        return;
    };
    let program = registry.settings().ssh_program.clone();
    for tunnel in &targets {
        let cmd = SshCommand::for_tunnel(&program, &tunnel.spec);
        println!("[{}] {}", tunnel.spec.name, cmd.render());
        if tunnel.spec.kind == TunnelKind::Reverse {
            println!(
                "   ℹ️  Remote port {} opens on {}",
                tunnel.spec.remote_port, tunnel.spec.host
            );
        }
    }
    println!();
}

/// Re-render the status every two seconds until interrupted.
async fn watch_loop(registry: &Registry, shutdown: &mut watch::Receiver<bool>) {
    println!("🔄 Entering watch mode (Ctrl+C to exit)...");
    loop {
        if *shutdown.borrow() {
            break;
        }
        render::print_status(registry).await;
        println!("Refreshing every 2 seconds... (Ctrl+C to exit)");
        tokio::select! {
            _ = sleep(Duration::from_secs(2)) => {}
            _ = shutdown.changed() => break,
        }
    }
}

/// Interactive prompt sequence for registering a new tunnel.
async fn add_interactive(registry: &Registry, input: &mut mpsc::UnboundedReceiver<String>) {
    println!();
    println!("📝 Adding new tunnel - interactive setup");
    println!("─────────────────────────────────────────");

    let Some(name) = prompt(input, "Tunnel name: ").await else {
        return;
    };
    let Some(user) = prompt(input, "SSH user: ").await else {
        return;
    };
    let Some(host) = prompt(input, "SSH host: ").await else {
        return;
    };
    let Some(port) = prompt_port(input, "SSH port: ").await else {
        return;
    };
    let Some(ssh_key) = prompt(input, "SSH private key path: ").await else {
        return;
    };
    let Some(kind) = prompt_kind(input).await else {
        return;
    };
    let Some(local_port) = prompt_port(input, "Local port: ").await else {
        return;
    };
    let Some(remote_host) = prompt(input, "Remote host: ").await else {
        return;
    };
    let Some(remote_port) = prompt_port(input, "Remote port: ").await else {
        return;
    };
    let Some(reconnect_delay) = prompt_delay(input).await else {
        return;
    };

    let spec = TunnelSpec {
        name: name.clone(),
        user,
        host,
        port,
        ssh_key: ssh_key.into(),
        kind,
        local_port,
        remote_host,
        remote_port,
        reconnect_delay,
    };

    match registry.add(spec).await {
        Ok(()) => println!("✅ Tunnel '{}' added successfully", name),
        Err(e) => {
            println!("❌ {}", e);
            return;
        }
    }

    if let Some(answer) = prompt(input, "Start tunnel now? [y/N]: ").await {
        if answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes") {
            match registry.start(&name).await {
                Ok(_) => println!("🚀 Started tunnel '{}'", name),
                Err(e) => println!("❌ {}", e),
            }
        }
    }
    println!();
}

async fn prompt(input: &mut mpsc::UnboundedReceiver<String>, text: &str) -> Option<String> {
    print!("{}", text);
    let _ = std::io::stdout().flush();
    input.recv().await.map(|line| line.trim().to_string())
}

async fn prompt_port(input: &mut mpsc::UnboundedReceiver<String>, text: &str) -> Option<u16> {
    let raw = prompt(input, text).await?;
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            println!("❌ Invalid port '{}'. Tunnel not added.", raw);
            None
        }
    }
}

async fn prompt_kind(input: &mut mpsc::UnboundedReceiver<String>) -> Option<TunnelKind> {
    let raw = prompt(input, "Tunnel type (forward/reverse) [forward]: ").await?;
    match raw.as_str() {
        "" | "forward" => Some(TunnelKind::Forward),
        "reverse" => Some(TunnelKind::Reverse),
        other => {
            println!("❌ Invalid tunnel type '{}'. Tunnel not added.", other);
            None
        }
    }
}

async fn prompt_delay(input: &mut mpsc::UnboundedReceiver<String>) -> Option<u64> {
    let raw = prompt(input, "Reconnect delay (s) [5]: ").await?;
    if raw.is_empty() {
        return Some(5);
    }
    match raw.parse::<u64>() {
        Ok(delay) => Some(delay),
        Err(_) => {
            println!("❌ Invalid delay '{}'. Tunnel not added.", raw);
            None
        }
    }
}

fn print_help() {
    println!();
    println!("📋 Available Commands:");
    println!("  status        - Show tunnel status (default)");
    println!("  start         - Start all tunnels");
    println!("  start <name>  - Start specific tunnel");
    println!("  stop          - Stop all tunnels");
    println!("  stop <name>   - Stop specific tunnel");
    println!("  reset <name>  - Restart specific tunnel, zeroing its counter");
    println!("  add           - Add new tunnel interactively");
    println!("  test          - Probe the local port of every tunnel");
    println!("  test <name>   - Probe one tunnel's local port");
    println!("  debug         - Print the SSH command line for every tunnel");
    println!("  debug <name>  - Print one tunnel's SSH command line");
    println!("  diagnose      - Check logs dir, config file and key files");
    println!("  watch         - Live status updates (refresh every 2s)");
    println!("  quit          - Exit program");
    println!("  help          - Show this help");
    println!();
    println!("💡 Examples:");
    println!("  start db-prod   # Start specific tunnel");
    println!("  stop web-dev    # Stop specific tunnel");
    println!("  reset api-test  # Restart tunnel with reset counter");
    println!();
}

//! tunnelkeep - interactive supervisor for a fleet of SSH port forwards

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunnelkeep_cli::repl;
use tunnelkeep_core::{Registry, RegistrySettings, DEFAULT_CONFIG_PATH, DEFAULT_LOG_DIR};

/// Supervise a fleet of SSH port-forwarding tunnels
#[derive(Parser, Debug)]
#[command(name = "tunnelkeep")]
#[command(about = "Keep a fleet of SSH port forwards alive", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the tunnel configuration file
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for per-tunnel log files
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// SSH client binary to spawn
    #[arg(long, default_value = "ssh")]
    ssh_program: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("╔══════════════════════════════════════════════════════════════════════════╗");
    println!("║  tunnelkeep - SSH tunnel fleet supervisor                                ║");
    println!("╚══════════════════════════════════════════════════════════════════════════╝");
    println!();

    create_log_dir(&cli.log_dir)?;
    info!("📁 Logs directory: {:?}", cli.log_dir);

    let registry = Registry::new(RegistrySettings {
        config_path: cli.config.clone(),
        log_dir: cli.log_dir.clone(),
        ssh_program: cli.ssh_program.clone(),
    });

    info!("📋 Loading configuration from {:?}", cli.config);
    let loaded = match registry.load().await {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if loaded == 0 {
        eprintln!("⚠️  No tunnels configured, exiting.");
        std::process::exit(1);
    }
    info!("✅ Loaded {} tunnel(s) from config", loaded);

    spawn_signal_listener(registry.clone());

    info!("🚀 Auto-starting all tunnels...");
    registry.start_all().await;
    // Give the first attempts a moment before the initial render
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut input = spawn_stdin_reader();
    repl::run(&registry, &mut input).await;

    println!();
    println!("🛑 Initiating shutdown sequence...");
    registry.shutdown().await;
    println!("👋 All tunnels terminated.");
    Ok(())
}

fn create_log_dir(log_dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create logs directory {:?}", log_dir))?;
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(log_dir, Permissions::from_mode(0o755))
            .with_context(|| format!("failed to set permissions on {:?}", log_dir))?;
    }
    Ok(())
}

/// Flip the registry's shutdown flag on SIGINT or SIGTERM.
fn spawn_signal_listener(registry: Registry) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!("failed to install SIGTERM handler: {}", e);
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!("failed to install SIGINT handler: {}", e);
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => println!("\n🛑 Received SIGTERM, shutting down gracefully..."),
                _ = sigint.recv() => println!("\n🛑 Received SIGINT, shutting down gracefully..."),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n🛑 Received Ctrl+C, shutting down gracefully...");
            }
        }
        registry.begin_shutdown();
    });
}

/// Read stdin lines on a plain thread so a pending blocking read can never
/// stall runtime shutdown; the REPL consumes them through a channel.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

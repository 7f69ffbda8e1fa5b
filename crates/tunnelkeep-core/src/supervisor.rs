//! Per-tunnel supervision worker
//!
//! One task per tunnel. Each iteration spawns the external SSH client,
//! watches its early diagnostics through a settle window, classifies fatal
//! output, then waits for the child to exit and interprets the exit code.
//! The worker keeps retrying with the configured delay for as long as the
//! operator wants the tunnel up and the process is not shutting down.
//!
//! An attempt is a single fallible step: spawn, classify, wait, interpret.
//! Child cleanup happens in exactly one place per outcome, so no path can
//! reap the child twice.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;

use crate::classify::{classify_exit, classify_output};
use crate::events::EventLog;
use crate::registry::Slot;
use crate::ssh::SshCommand;
use crate::tunnel::{TunnelKind, TunnelSpec, TunnelStatus};

/// Settle window before early output is classified.
const FORWARD_SETTLE: Duration = Duration::from_secs(2);
/// Reverse tunnels need the server to set up the remote listener first.
const REVERSE_SETTLE: Duration = Duration::from_secs(5);

/// Everything a worker needs, handed over at spawn time.
pub(crate) struct WorkerCtx {
    pub(crate) table: Arc<Mutex<Vec<Slot>>>,
    pub(crate) index: usize,
    pub(crate) spec: TunnelSpec,
    pub(crate) events: Arc<EventLog>,
    pub(crate) ssh_program: PathBuf,
    pub(crate) cancel: watch::Receiver<bool>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// Outcome of one supervision attempt.
enum Attempt {
    /// Spawn failure, classified diagnostics, or a failing exit code.
    Failed {
        status: TunnelStatus,
        event: String,
    },
    /// The child exited with code 0.
    CleanExit,
    /// A stop request or global shutdown interrupted the attempt.
    Cancelled,
}

/// Worker entry point. Runs until the operator stops the tunnel or the
/// process shuts down, then records `Stopped` and returns.
pub(crate) async fn run(mut ctx: WorkerCtx) {
    let mut attempt_no = 0;
    loop {
        if !should_run(&ctx).await {
            break;
        }

        attempt_no = mark_attempt(&ctx).await;
        ctx.events.append(attempt_no, "🚀 Starting SSH tunnel");
        if ctx.spec.kind == TunnelKind::Reverse {
            ctx.events.append(
                attempt_no,
                &format!(
                    "🌐 Reverse tunnel: remote port {} opens on {}",
                    ctx.spec.remote_port, ctx.spec.host
                ),
            );
        }

        match run_attempt(&mut ctx, attempt_no).await {
            Attempt::Failed { status, event } => {
                set_status(&ctx, status).await;
                ctx.events.append(attempt_no, &event);
            }
            Attempt::CleanExit => {
                if should_run(&ctx).await {
                    set_status(&ctx, TunnelStatus::Reconnecting).await;
                    ctx.events
                        .append(attempt_no, "💔 Tunnel died, reconnecting...");
                } else {
                    ctx.events.append(attempt_no, "🛑 Tunnel stopped by user");
                    break;
                }
            }
            Attempt::Cancelled => {
                ctx.events.append(attempt_no, "🛑 Tunnel stopped by user");
                break;
            }
        }

        if !pause_before_retry(&mut ctx).await {
            break;
        }
    }

    set_status(&ctx, TunnelStatus::Stopped).await;
    ctx.events.append(attempt_no, "👋 Tunnel worker exiting");
}

/// One supervision attempt over one SSH child.
async fn run_attempt(ctx: &mut WorkerCtx, attempt_no: u32) -> Attempt {
    let cmd = SshCommand::for_tunnel(&ctx.ssh_program, &ctx.spec);
    ctx.events.append(attempt_no, "📡 Executing SSH command");

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Attempt::Failed {
                status: TunnelStatus::Error,
                event: format!("❌ Failed to start SSH process: {}", e),
            }
        }
    };
    let mut output = capture_output(&mut child);

    // Settle window: give the client time to emit its fatal diagnostics.
    let settle = match ctx.spec.kind {
        TunnelKind::Forward => FORWARD_SETTLE,
        TunnelKind::Reverse => REVERSE_SETTLE,
    };
    let interrupted = tokio::select! {
        _ = sleep(settle) => false,
        _ = ctx.cancel.changed() => true,
        _ = ctx.shutdown.changed() => true,
    };
    if interrupted {
        return reap(child, &mut output, &ctx.events, attempt_no).await;
    }

    // Drain whatever arrived during the window; classification sees it all
    // at once, so the match is sticky for this attempt.
    let mut early = String::new();
    while let Ok(line) = output.try_recv() {
        ctx.events.append(attempt_no, &line);
        if !early.is_empty() {
            early.push('\n');
        }
        early.push_str(&line);
    }
    if let Some(kind) = classify_output(&early) {
        let _ = child.start_kill();
        let _ = child.wait().await;
        drain_output(&mut output, &ctx.events, attempt_no);
        return Attempt::Failed {
            status: kind.status(),
            event: kind.describe().to_string(),
        };
    }

    set_status(ctx, TunnelStatus::Running).await;
    ctx.events
        .append(attempt_no, "✅ Tunnel established successfully");

    let waited = tokio::select! {
        res = child.wait() => Some(res),
        _ = ctx.cancel.changed() => None,
        _ = ctx.shutdown.changed() => None,
    };
    let Some(waited) = waited else {
        return reap(child, &mut output, &ctx.events, attempt_no).await;
    };
    drain_output(&mut output, &ctx.events, attempt_no);

    match waited {
        Ok(exit) => match classify_exit(exit) {
            None => Attempt::CleanExit,
            Some(kind) => Attempt::Failed {
                status: kind.status(),
                event: exit_event(exit),
            },
        },
        Err(e) => Attempt::Failed {
            status: TunnelStatus::Error,
            event: format!("❌ Failed to reap SSH process: {}", e),
        },
    }
}

fn exit_event(exit: std::process::ExitStatus) -> String {
    match exit.code() {
        Some(255) => "🔐 SSH exited with authentication failure (exit code 255)".to_string(),
        Some(code) => format!("❌ SSH exited with code {}", code),
        None => "❌ SSH terminated by signal".to_string(),
    }
}

/// Kill the child (if still up), reap it, and flush remaining output lines.
async fn reap(
    mut child: Child,
    output: &mut mpsc::UnboundedReceiver<String>,
    events: &EventLog,
    attempt_no: u32,
) -> Attempt {
    let _ = child.start_kill();
    let _ = child.wait().await;
    drain_output(output, events, attempt_no);
    Attempt::Cancelled
}

/// Forward both captured streams into one line channel.
fn capture_output(child: &mut Child) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx));
    }
    rx
}

async fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

fn drain_output(output: &mut mpsc::UnboundedReceiver<String>, events: &EventLog, attempt_no: u32) {
    while let Ok(line) = output.try_recv() {
        events.append(attempt_no, &line);
    }
}

/// Whether the worker should begin (or continue with) another attempt.
async fn should_run(ctx: &WorkerCtx) -> bool {
    if *ctx.shutdown.borrow() || *ctx.cancel.borrow() {
        return false;
    }
    let table = ctx.table.lock().await;
    table[ctx.index].desired_up
}

/// Record the start of an attempt and return the new restart count.
async fn mark_attempt(ctx: &WorkerCtx) -> u32 {
    let mut table = ctx.table.lock().await;
    let slot = &mut table[ctx.index];
    slot.status = TunnelStatus::Starting;
    slot.restart_count += 1;
    slot.last_restart = Some(Local::now());
    slot.restart_count
}

async fn set_status(ctx: &WorkerCtx, status: TunnelStatus) {
    let mut table = ctx.table.lock().await;
    table[ctx.index].status = status;
}

/// Sleep the reconnect delay. Returns false when the worker should stop
/// instead of retrying.
async fn pause_before_retry(ctx: &mut WorkerCtx) -> bool {
    if !should_run(ctx).await {
        return false;
    }
    let delay = Duration::from_secs(ctx.spec.reconnect_delay);
    tokio::select! {
        _ = sleep(delay) => true,
        _ = ctx.cancel.changed() => false,
        _ = ctx.shutdown.changed() => false,
    }
}

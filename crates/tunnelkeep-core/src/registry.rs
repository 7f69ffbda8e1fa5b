//! Tunnel registry
//!
//! Holds the authoritative table of tunnel definitions and their runtime
//! state, and serializes every mutation behind one lock. The REPL (or any
//! other control surface) talks only to the registry; workers update their
//! own slot through the same lock.
//!
//! Locking discipline: joining a worker MUST happen with the lock released,
//! because the worker takes the same lock to record its final status. Every
//! operation here that awaits a `JoinHandle` first takes the handle out of
//! the slot and drops the guard.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{self, DEFAULT_CONFIG_PATH, DEFAULT_LOG_DIR, MAX_TUNNELS};
use crate::error::{Error, Result};
use crate::events::EventLog;
use crate::supervisor::{self, WorkerCtx};
use crate::tunnel::{TunnelSnapshot, TunnelSpec, TunnelStatus};

/// Paths and programs the registry operates with.
///
/// Tests point `ssh_program` at a scripted stand-in and the paths into a
/// temporary directory.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Config document read at startup and rewritten on `save`/`add`
    pub config_path: PathBuf,
    /// Directory for per-tunnel event logs
    pub log_dir: PathBuf,
    /// External SSH client to spawn
    pub ssh_program: PathBuf,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            ssh_program: PathBuf::from("ssh"),
        }
    }
}

/// Result of a `start` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// The tunnel was already desired-up; the request was a no-op.
    AlreadyRunning,
}

/// One table entry: the spec plus all runtime state. All fields are guarded
/// by the registry lock.
pub(crate) struct Slot {
    pub(crate) spec: TunnelSpec,
    pub(crate) status: TunnelStatus,
    pub(crate) restart_count: u32,
    pub(crate) last_restart: Option<DateTime<Local>>,
    /// Operator intent: true while the tunnel should be kept up
    pub(crate) desired_up: bool,
    /// Cancel signal for the current worker, present iff one was spawned
    pub(crate) cancel: Option<watch::Sender<bool>>,
    pub(crate) worker: Option<JoinHandle<()>>,
    pub(crate) events: Arc<EventLog>,
}

impl Slot {
    fn new(spec: TunnelSpec, events: Arc<EventLog>) -> Self {
        Self {
            spec,
            status: TunnelStatus::Stopped,
            restart_count: 0,
            last_restart: None,
            desired_up: false,
            cancel: None,
            worker: None,
            events,
        }
    }
}

/// The tunnel manager. Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct Registry {
    table: Arc<Mutex<Vec<Slot>>>,
    shutdown: Arc<watch::Sender<bool>>,
    settings: Arc<RegistrySettings>,
}

impl Registry {
    pub fn new(settings: RegistrySettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            table: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(shutdown),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Load tunnel definitions from the config file, appending to the table
    /// and opening each tunnel's event log. Returns the number loaded.
    pub async fn load(&self) -> Result<usize> {
        let specs = config::read_specs(&self.settings.config_path)?;

        let mut table = self.table.lock().await;
        let mut loaded = 0;
        for spec in specs {
            if table.len() >= MAX_TUNNELS {
                warn!("tunnel table full, skipping '{}'", spec.name);
                continue;
            }
            if table.iter().any(|s| s.spec.name == spec.name) {
                warn!("duplicate tunnel name '{}', skipping", spec.name);
                continue;
            }
            warn_on_key_problems(&spec);
            let events = Arc::new(EventLog::open(&self.settings.log_dir, &spec.name)?);
            table.push(Slot::new(spec, events));
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Persist the configuration subset of the table.
    ///
    /// Snapshots under the lock, releases it, then writes.
    pub async fn save(&self) -> Result<()> {
        let specs: Vec<TunnelSpec> = {
            let table = self.table.lock().await;
            table.iter().map(|s| s.spec.clone()).collect()
        };
        config::write_specs(&self.settings.config_path, &specs)?;
        info!("💾 Configuration saved to {:?}", self.settings.config_path);
        Ok(())
    }

    /// Register a new tunnel and persist the table.
    ///
    /// A persistence failure is returned to the caller but does not roll
    /// back the in-memory registration.
    pub async fn add(&self, spec: TunnelSpec) -> Result<()> {
        spec.validate()?;
        {
            let mut table = self.table.lock().await;
            if table.len() >= MAX_TUNNELS {
                return Err(Error::TableFull(MAX_TUNNELS));
            }
            if table.iter().any(|s| s.spec.name == spec.name) {
                return Err(Error::DuplicateName(spec.name));
            }
            warn_on_key_problems(&spec);
            let events = Arc::new(EventLog::open(&self.settings.log_dir, &spec.name)?);
            table.push(Slot::new(spec, events));
        }
        self.save().await
    }

    /// Start one tunnel. Double-start is a warned no-op.
    pub async fn start(&self, name: &str) -> Result<StartOutcome> {
        let mut table = self.table.lock().await;
        let index = index_of(&table, name)?;
        if table[index].desired_up {
            warn!("⚠️  Tunnel '{}' is already running", name);
            return Ok(StartOutcome::AlreadyRunning);
        }
        self.spawn_worker_locked(&mut table, index);
        Ok(StartOutcome::Started)
    }

    /// Start every tunnel that is not already desired-up. Returns the number
    /// of workers spawned.
    pub async fn start_all(&self) -> usize {
        let mut table = self.table.lock().await;
        let mut started = 0;
        for index in 0..table.len() {
            if !table[index].desired_up {
                self.spawn_worker_locked(&mut table, index);
                started += 1;
            }
        }
        started
    }

    /// Stop one tunnel and wait for its worker to finish.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let handle = {
            let mut table = self.table.lock().await;
            let index = index_of(&table, name)?;
            let slot = &mut table[index];
            slot.desired_up = false;
            if let Some(cancel) = slot.cancel.take() {
                let _ = cancel.send(true);
            }
            slot.worker.take()
        };
        // Join with the lock released; the worker records Stopped itself.
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!("worker for '{}' panicked", name);
            }
        }
        Ok(())
    }

    /// Stop every tunnel and wait for all workers to finish.
    pub async fn stop_all(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut table = self.table.lock().await;
            table
                .iter_mut()
                .filter_map(|slot| {
                    slot.desired_up = false;
                    if let Some(cancel) = slot.cancel.take() {
                        let _ = cancel.send(true);
                    }
                    slot.worker.take().map(|h| (slot.spec.name.clone(), h))
                })
                .collect()
        };
        for (name, handle) in handles {
            if handle.await.is_err() {
                warn!("worker for '{}' panicked", name);
            }
        }
    }

    /// Stop-then-start one tunnel, zeroing its restart counter in between.
    pub async fn reset(&self, name: &str) -> Result<()> {
        self.stop(name).await?;
        let mut table = self.table.lock().await;
        let index = index_of(&table, name)?;
        table[index].restart_count = 0;
        self.spawn_worker_locked(&mut table, index);
        Ok(())
    }

    /// Read-only copy of the table for rendering, probing and `debug`.
    pub async fn snapshot(&self) -> Vec<TunnelSnapshot> {
        let table = self.table.lock().await;
        table
            .iter()
            .map(|slot| TunnelSnapshot {
                spec: slot.spec.clone(),
                status: slot.status,
                restart_count: slot.restart_count,
                last_restart: slot.last_restart,
                active: slot.worker.is_some(),
            })
            .collect()
    }

    /// Flip the process-wide shutdown flag. Workers observe it at their next
    /// suspension point and wind down to `Stopped`.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Shut down: flip the flag, then stop and join every worker.
    pub async fn shutdown(&self) {
        self.begin_shutdown();
        self.stop_all().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A receiver on the shutdown flag, for the REPL and renderer.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn spawn_worker_locked(&self, table: &mut [Slot], index: usize) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let slot = &mut table[index];
        slot.desired_up = true;
        let ctx = WorkerCtx {
            table: Arc::clone(&self.table),
            index,
            spec: slot.spec.clone(),
            events: Arc::clone(&slot.events),
            ssh_program: self.settings.ssh_program.clone(),
            cancel: cancel_rx,
            shutdown: self.shutdown.subscribe(),
        };
        slot.cancel = Some(cancel_tx);
        slot.worker = Some(tokio::spawn(supervisor::run(ctx)));
    }
}

fn index_of(table: &[Slot], name: &str) -> Result<usize> {
    table
        .iter()
        .position(|s| s.spec.name == name)
        .ok_or_else(|| Error::UnknownTunnel(name.to_string()))
}

/// Warn about an absent or overly-permissive private key file. The tunnel is
/// still registered; SSH itself will refuse the key at connect time.
fn warn_on_key_problems(spec: &TunnelSpec) {
    match std::fs::metadata(&spec.ssh_key) {
        Err(_) => warn!(
            "⚠️  Key file {:?} for tunnel '{}' does not exist",
            spec.ssh_key, spec.name
        ),
        #[cfg(unix)]
        Ok(meta) => {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                warn!(
                    "⚠️  Key file {:?} for tunnel '{}' has mode {:o}; SSH requires 0600 or tighter",
                    spec.ssh_key, spec.name, mode
                );
            }
        }
        #[cfg(not(unix))]
        Ok(_) => {}
    }
}

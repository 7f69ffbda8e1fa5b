//! Tunnel supervision library - Public API
//!
//! Owns the tunnel registry, the per-tunnel supervisor workers, the SSH
//! invocation contract and the failure classification table. The CLI crate
//! layers the interactive command surface on top of this.

pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod probe;
pub mod registry;
pub mod ssh;
mod supervisor;
pub mod tunnel;

pub use classify::FailureKind;
pub use config::{DEFAULT_CONFIG_PATH, DEFAULT_LOG_DIR, MAX_TUNNELS};
pub use error::{Error, Result};
pub use registry::{Registry, RegistrySettings, StartOutcome};
pub use ssh::SshCommand;
pub use tunnel::{TunnelKind, TunnelSnapshot, TunnelSpec, TunnelStatus};

//! Tunnel model: configuration record, direction, status and snapshots

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum length for a tunnel name; the name doubles as the log filename stem.
pub const MAX_NAME_LEN: usize = 63;

/// Direction of the port forward carried by a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TunnelKind {
    /// `-L`: a local socket accepts connections, the peer is reached from the
    /// SSH server side.
    #[default]
    Forward,
    /// `-R`: a socket on the SSH server accepts connections, the local side
    /// services them.
    Reverse,
}

impl fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelKind::Forward => write!(f, "forward"),
            TunnelKind::Reverse => write!(f, "reverse"),
        }
    }
}

/// Configuration record for a single tunnel.
///
/// This is exactly the field subset that is persisted; runtime state lives in
/// the registry slot, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// Unique tunnel name, also used as the log filename stem
    pub name: String,

    /// SSH login user
    pub user: String,

    /// SSH server host
    pub host: String,

    /// SSH server port
    pub port: u16,

    /// Path to the private key file used for authentication
    pub ssh_key: PathBuf,

    /// Forward or reverse; absent in older config files, defaults to forward
    #[serde(rename = "type", default)]
    pub kind: TunnelKind,

    /// Local side of the forward
    pub local_port: u16,

    /// Inner host of the forward; for reverse tunnels the host reachable
    /// from the local side
    pub remote_host: String,

    /// Inner port of the forward
    pub remote_port: u16,

    /// Seconds between supervision attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
}

fn default_reconnect_delay() -> u64 {
    5
}

impl TunnelSpec {
    /// Validate field presence and ranges.
    ///
    /// Serde already rejects out-of-range port numbers; this adds the
    /// zero-port, empty-string and name-shape checks the wire types cannot
    /// express.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidSpec("tunnel name cannot be empty".into()));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidSpec(format!(
                "tunnel name '{}' exceeds {} characters",
                self.name, MAX_NAME_LEN
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::InvalidSpec(format!(
                "tunnel name '{}' must contain only alphanumerics, '-', '_' and '.'",
                self.name
            )));
        }
        if self.user.is_empty() {
            return Err(Error::InvalidSpec("SSH user cannot be empty".into()));
        }
        if self.host.is_empty() {
            return Err(Error::InvalidSpec("SSH host cannot be empty".into()));
        }
        if self.ssh_key.as_os_str().is_empty() {
            return Err(Error::InvalidSpec("SSH key path cannot be empty".into()));
        }
        if self.remote_host.is_empty() {
            return Err(Error::InvalidSpec("remote host cannot be empty".into()));
        }
        for (label, port) in [
            ("port", self.port),
            ("local_port", self.local_port),
            ("remote_port", self.remote_port),
        ] {
            if port == 0 {
                return Err(Error::InvalidSpec(format!(
                    "{} must be between 1 and 65535",
                    label
                )));
            }
        }
        Ok(())
    }

    /// The `-L`/`-R` forwarding specification for this tunnel.
    pub fn forward_spec(&self) -> String {
        match self.kind {
            TunnelKind::Forward => format!(
                "{}:{}:{}",
                self.local_port, self.remote_host, self.remote_port
            ),
            TunnelKind::Reverse => format!(
                "{}:{}:{}",
                self.remote_port, self.remote_host, self.local_port
            ),
        }
    }

    /// Human-readable connection chain; arrow direction reflects the kind.
    pub fn chain(&self) -> String {
        match self.kind {
            TunnelKind::Forward => format!(
                "localhost:{} ➔ {}@{}:{} ➔ {}:{}",
                self.local_port, self.user, self.host, self.port, self.remote_host, self.remote_port
            ),
            TunnelKind::Reverse => format!(
                "{}@{}:{} ➔ localhost ➔ {}:{}",
                self.user, self.host, self.remote_port, self.remote_host, self.local_port
            ),
        }
    }
}

/// State-machine token for one tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    /// No worker exists
    Stopped,
    /// Worker is spawning/settling an SSH child
    Starting,
    /// SSH child is up and unclassified
    Running,
    /// Child exited cleanly, worker is between attempts
    Reconnecting,
    /// Generic connection failure
    Error,
    /// Authentication failure (diagnostic output or exit code 255)
    AuthError,
    /// Port conflict on either side of the forward
    PortError,
}

impl TunnelStatus {
    /// True for the three error buckets.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            TunnelStatus::Error | TunnelStatus::AuthError | TunnelStatus::PortError
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TunnelStatus::Stopped => "STOPPED",
            TunnelStatus::Starting => "STARTING",
            TunnelStatus::Running => "RUNNING",
            TunnelStatus::Reconnecting => "RECONNECTING",
            TunnelStatus::Error => "ERROR",
            TunnelStatus::AuthError => "AUTH_ERROR",
            TunnelStatus::PortError => "PORT_ERROR",
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Read-only projection of one registry slot.
#[derive(Debug, Clone)]
pub struct TunnelSnapshot {
    pub spec: TunnelSpec,
    pub status: TunnelStatus,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Local>>,
    /// Whether a worker handle currently exists for this tunnel
    pub active: bool,
}

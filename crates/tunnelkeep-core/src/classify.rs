//! Failure classification for SSH diagnostic output and exit codes
//!
//! The SSH client reports most fatal conditions as free-text diagnostics on
//! stderr before (or instead of) exiting. Classification is a case-sensitive
//! substring scan over the early output of an attempt, with a fixed
//! precedence: authentication beats port conflicts beats generic failures.
//! The pattern table lives here in one place so tests can enumerate it.

use std::process::ExitStatus;

use crate::tunnel::TunnelStatus;

/// Substrings that indicate an authentication failure.
pub const AUTH_PATTERNS: &[&str] = &[
    "Permission denied",
    "Authentication failed",
    "Permissions",
    "too open",
];

/// Substrings that indicate a port conflict on either side of the forward.
pub const PORT_PATTERNS: &[&str] = &[
    "bind: Address already in use",
    "remote port forwarding failed",
    "Warning: remote port forwarding failed",
    "cannot listen to port",
    "bind: Cannot assign requested address",
];

/// Substrings that indicate a generic connection failure.
pub const CONNECT_PATTERNS: &[&str] = &[
    "Connection refused",
    "Host key verification failed",
    "No such file",
    "Could not resolve hostname",
];

/// Exit code OpenSSH uses for connection/authentication level failures.
const SSH_FATAL_EXIT_CODE: i32 = 255;

/// Failure bucket derived from an attempt's diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    Port,
    Connection,
}

impl FailureKind {
    /// The tunnel status this bucket maps to.
    pub fn status(&self) -> TunnelStatus {
        match self {
            FailureKind::Auth => TunnelStatus::AuthError,
            FailureKind::Port => TunnelStatus::PortError,
            FailureKind::Connection => TunnelStatus::Error,
        }
    }

    /// Event-log message for a diagnostic-output match.
    pub fn describe(&self) -> &'static str {
        match self {
            FailureKind::Auth => "🔐 Authentication failure detected in SSH output",
            FailureKind::Port => "🚧 Port conflict detected in SSH output",
            FailureKind::Connection => "❌ Connection failure detected in SSH output",
        }
    }
}

/// Classify accumulated early output. Returns `None` when no pattern matches.
///
/// Precedence: AUTH > PORT > generic, regardless of where in the text the
/// substrings appear.
pub fn classify_output(output: &str) -> Option<FailureKind> {
    if AUTH_PATTERNS.iter().any(|p| output.contains(p)) {
        return Some(FailureKind::Auth);
    }
    if PORT_PATTERNS.iter().any(|p| output.contains(p)) {
        return Some(FailureKind::Port);
    }
    if CONNECT_PATTERNS.iter().any(|p| output.contains(p)) {
        return Some(FailureKind::Connection);
    }
    None
}

/// Classify a child exit status. Returns `None` for a clean exit.
pub fn classify_exit(status: ExitStatus) -> Option<FailureKind> {
    match status.code() {
        Some(0) => None,
        Some(SSH_FATAL_EXIT_CODE) => Some(FailureKind::Auth),
        // Killed by signal or any other nonzero code
        _ => Some(FailureKind::Connection),
    }
}

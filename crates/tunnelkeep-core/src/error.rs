//! Library error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by registry and configuration operations.
///
/// Worker-internal failures never appear here; they are absorbed into the
/// tunnel's status and retried by its supervisor.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read config file {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in config file {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("config file {path:?} must contain a top-level 'tunnels' array")]
    ConfigShape { path: PathBuf },

    #[error("cannot write config file {path:?}: {source}")]
    ConfigWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot encode config document: {0}")]
    ConfigEncode(#[from] serde_json::Error),

    #[error("tunnel '{0}' not found")]
    UnknownTunnel(String),

    #[error("a tunnel named '{0}' already exists")]
    DuplicateName(String),

    #[error("tunnel table is full ({0} entries)")]
    TableFull(usize),

    #[error("invalid tunnel definition: {0}")]
    InvalidSpec(String),

    #[error("cannot open log file {path:?}: {source}")]
    LogOpen {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

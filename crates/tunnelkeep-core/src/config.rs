//! Configuration document load and store
//!
//! The on-disk format is a single JSON object with one top-level `tunnels`
//! array. Loading is tolerant per entry: a malformed element is skipped with
//! a warning and the rest of the file still loads. Writing re-emits the
//! configuration subset pretty-printed, through a temp file + rename so a
//! crash mid-write cannot truncate the previous document.

use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::tunnel::TunnelSpec;

/// Default configuration path, overridable by the first CLI argument.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Default per-tunnel log directory, created at startup.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Fixed capacity of the tunnel table.
pub const MAX_TUNNELS: usize = 32;

/// Read and validate tunnel specs from `path`.
///
/// Fails when the file is unreadable, is not valid JSON, or lacks a
/// top-level `tunnels` array. Individual bad entries and entries beyond
/// [`MAX_TUNNELS`] are skipped with a warning.
pub fn read_specs(path: &Path) -> Result<Vec<TunnelSpec>> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;

    let doc: serde_json::Value =
        serde_json::from_str(&raw).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;

    let entries = doc
        .get("tunnels")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::ConfigShape {
            path: path.to_path_buf(),
        })?;

    let mut specs: Vec<TunnelSpec> = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        if specs.len() >= MAX_TUNNELS {
            warn!(
                "config {:?}: skipping entries past the table capacity ({})",
                path, MAX_TUNNELS
            );
            break;
        }
        let spec: TunnelSpec = match serde_json::from_value(entry.clone()) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("config {:?}: skipping invalid entry #{}: {}", path, index, e);
                continue;
            }
        };
        if let Err(e) = spec.validate() {
            warn!(
                "config {:?}: skipping entry #{} ('{}'): {}",
                path, index, spec.name, e
            );
            continue;
        }
        if specs.iter().any(|s| s.name == spec.name) {
            warn!(
                "config {:?}: skipping entry #{}: duplicate name '{}'",
                path, index, spec.name
            );
            continue;
        }
        specs.push(spec);
    }

    Ok(specs)
}

/// Write `specs` to `path` as a pretty-printed document.
pub fn write_specs(path: &Path, specs: &[TunnelSpec]) -> Result<()> {
    let doc = serde_json::json!({ "tunnels": specs });
    let pretty = serde_json::to_string_pretty(&doc)?;

    let tmp_path = path.with_extension("json.tmp");
    let write = |p: &Path| -> std::io::Result<()> {
        std::fs::write(p, &pretty)?;
        std::fs::rename(p, path)
    };
    write(&tmp_path).map_err(|source| Error::ConfigWrite {
        path: path.to_path_buf(),
        source,
    })
}

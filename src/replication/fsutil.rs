//! Path-validated segment file access for replication.
//!
//! Segment names cross the wire, so every name is checked against the
//! `wal-<id>.log` grammar and for traversal before any path under the
//! data directory is touched.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::wal::parse_segment_name;

/// Resolve `name` under `dir`, refusing anything that could escape it.
pub fn validate_segment_path(dir: &Path, name: &str) -> Result<PathBuf> {
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(Error::ReplicationProtocol(format!(
            "path traversal detected in segment name: {name:?}"
        )));
    }

    if parse_segment_name(name).is_none() {
        return Err(Error::ReplicationProtocol(format!(
            "invalid segment name format: {name:?}"
        )));
    }

    Ok(dir.join(name))
}

/// Read a whole segment file after path validation
pub fn read_segment(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = validate_segment_path(dir, name)?;
    std::fs::read(path).map_err(Error::Io)
}

//! Replication Module
//!
//! Ships WAL segment bytes from the master to its replicas so that a
//! replica's data directory is byte-identical to the master's WAL tail.
//! The wire protocol is a textual header line followed by raw payload:
//! replicas report `<last_segment_id> <last_segment_size>`, the master
//! answers with `<segment_id> <payload_size>` frames and the raw bytes.

mod fsutil;
mod master;
mod replica;

pub use fsutil::{read_segment, validate_segment_path};
pub use master::Master;
pub use replica::Replica;

use crate::error::{Error, Result};

/// A replica with no segments reports this id
pub(crate) const NO_SEGMENT: i64 = -1;

/// Format one protocol header line
pub(crate) fn format_frame(segment_id: i64, size: i64) -> String {
    format!("{segment_id} {size}\n")
}

/// Parse one protocol header line into `(segment_id, size)`
pub(crate) fn parse_frame(line: &str) -> Result<(i64, i64)> {
    let mut parts = line.split_whitespace();
    let segment_id = parts.next().and_then(|s| s.parse().ok());
    let size = parts.next().and_then(|s| s.parse().ok());

    match (segment_id, size, parts.next()) {
        (Some(segment_id), Some(size), None) => Ok((segment_id, size)),
        _ => Err(Error::ReplicationProtocol(format!(
            "malformed frame header: {line:?}"
        ))),
    }
}

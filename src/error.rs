//! DenKV Error Types

use thiserror::Error;

/// Result type alias for DenKV operations
pub type Result<T> = std::result::Result<T, Error>;

/// DenKV error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Command errors
    #[error("unknown command")]
    InvalidCommand,

    #[error("invalid {0} command format")]
    InvalidArgs(&'static str),

    #[error("key not found")]
    KeyNotFound,

    #[error("replica is read-only: only GET and HELP commands are allowed")]
    ReadOnlyReplica,

    // WAL errors
    #[error("WAL already closed")]
    WalClosed,

    #[error("failed to write entry: {0}")]
    WalWrite(String),

    #[error("failed to sync WAL: {0}")]
    WalSync(String),

    #[error("failed to rotate segment: {0}")]
    WalRotate(String),

    #[error("failed to flush final batch: {0}")]
    WalFlushFinal(String),

    // Segment and recovery errors
    #[error("failed to create segment: {0}")]
    SegmentCreate(String),

    #[error("failed to open segment {segment}: {reason}")]
    SegmentOpen { segment: String, reason: String },

    #[error("corrupt entry in segment {segment} at offset {offset}")]
    SegmentCorrupt { segment: String, offset: u64 },

    // Replication errors
    #[error("replication error: {0}")]
    Replication(String),

    #[error("replication protocol violation: {0}")]
    ReplicationProtocol(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient replication failures are handled by reconnecting;
    /// protocol violations tear the session down for good.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Replication(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Replication("connection reset".into()).is_transient());
        assert!(Error::Io(std::io::Error::other("boom")).is_transient());
        assert!(!Error::ReplicationProtocol("path traversal detected".into()).is_transient());
        assert!(!Error::WalClosed.is_transient());
    }

    #[test]
    fn test_client_facing_messages() {
        assert_eq!(Error::KeyNotFound.to_string(), "key not found");
        assert_eq!(
            Error::ReadOnlyReplica.to_string(),
            "replica is read-only: only GET and HELP commands are allowed"
        );
    }
}

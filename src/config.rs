//! DenKV Configuration
//!
//! Configuration structures for a DenKV node, loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main DenKV configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Client-facing network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Write-Ahead Log configuration
    #[serde(default)]
    pub wal: WalConfig,

    /// Replication configuration
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine type; only "in_memory" is supported
    #[serde(rename = "type", default = "default_engine_type")]
    pub engine_type: String,
}

/// Client-facing network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address to listen on for client connections
    #[serde(default = "default_address")]
    pub address: String,

    /// Maximum number of simultaneous client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum size of a single request line (human-readable: B, KB, MB, GB)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: String,

    /// Connection idle timeout in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log destination: "stdout" or a file path
    #[serde(default = "default_log_output")]
    pub output: String,
}

/// Write-Ahead Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Enable the WAL; without it writes are not durable
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of entries that triggers a batch flush
    #[serde(default = "default_flushing_batch_size")]
    pub flushing_batch_size: usize,

    /// Maximum time an entry waits in a batch, in milliseconds
    #[serde(default = "default_flushing_batch_timeout_ms")]
    pub flushing_batch_timeout_ms: u64,

    /// Segment rotation threshold (human-readable: B, KB, MB, GB)
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: String,

    /// Directory holding the segment files
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
}

/// Node role in replication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaType {
    Master,
    Replica,
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Role of this node
    #[serde(default = "default_replica_type")]
    pub replica_type: ReplicaType,

    /// Master host: bind host on the master, target host on a replica
    #[serde(default = "default_master_host")]
    pub master_host: String,

    /// Dedicated port for WAL shipping, separate from the client port
    #[serde(default = "default_replication_port")]
    pub replication_port: u16,

    /// Pause between sync cycles on the replica, in milliseconds
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Delay between reconnect attempts, in milliseconds
    #[serde(default = "default_sync_retry_delay_ms")]
    pub sync_retry_delay_ms: u64,

    /// Reconnect attempts before the outer loop backs off
    #[serde(default = "default_sync_retry_count")]
    pub sync_retry_count: u32,

    /// Master-side read timeout for replica tail reports, in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_engine_type() -> String {
    "in_memory".to_string()
}

fn default_address() -> String {
    "127.0.0.1:3223".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_max_message_size() -> String {
    "4KB".to_string()
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

fn default_true() -> bool {
    true
}

fn default_flushing_batch_size() -> usize {
    100
}

fn default_flushing_batch_timeout_ms() -> u64 {
    10
}

fn default_max_segment_size() -> String {
    "10MB".to_string()
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("./wal")
}

fn default_replica_type() -> ReplicaType {
    ReplicaType::Master
}

fn default_master_host() -> String {
    String::new()
}

fn default_replication_port() -> u16 {
    3232
}

fn default_sync_interval_ms() -> u64 {
    1000
}

fn default_sync_retry_delay_ms() -> u64 {
    500
}

fn default_sync_retry_count() -> u32 {
    3
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_type: default_engine_type(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
        }
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flushing_batch_size: default_flushing_batch_size(),
            flushing_batch_timeout_ms: default_flushing_batch_timeout_ms(),
            max_segment_size: default_max_segment_size(),
            data_directory: default_data_directory(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replica_type: default_replica_type(),
            master_host: default_master_host(),
            replication_port: default_replication_port(),
            sync_interval_ms: default_sync_interval_ms(),
            sync_retry_delay_ms: default_sync_retry_delay_ms(),
            sync_retry_count: default_sync_retry_count(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    /// Idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Maximum request size in bytes
    pub fn max_message_bytes(&self) -> crate::Result<u64> {
        parse_size(&self.max_message_size)
    }
}

impl WalConfig {
    /// Batch timeout as a Duration
    pub fn flushing_batch_timeout(&self) -> Duration {
        Duration::from_millis(self.flushing_batch_timeout_ms)
    }

    /// Segment rotation threshold in bytes
    pub fn max_segment_bytes(&self) -> crate::Result<u64> {
        parse_size(&self.max_segment_size)
    }
}

impl ReplicationConfig {
    /// Sync interval as a Duration
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Retry delay as a Duration
    pub fn sync_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sync_retry_delay_ms)
    }

    /// Master-side read timeout as a Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.engine.engine_type != "in_memory" {
            return Err(crate::Error::Config(format!(
                "unsupported engine.type: {}",
                self.engine.engine_type
            )));
        }

        if self.network.address.is_empty() {
            return Err(crate::Error::Config("network.address cannot be empty".into()));
        }

        self.network.max_message_bytes()?;
        self.wal.max_segment_bytes()?;

        if self.wal.enabled && self.wal.flushing_batch_size == 0 {
            return Err(crate::Error::Config(
                "wal.flushing_batch_size must be at least 1".into(),
            ));
        }

        if self.replication.replica_type == ReplicaType::Replica
            && self.replication.master_host.is_empty()
        {
            return Err(crate::Error::Config(
                "replication.master_host is required on a replica".into(),
            ));
        }

        Ok(())
    }
}

/// Converts a human-readable size string (e.g. "10MB", "512 kb") to bytes.
/// Supported suffixes: B, KB, MB, GB; case-insensitive, optional spaces.
pub fn parse_size(size: &str) -> crate::Result<u64> {
    let normalized: String = size
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if normalized.is_empty() {
        return Err(crate::Error::Config("empty size string".into()));
    }

    const SUFFIXES: [(&str, u64); 4] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10), ("B", 1)];

    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| normalized.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((normalized.as_str(), 1));

    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(crate::Error::Config(format!("invalid size format: {size:?}")));
    }

    let value: u64 = number
        .parse()
        .map_err(|_| crate::Error::Config(format!("invalid size number: {number:?}")))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| crate::Error::Config(format!("size overflows u64: {size:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("42").unwrap(), 42);
        assert_eq!(parse_size("50B").unwrap(), 50);
        assert_eq!(parse_size("4KB").unwrap(), 4096);
        assert_eq!(parse_size("10MB").unwrap(), 10 << 20);
        assert_eq!(parse_size("2GB").unwrap(), 2 << 30);
        assert_eq!(parse_size("2 gb").unwrap(), 2 << 30);
        assert_eq!(parse_size(" 512 Kb ").unwrap(), 512 << 10);
    }

    #[test]
    fn test_parse_size_invalid() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("ten MB").is_err());
        assert!(parse_size("10TB").is_err());
        assert!(parse_size("-5KB").is_err());
        assert!(parse_size("999999999999999GB").is_err());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[engine]
type = "in_memory"

[network]
address = "127.0.0.1:3223"
max_connections = 50
max_message_size = "4KB"
idle_timeout_ms = 60000

[logging]
level = "debug"
format = "json"

[wal]
enabled = true
flushing_batch_size = 100
flushing_batch_timeout_ms = 10
max_segment_size = "10MB"
data_directory = "/tmp/denkv/wal"

[replication]
replica_type = "master"
master_host = "127.0.0.1"
replication_port = 3232
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.network.max_connections, 50);
        assert_eq!(config.network.max_message_bytes().unwrap(), 4096);
        assert_eq!(config.wal.max_segment_bytes().unwrap(), 10 << 20);
        assert_eq!(config.wal.flushing_batch_timeout(), Duration::from_millis(10));
        assert_eq!(config.replication.replica_type, ReplicaType::Master);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert!(config.wal.enabled);
        assert_eq!(config.engine.engine_type, "in_memory");
        assert_eq!(config.network.address, "127.0.0.1:3223");
        assert_eq!(config.replication.replica_type, ReplicaType::Master);
        assert_eq!(config.replication.sync_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_replica_without_master() {
        let toml = r#"
[replication]
replica_type = "replica"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_engine() {
        let toml = r#"
[engine]
type = "on_disk"
"#;
        assert!(Config::from_toml(toml).is_err());
    }
}

//! Replica Replication Service
//!
//! Keeps a connection to the master, reports the local WAL tail, and
//! persists the shipped segment bytes under the master's filenames so
//! the local segment list mirrors the master's byte for byte. Received
//! entries are not interpreted here; the engine replays them from disk
//! at the next startup.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use super::{format_frame, parse_frame, validate_segment_path, NO_SEGMENT};
use crate::config::ReplicationConfig;
use crate::error::{Error, Result};
use crate::wal::{list_segments, segment_file_name};

/// Per-read deadline while draining one sync cycle
const RECEIVE_DEADLINE: Duration = Duration::from_secs(5);

/// Replica-side replication service
#[derive(Clone)]
pub struct Replica {
    config: ReplicationConfig,
    wal_dir: PathBuf,
}

impl Replica {
    pub fn new(config: ReplicationConfig, wal_dir: PathBuf) -> Self {
        Self { config, wal_dir }
    }

    /// Maintain the master connection forever, reconnecting on failure
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.connect_and_sync().await {
                if e.is_transient() {
                    tracing::error!("Replication session failed: {}", e);
                } else {
                    tracing::error!("Replication session aborted: {}", e);
                }
                tokio::time::sleep(self.config.sync_retry_delay()).await;
            }
        }
    }

    /// Dial the master with a bounded retry budget
    async fn connect(&self) -> Result<TcpStream> {
        let address = format!(
            "{}:{}",
            self.config.master_host, self.config.replication_port
        );
        let mut retries_left = self.config.sync_retry_count;

        loop {
            match TcpStream::connect(&address).await {
                Ok(socket) => {
                    tracing::info!("Connected to master at {}", address);
                    return Ok(socket);
                }
                Err(e) => {
                    if retries_left == 0 {
                        return Err(Error::Replication(format!(
                            "failed to connect to master after {} retries: {e}",
                            self.config.sync_retry_count
                        )));
                    }
                    retries_left -= 1;
                    tracing::warn!("Failed to connect to master at {}, retrying: {}", address, e);
                    tokio::time::sleep(self.config.sync_retry_delay()).await;
                }
            }
        }
    }

    pub(crate) async fn connect_and_sync(&self) -> Result<()> {
        let socket = self.connect().await?;
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);

        let (mut last_segment_id, mut last_segment_size) = self.local_tail()?;

        loop {
            write_half
                .write_all(format_frame(last_segment_id, last_segment_size).as_bytes())
                .await?;
            write_half.flush().await?;

            let received = self
                .receive_segments(&mut reader, &mut last_segment_id, &mut last_segment_size)
                .await?;

            if !received {
                tokio::time::sleep(self.config.sync_interval()).await;
            }
        }
    }

    /// Current local tail position from the on-disk segment listing
    fn local_tail(&self) -> Result<(i64, i64)> {
        let segments = list_segments(&self.wal_dir)?;
        match segments.last() {
            Some(segment) => {
                let size = fs::metadata(self.wal_dir.join(&segment.name))?.len();
                Ok((segment.id as i64, size as i64))
            }
            None => Ok((NO_SEGMENT, 0)),
        }
    }

    /// Drain one sync cycle's worth of frames; returns whether any data arrived
    async fn receive_segments(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        last_segment_id: &mut i64,
        last_segment_size: &mut i64,
    ) -> Result<bool> {
        let mut received = false;
        let mut line = String::new();

        loop {
            // fill_buf consumes nothing, so a quiet cycle ends cleanly here
            let available = match tokio::time::timeout(RECEIVE_DEADLINE, reader.fill_buf()).await {
                Err(_) => break, // no more data this cycle
                Ok(available) => available?.len(),
            };
            if available == 0 {
                return Err(Error::Replication("master closed connection".into()));
            }

            // data has started flowing; a header that stalls now is an error
            line.clear();
            let read = tokio::time::timeout(RECEIVE_DEADLINE, reader.read_line(&mut line))
                .await
                .map_err(|_| Error::Replication("timed out reading frame header".into()))??;
            if read == 0 {
                return Err(Error::Replication("master closed connection".into()));
            }

            let (segment_id, size) = parse_frame(line.trim())?;
            if segment_id < 0 || size < 0 {
                return Err(Error::ReplicationProtocol(format!(
                    "invalid frame header: {:?}",
                    line.trim()
                )));
            }

            let mut payload = vec![0u8; size as usize];
            tokio::time::timeout(RECEIVE_DEADLINE, reader.read_exact(&mut payload))
                .await
                .map_err(|_| Error::Replication("timed out reading segment payload".into()))??;

            self.store_segment(segment_id, &payload, last_segment_id, last_segment_size)?;
            received = true;
        }

        Ok(received)
    }

    /// Persist one received payload. The payload's position is always
    /// "append at the replica's last reported size of that segment":
    /// ids equal to the local tail extend the existing file, newer ids
    /// start a fresh one, and an older id is a protocol violation.
    fn store_segment(
        &self,
        segment_id: i64,
        payload: &[u8],
        last_segment_id: &mut i64,
        last_segment_size: &mut i64,
    ) -> Result<()> {
        if segment_id < *last_segment_id {
            return Err(Error::ReplicationProtocol(format!(
                "received segment {segment_id} older than local tail {}",
                *last_segment_id
            )));
        }

        let name = segment_file_name(segment_id as u64);
        let path = validate_segment_path(&self.wal_dir, &name)?;

        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o750)
            .create(&self.wal_dir)?;

        let extend = segment_id == *last_segment_id && path.exists();
        let mut file = if extend {
            OpenOptions::new().append(true).open(&path)?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)?
        };
        file.write_all(payload)?;
        file.sync_all()?;

        let total = file.metadata()?.len() as i64;
        tracing::info!(
            segment_id,
            new_bytes = payload.len(),
            total_bytes = total,
            extended = extend,
            "Stored segment from master"
        );

        *last_segment_id = segment_id;
        *last_segment_size = total;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::Master;
    use crate::wal::{Entry, Segment};
    use std::path::Path;
    use tokio::net::TcpListener;
    use tempfile::tempdir;

    fn test_replica(wal_dir: &Path, port: u16) -> Replica {
        let config = ReplicationConfig {
            master_host: "127.0.0.1".to_string(),
            replication_port: port,
            sync_interval_ms: 50,
            sync_retry_delay_ms: 50,
            sync_retry_count: 3,
            ..ReplicationConfig::default()
        };
        Replica::new(config, wal_dir.to_path_buf())
    }

    #[test]
    fn test_store_segment_creates_then_extends() {
        let dir = tempdir().unwrap();
        let replica = test_replica(dir.path(), 0);
        let (mut last_id, mut last_size) = (NO_SEGMENT, 0);

        replica
            .store_segment(5, b"hello", &mut last_id, &mut last_size)
            .unwrap();
        assert_eq!((last_id, last_size), (5, 5));

        // same id appends at the tail
        replica
            .store_segment(5, b"world", &mut last_id, &mut last_size)
            .unwrap();
        assert_eq!((last_id, last_size), (5, 10));
        assert_eq!(
            fs::read(dir.path().join(segment_file_name(5))).unwrap(),
            b"helloworld"
        );

        // a newer id starts a fresh file
        replica
            .store_segment(8, b"next", &mut last_id, &mut last_size)
            .unwrap();
        assert_eq!((last_id, last_size), (8, 4));
        assert_eq!(
            fs::read(dir.path().join(segment_file_name(8))).unwrap(),
            b"next"
        );
    }

    #[test]
    fn test_store_segment_rejects_older_id() {
        let dir = tempdir().unwrap();
        let replica = test_replica(dir.path(), 0);
        let (mut last_id, mut last_size) = (9, 0);

        let err = replica
            .store_segment(3, b"stale", &mut last_id, &mut last_size)
            .unwrap_err();
        assert!(matches!(err, Error::ReplicationProtocol(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_local_tail() {
        let dir = tempdir().unwrap();
        let replica = test_replica(dir.path(), 0);
        assert_eq!(replica.local_tail().unwrap(), (NO_SEGMENT, 0));

        fs::write(dir.path().join(segment_file_name(2)), b"abc").unwrap();
        fs::write(dir.path().join(segment_file_name(7)), b"defgh").unwrap();
        assert_eq!(replica.local_tail().unwrap(), (7, 5));
    }

    fn dir_contents(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.file_name().into_string().unwrap(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect();
        files.sort();
        files
    }

    async fn wait_for_convergence(master_dir: &Path, replica_dir: &Path) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if replica_dir.exists() && dir_contents(master_dir) == dir_contents(replica_dir) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "replica did not converge: master {:?} vs replica {:?}",
                dir_contents(master_dir),
                if replica_dir.exists() {
                    dir_contents(replica_dir)
                } else {
                    Vec::new()
                }
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_replica_converges_to_master_bytes() {
        let master_dir = tempdir().unwrap();
        let replica_dir = tempdir().unwrap();

        // master starts with one sealed segment and one live one
        let mut first = Segment::create(master_dir.path()).unwrap();
        first
            .append(&Entry::set(b"k".to_vec(), b"1".to_vec()))
            .unwrap();
        first.sync().unwrap();
        first.close().unwrap();

        let mut live = Segment::create(master_dir.path()).unwrap();
        live.append(&Entry::set(b"k".to_vec(), b"2".to_vec()))
            .unwrap();
        live.sync().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let master = Master::new(
            ReplicationConfig::default(),
            master_dir.path().to_path_buf(),
            None,
        );
        tokio::spawn(async move { master.serve(listener).await });

        let replica = test_replica(replica_dir.path(), port);
        let replication = tokio::spawn(async move { replica.run().await });

        wait_for_convergence(master_dir.path(), replica_dir.path()).await;

        // extend the live segment; the replica must mirror the new tail
        live.append(&Entry::delete(b"k".to_vec())).unwrap();
        live.sync().unwrap();
        wait_for_convergence(master_dir.path(), replica_dir.path()).await;

        // rotate: a brand-new segment must appear on the replica too
        live.close().unwrap();
        let mut next = Segment::create(master_dir.path()).unwrap();
        next.append(&Entry::set(b"k".to_vec(), b"3".to_vec()))
            .unwrap();
        next.sync().unwrap();
        wait_for_convergence(master_dir.path(), replica_dir.path()).await;

        replication.abort();
    }

    #[tokio::test]
    async fn test_connect_retry_budget_is_bounded() {
        // nothing listens on this port; the connect budget must run out
        let dir = tempdir().unwrap();
        let replica = test_replica(dir.path(), 1);

        let started = tokio::time::Instant::now();
        let err = replica.connect_and_sync().await.unwrap_err();
        assert!(err.is_transient());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

//! Master Replication Service
//!
//! Listens on the dedicated replication port and streams WAL segment
//! bytes to each connected replica. A session tracks the replica's
//! `(last_segment_id, last_segment_size)` tail and ships only the bytes
//! past it: the suffix of the segment the replica already has, or whole
//! newer segments. Sessions wake on the WAL's flush notification rather
//! than polling the filesystem; polling remains only as a fallback when
//! the node runs without a WAL service.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use super::{format_frame, parse_frame, read_segment, NO_SEGMENT};
use crate::config::ReplicationConfig;
use crate::error::{Error, Result};
use crate::wal::list_segments;

/// Fallback poll interval when no WAL flush signal is available
const WAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Master-side replication service
pub struct Master {
    config: ReplicationConfig,
    wal_dir: PathBuf,
    changes: Option<watch::Receiver<u64>>,
}

impl Master {
    pub fn new(
        config: ReplicationConfig,
        wal_dir: PathBuf,
        changes: Option<watch::Receiver<u64>>,
    ) -> Self {
        Self {
            config,
            wal_dir,
            changes,
        }
    }

    /// Bind the replication port and accept replica connections forever
    pub async fn run(&self) -> Result<()> {
        let address = format!(
            "{}:{}",
            self.config.master_host, self.config.replication_port
        );
        let listener = TcpListener::bind(&address).await?;
        tracing::info!("Replication service listening on {}", address);
        self.serve(listener).await
    }

    pub(crate) async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    tracing::info!("Replica connected from {}", addr);
                    let session = Session {
                        wal_dir: self.wal_dir.clone(),
                        read_timeout: self.config.read_timeout(),
                        changes: self.changes.clone(),
                        last_segment_id: NO_SEGMENT,
                        last_segment_size: 0,
                    };
                    tokio::spawn(async move {
                        match session.run(socket).await {
                            Ok(()) => tracing::info!("Replica {} disconnected", addr),
                            Err(e) => tracing::warn!("Replica session {} ended: {}", addr, e),
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept replica connection: {}", e);
                }
            }
        }
    }
}

/// Per-replica streaming session
struct Session {
    wal_dir: PathBuf,
    read_timeout: Duration,
    changes: Option<watch::Receiver<u64>>,
    last_segment_id: i64,
    last_segment_size: i64,
}

impl Session {
    async fn run(mut self, socket: TcpStream) -> Result<()> {
        let (read_half, mut write_half) = socket.into_split();
        let mut changes = self.changes.take();

        // Tail reports are read by a dedicated task so the session can wait
        // on either a report or a WAL change without tearing lines apart.
        let (report_tx, mut report_rx) = mpsc::channel::<String>(8);
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if report_tx.send(line.trim().to_string()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // the session starts wherever the replica reports its tail
        let first = tokio::time::timeout(self.read_timeout, report_rx.recv())
            .await
            .map_err(|_| Error::Replication("timed out waiting for replica tail report".into()))?;
        match first {
            Some(report) => self.apply_report(&report)?,
            None => return Ok(()),
        }

        loop {
            self.send_updates(&mut write_half).await?;

            let mut wal_gone = false;
            if let Some(rx) = changes.as_mut() {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            // WAL closed; fall back to polling for the
                            // remainder of the session
                            wal_gone = true;
                        }
                    }
                    report = report_rx.recv() => match report {
                        Some(report) => self.apply_report(&report)?,
                        None => return Ok(()),
                    },
                }
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(WAL_POLL_INTERVAL) => {}
                    report = report_rx.recv() => match report {
                        Some(report) => self.apply_report(&report)?,
                        None => return Ok(()),
                    },
                }
            }
            if wal_gone {
                changes = None;
            }
        }
    }

    fn apply_report(&mut self, report: &str) -> Result<()> {
        let (segment_id, size) = parse_frame(report)?;
        if segment_id < NO_SEGMENT || size < 0 {
            return Err(Error::ReplicationProtocol(format!(
                "invalid tail report: {report:?}"
            )));
        }
        self.last_segment_id = segment_id;
        self.last_segment_size = size;
        Ok(())
    }

    /// Stream every byte past the replica's tail
    async fn send_updates<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<()> {
        let segments = match list_segments(&self.wal_dir) {
            Ok(segments) => segments,
            Err(e) => {
                tracing::error!("Failed to list segments: {}", e);
                return Ok(());
            }
        };

        for segment in segments {
            let segment_id = segment.id as i64;
            if segment_id < self.last_segment_id {
                continue;
            }

            let data = match read_segment(&self.wal_dir, &segment.name) {
                Ok(data) => data,
                Err(e) => {
                    // a file read error degrades this segment, not the session
                    tracing::error!("Failed to read segment {}: {}", segment.name, e);
                    continue;
                }
            };

            if segment_id == self.last_segment_id {
                if data.len() as i64 <= self.last_segment_size {
                    continue;
                }
                let payload = &data[self.last_segment_size as usize..];
                send_frame(writer, segment_id, payload).await?;
                self.last_segment_size += payload.len() as i64;
            } else {
                send_frame(writer, segment_id, &data).await?;
                self.last_segment_id = segment_id;
                self.last_segment_size = data.len() as i64;
            }
        }

        Ok(())
    }
}

async fn send_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    segment_id: i64,
    payload: &[u8],
) -> Result<()> {
    writer
        .write_all(format_frame(segment_id, payload.len() as i64).as_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    tracing::debug!(
        segment_id,
        bytes = payload.len(),
        "Sent segment bytes to replica"
    );
    Ok(())
}

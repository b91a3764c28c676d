//! WAL Writer
//!
//! Group-commit writer for the Write-Ahead Log. A single worker task owns
//! the current segment; producers submit entries over a bounded channel and
//! block until the batch containing their entry is fsynced. One fsync covers
//! the whole batch, and every waiter in a failed batch observes the same
//! error.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::entry::Entry;
use super::segment::Segment;
use crate::config::WalConfig;
use crate::error::{Error, Result};

/// Submissions queued ahead of the worker; producers block when full
const SUBMISSION_QUEUE_DEPTH: usize = 1024;

/// Write request sent to the writer task
struct Submission {
    entry: Entry,
    reply: oneshot::Sender<Result<()>>,
}

enum Request {
    Write(Submission),
    Close(oneshot::Sender<Result<()>>),
}

/// Cloneable handle to the WAL writer task
#[derive(Clone)]
pub struct Wal {
    sender: mpsc::Sender<Request>,
    changes: watch::Receiver<u64>,
}

impl Wal {
    /// Open the WAL: create the first segment and spawn the writer task.
    /// Must be called from within a tokio runtime, after recovery.
    pub fn open(config: &WalConfig) -> Result<Self> {
        let max_segment_bytes = config.max_segment_bytes()?;
        let current = Segment::create(&config.data_directory)?;

        let (sender, receiver) = mpsc::channel(SUBMISSION_QUEUE_DEPTH);
        let (change_tx, change_rx) = watch::channel(0u64);

        let writer = Writer {
            dir: config.data_directory.clone(),
            batch_size: config.flushing_batch_size.max(1),
            batch_timeout: config.flushing_batch_timeout(),
            max_segment_bytes,
            current,
            batch: Vec::new(),
            changes: change_tx,
            flushes: 0,
        };

        tokio::spawn(writer.run(receiver));

        Ok(Self {
            sender,
            changes: change_rx,
        })
    }

    /// Append an entry to the log, blocking until it is durably on disk.
    /// On success the entry is guaranteed to be present on any subsequent
    /// recovery.
    pub async fn submit(&self, entry: Entry) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.sender
            .send(Request::Write(Submission { entry, reply }))
            .await
            .map_err(|_| Error::WalClosed)?;
        result.await.map_err(|_| Error::WalClosed)?
    }

    /// Flush any pending batch, close the current segment, and mark the
    /// WAL closed. Later submissions fail with `WalClosed`.
    pub async fn close(&self) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.sender
            .send(Request::Close(reply))
            .await
            .map_err(|_| Error::WalClosed)?;
        result.await.map_err(|_| Error::WalClosed)?
    }

    /// Subscribe to flush notifications. The value increments after each
    /// successful flush; the master replication streamer wakes on it
    /// instead of polling file sizes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }
}

/// Single-writer task state; exclusively owns the current segment
struct Writer {
    dir: PathBuf,
    batch_size: usize,
    batch_timeout: Duration,
    max_segment_bytes: u64,
    current: Segment,
    batch: Vec<Submission>,
    changes: watch::Sender<u64>,
    flushes: u64,
}

impl Writer {
    async fn run(mut self, mut receiver: mpsc::Receiver<Request>) {
        let mut deadline = Instant::now() + self.batch_timeout;

        loop {
            tokio::select! {
                request = receiver.recv() => match request {
                    Some(Request::Write(submission)) => {
                        self.batch.push(submission);
                        if self.batch.len() >= self.batch_size {
                            self.flush();
                            deadline = Instant::now() + self.batch_timeout;
                        }
                    }
                    Some(Request::Close(reply)) => {
                        let result = self.shutdown();
                        let _ = reply.send(result);
                        break;
                    }
                    None => {
                        // every handle dropped: flush the tail and exit
                        let _ = self.shutdown();
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    if !self.batch.is_empty() {
                        self.flush();
                    }
                    deadline = Instant::now() + self.batch_timeout;
                }
            }
        }

        // Requests that raced with close observe the closed WAL
        receiver.close();
        while let Some(request) = receiver.recv().await {
            match request {
                Request::Write(submission) => {
                    let _ = submission.reply.send(Err(Error::WalClosed));
                }
                Request::Close(reply) => {
                    let _ = reply.send(Err(Error::WalClosed));
                }
            }
        }
    }

    /// Write the batch to the current segment, rotating between entries
    /// when the segment crosses the size threshold, then fsync once.
    fn write_batch(&mut self) -> Result<()> {
        for index in 0..self.batch.len() {
            if self.current.size() >= self.max_segment_bytes {
                self.rotate()?;
            }
            self.current.append(&self.batch[index].entry)?;
        }
        self.current.sync()
    }

    fn flush(&mut self) {
        match self.write_batch() {
            Ok(()) => {
                for submission in self.batch.drain(..) {
                    let _ = submission.reply.send(Ok(()));
                }
                self.flushes += 1;
                let _ = self.changes.send(self.flushes);
            }
            Err(e) => {
                tracing::error!("WAL flush failed: {}", e);
                // fate-sharing: the batch aborts as a whole and is not retried
                for submission in self.batch.drain(..) {
                    let _ = submission.reply.send(Err(duplicate_flush_error(&e)));
                }
            }
        }
    }

    /// Close the current segment and install a fresh one. When closing the
    /// old segment fails, the current segment is left in place and the next
    /// submission retries against it.
    fn rotate(&mut self) -> Result<()> {
        self.current
            .sync()
            .map_err(|e| Error::WalRotate(e.to_string()))?;
        self.current
            .close()
            .map_err(|e| Error::WalRotate(e.to_string()))?;

        let next = Segment::create(&self.dir).map_err(|e| Error::WalRotate(e.to_string()))?;
        tracing::debug!(segment_id = next.id(), "Rotated WAL segment");
        self.current = next;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        let flush_result = if self.batch.is_empty() {
            Ok(())
        } else {
            self.write_batch()
        };

        match &flush_result {
            Ok(()) => {
                for submission in self.batch.drain(..) {
                    let _ = submission.reply.send(Ok(()));
                }
                self.flushes += 1;
                let _ = self.changes.send(self.flushes);
            }
            Err(e) => {
                for submission in self.batch.drain(..) {
                    let _ = submission.reply.send(Err(duplicate_flush_error(e)));
                }
            }
        }

        if let Err(e) = flush_result {
            return Err(Error::WalFlushFinal(e.to_string()));
        }
        self.current.close()
    }
}

/// Every waiter in a failed batch receives the same error kind and message
fn duplicate_flush_error(e: &Error) -> Error {
    match e {
        Error::WalSync(msg) => Error::WalSync(msg.clone()),
        Error::WalRotate(msg) => Error::WalRotate(msg.clone()),
        other => Error::WalWrite(other.to_string()),
    }
}

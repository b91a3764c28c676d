//! WAL Segment Management
//!
//! One segment is one append-only file named `wal-<id>.log`. The file is
//! created lazily on the first append so that rotation never litters the
//! data directory with empty files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::entry::Entry;
use crate::error::{Error, Result};

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

/// Highest segment id issued by this process; keeps ids strictly
/// increasing even when rotations land in the same nanosecond.
static LAST_SEGMENT_ID: AtomicU64 = AtomicU64::new(0);

/// Segment file name for an id
pub fn segment_file_name(id: u64) -> String {
    format!("{SEGMENT_PREFIX}{id}{SEGMENT_SUFFIX}")
}

/// Extract the numeric id from a segment file name.
/// Only `wal-<decimal u64>.log` parses; anything else returns `None`.
pub fn parse_segment_name(name: &str) -> Option<u64> {
    let id = name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

/// Metadata for one on-disk segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub id: u64,
    pub name: String,
}

/// List segment files in `dir`, ordered by numeric id ascending.
///
/// Names that do not match the segment grammar, or that contain `..` or
/// path separators, are skipped. A missing directory is an empty log.
pub fn list_segments(dir: &Path) -> Result<Vec<SegmentInfo>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut segments = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = dir_entry?;
        let name = match dir_entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            continue;
        }
        if let Some(id) = parse_segment_name(&name) {
            segments.push(SegmentInfo { id, name });
        }
    }

    segments.sort_by_key(|segment| segment.id);
    Ok(segments)
}

fn next_segment_id() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let mut last = LAST_SEGMENT_ID.load(Ordering::Relaxed);
    loop {
        let id = now.max(last + 1);
        match LAST_SEGMENT_ID.compare_exchange(last, id, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return id,
            Err(observed) => last = observed,
        }
    }
}

/// A single WAL segment file
pub struct Segment {
    id: u64,
    path: PathBuf,
    file: Option<BufWriter<File>>,
    size: u64,
}

impl Segment {
    /// Create a fresh segment in `dir` with the next monotonic id.
    /// The directory is created if needed; the file itself is not opened
    /// until the first append.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o750)
            .create(dir)
            .or_else(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Ok(())
                } else {
                    Err(e)
                }
            })
            .map_err(|e| Error::SegmentCreate(format!("cannot create WAL directory: {e}")))?;

        let id = next_segment_id();
        Ok(Self {
            id,
            path: dir.join(segment_file_name(id)),
            file: None,
            size: 0,
        })
    }

    /// Segment id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path of the segment file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes logically written so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append an entry through the write buffer and update the size counter
    pub fn append(&mut self, entry: &Entry) -> Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(true)
                .mode(0o600)
                .open(&self.path)
                .map_err(|e| Error::SegmentCreate(format!("cannot open segment file: {e}")))?;
            self.file = Some(BufWriter::new(file));
        }
        let Some(writer) = self.file.as_mut() else {
            return Err(Error::SegmentCreate("segment file handle missing".into()));
        };

        let written = entry
            .write_to(writer)
            .map_err(|e| Error::WalWrite(e.to_string()))?;

        self.size = self
            .size
            .checked_add(written)
            .ok_or_else(|| Error::WalWrite("segment size overflow".into()))?;

        Ok(())
    }

    /// Flush the write buffer and fsync the file
    pub fn sync(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.file {
            writer.flush().map_err(|e| Error::WalSync(e.to_string()))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| Error::WalSync(e.to_string()))?;
        }
        Ok(())
    }

    /// Flush and close the file; idempotent. The next append reopens
    /// the same file in append mode.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.file.take() {
            writer.flush().map_err(|e| Error::WalSync(e.to_string()))?;
        }
        Ok(())
    }
}

//! Write-Ahead Log Module
//!
//! Append-only log for durable storage and replication of mutations.
//! Every write is encoded into a segment file and fsynced before the
//! in-memory state changes; recovery replays the segments in order.

pub mod entry;
pub mod reader;
pub mod segment;
mod writer;

pub use entry::{Entry, Operation};
pub use reader::recover;
pub use segment::{list_segments, parse_segment_name, segment_file_name, Segment, SegmentInfo};
pub use writer::Wal;

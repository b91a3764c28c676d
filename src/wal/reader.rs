//! WAL Recovery
//!
//! Replays every segment in the data directory, in id order, before the
//! node starts serving. A truncated or corrupt tail entry fails recovery
//! outright: silently trimming would hide the loss of acknowledged data.

use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;

use super::entry::{read_entry, Entry};
use super::segment::list_segments;
use crate::error::{Error, Result};

/// Read all entries from all segments in `dir`, in write order.
pub fn recover(dir: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();

    for segment in list_segments(dir)? {
        let file = File::open(dir.join(&segment.name)).map_err(|e| Error::SegmentOpen {
            segment: segment.name.clone(),
            reason: e.to_string(),
        })?;
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;

        loop {
            match read_entry(&mut reader) {
                Ok(Some(entry)) => {
                    offset += entry.encoded_len();
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(e) if matches!(e.kind(), ErrorKind::UnexpectedEof | ErrorKind::InvalidData) => {
                    return Err(Error::SegmentCorrupt {
                        segment: segment.name.clone(),
                        offset,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::segment::{segment_file_name, Segment};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_recover_empty_dir() {
        let dir = tempdir().unwrap();
        assert!(recover(dir.path()).unwrap().is_empty());
        assert!(recover(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_recover_preserves_write_order_across_segments() {
        let dir = tempdir().unwrap();
        let mut expected = Vec::new();

        for chunk in 0..3 {
            let mut segment = Segment::create(dir.path()).unwrap();
            for i in 0..5u32 {
                let entry = Entry::set(
                    format!("key-{chunk}-{i}").into_bytes(),
                    format!("value-{chunk}-{i}").into_bytes(),
                );
                segment.append(&entry).unwrap();
                expected.push(entry);
            }
            segment.sync().unwrap();
            segment.close().unwrap();
        }

        assert_eq!(recover(dir.path()).unwrap(), expected);
    }

    #[test]
    fn test_recover_mixed_operations() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::create(dir.path()).unwrap();
        let entries = vec![
            Entry::set(b"a".to_vec(), b"1".to_vec()),
            Entry::clear(),
            Entry::set(b"b".to_vec(), b"2".to_vec()),
            Entry::delete(b"b".to_vec()),
        ];
        for entry in &entries {
            segment.append(entry).unwrap();
        }
        segment.sync().unwrap();

        assert_eq!(recover(dir.path()).unwrap(), entries);
    }

    #[test]
    fn test_truncated_tail_fails_recovery() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::create(dir.path()).unwrap();
        let first = Entry::set(b"good".to_vec(), b"entry".to_vec());
        segment.append(&first).unwrap();
        segment.append(&Entry::set(b"torn".to_vec(), b"entry".to_vec())).unwrap();
        segment.sync().unwrap();

        // chop one byte off the tail record
        let path = segment.path().to_path_buf();
        let len = fs::metadata(&path).unwrap().len();
        let mut data = fs::read(&path).unwrap();
        data.truncate(len as usize - 1);
        fs::write(&path, &data).unwrap();

        let err = recover(dir.path()).unwrap_err();
        match err {
            Error::SegmentCorrupt { offset, .. } => assert_eq!(offset, first.encoded_len()),
            other => panic!("expected SegmentCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_operation_byte_fails_recovery() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join(segment_file_name(7)), [0xff, 0x00]).unwrap();

        assert!(matches!(
            recover(dir.path()),
            Err(Error::SegmentCorrupt { offset: 0, .. })
        ));
    }
}

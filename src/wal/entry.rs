//! WAL Entry Codec
//!
//! Fixed little-endian binary layout for a single log record:
//! one operation byte, a u32 key length, the key bytes, and for `Set`
//! only, a u32 value length followed by the value bytes. An entry's
//! meaning is fully determined by its encoded bytes.

use std::io::{self, Read, Write};

/// Mutation type carried by a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Set = 0x01,
    Delete = 0x02,
    Clear = 0x03,
}

impl Operation {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Operation::Set),
            0x02 => Some(Operation::Delete),
            0x03 => Some(Operation::Clear),
            _ => None,
        }
    }
}

/// A single mutation record in the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub operation: Operation,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    /// Create a `Set` entry
    pub fn set(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            operation: Operation::Set,
            key,
            value,
        }
    }

    /// Create a `Delete` entry
    pub fn delete(key: Vec<u8>) -> Self {
        Self {
            operation: Operation::Delete,
            key,
            value: Vec::new(),
        }
    }

    /// Create a `Clear` entry; the canonical encoding has an empty key and no value
    pub fn clear() -> Self {
        Self {
            operation: Operation::Clear,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Size of the encoded entry in bytes
    pub fn encoded_len(&self) -> u64 {
        let mut len = 1 + 4 + self.key.len() as u64;
        if self.operation == Operation::Set {
            len += 4 + self.value.len() as u64;
        }
        len
    }

    /// Write the encoded entry to `writer`, returning the number of bytes written
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<u64> {
        let key_len = u32::try_from(self.key.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "key length exceeds u32::MAX")
        })?;

        writer.write_all(&[self.operation as u8])?;
        writer.write_all(&key_len.to_le_bytes())?;
        writer.write_all(&self.key)?;

        if self.operation == Operation::Set {
            let value_len = u32::try_from(self.value.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "value length exceeds u32::MAX")
            })?;
            writer.write_all(&value_len.to_le_bytes())?;
            writer.write_all(&self.value)?;
        }

        Ok(self.encoded_len())
    }

    /// Encode the entry into a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        // Writing to a Vec cannot fail; the length checks hold by construction
        let _ = self.write_to(&mut buf);
        buf
    }
}

/// Decode one entry from `reader`.
///
/// Returns `Ok(None)` on a clean end of stream at a record boundary.
/// A short read inside a record surfaces as `ErrorKind::UnexpectedEof`
/// and an unknown operation byte as `ErrorKind::InvalidData`; both are
/// corruption signals, never a silently truncated entry.
pub fn read_entry<R: Read>(reader: &mut R) -> io::Result<Option<Entry>> {
    let mut op_byte = [0u8; 1];
    let n = reader.read(&mut op_byte)?;
    if n == 0 {
        return Ok(None);
    }

    let operation = Operation::from_byte(op_byte[0]).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown operation byte: {:#04x}", op_byte[0]),
        )
    })?;

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let key_len = u32::from_le_bytes(len_buf);

    let mut key = vec![0u8; key_len as usize];
    reader.read_exact(&mut key)?;

    let mut value = Vec::new();
    if operation == Operation::Set {
        reader.read_exact(&mut len_buf)?;
        let value_len = u32::from_le_bytes(len_buf);

        value = vec![0u8; value_len as usize];
        reader.read_exact(&mut value)?;
    }

    Ok(Some(Entry {
        operation,
        key,
        value,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_round_trip_set() {
        let entry = Entry::set(b"foo".to_vec(), b"bar".to_vec());
        let encoded = entry.encode();
        assert_eq!(encoded.len() as u64, entry.encoded_len());

        let decoded = read_entry(&mut Cursor::new(&encoded)).unwrap().unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_round_trip_delete() {
        let entry = Entry::delete(b"foo".to_vec());
        let decoded = read_entry(&mut Cursor::new(entry.encode())).unwrap().unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_round_trip_clear() {
        let entry = Entry::clear();
        let encoded = entry.encode();
        // op byte + zero key length, no value section
        assert_eq!(encoded, vec![0x03, 0, 0, 0, 0]);

        let decoded = read_entry(&mut Cursor::new(encoded)).unwrap().unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_empty_key_and_value() {
        let entry = Entry::set(Vec::new(), Vec::new());
        let decoded = read_entry(&mut Cursor::new(entry.encode())).unwrap().unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_binary_layout() {
        let entry = Entry::set(b"k".to_vec(), b"vv".to_vec());
        let encoded = entry.encode();
        assert_eq!(
            encoded,
            vec![0x01, 1, 0, 0, 0, b'k', 2, 0, 0, 0, b'v', b'v']
        );
    }

    #[test]
    fn test_eof_at_record_boundary() {
        let result = read_entry(&mut Cursor::new(Vec::<u8>::new())).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_every_truncation_is_corrupt() {
        let entry = Entry::set(b"key".to_vec(), b"value".to_vec());
        let encoded = entry.encode();

        for cut in 1..encoded.len() {
            let err = read_entry(&mut Cursor::new(&encoded[..cut])).unwrap_err();
            assert_eq!(
                err.kind(),
                io::ErrorKind::UnexpectedEof,
                "truncation at {cut} bytes must signal corruption"
            );
        }
    }

    #[test]
    fn test_unknown_operation_byte() {
        let err = read_entry(&mut Cursor::new(vec![0x7f, 0, 0, 0, 0])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_second_entry_after_first() {
        let a = Entry::set(b"a".to_vec(), b"1".to_vec());
        let b = Entry::delete(b"a".to_vec());
        let mut buf = a.encode();
        buf.extend(b.encode());

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_entry(&mut cursor).unwrap().unwrap(), a);
        assert_eq!(read_entry(&mut cursor).unwrap().unwrap(), b);
        assert!(read_entry(&mut cursor).unwrap().is_none());
    }
}

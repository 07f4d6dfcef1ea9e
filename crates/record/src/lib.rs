//! # Record — on-disk key/value codec
//!
//! Every entry in a segment file is one self-delimiting binary record
//! carrying a key, a value, and a SHA-1 digest for integrity checking.
//!
//! ## Binary Record Format
//!
//! ```text
//! [total_size: u32 LE][key_len: u32 LE][key][value_len: u32 LE][value][digest: 20 bytes]
//! ```
//!
//! `total_size` is the full record length **including** the 4-byte prefix
//! itself, so `total_size = 12 + key_len + value_len + 20`. The digest is
//! SHA-1 over the concatenation `key ∥ value` with no separator.
//!
//! Two decode forms share the same layout: [`Record::decode`] parses a
//! whole buffer (seek-then-read at a known offset), [`Record::read_from`]
//! pulls one record off a sequential stream (replay, compaction). Neither
//! verifies the digest — the read path calls [`Record::verify`] when it
//! decides integrity matters.
//!
//! ## Example
//!
//! ```rust
//! use record::Record;
//!
//! let buf = Record::encode("name", "Alice");
//! let rec = Record::decode(&buf).unwrap();
//! assert_eq!(rec.key, "name");
//! assert_eq!(rec.value, "Alice");
//! assert!(rec.verify());
//! ```

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::io::{self, BufRead};

use thiserror::Error;

/// Width of the SHA-1 digest trailing every record.
pub const DIGEST_LEN: usize = 20;

/// Fixed overhead of a record: three u32 length fields plus the digest.
pub const RECORD_OVERHEAD: usize = 12 + DIGEST_LEN;

/// A single decoded key/value record.
///
/// The digest is carried as stored on disk; call [`Record::verify`] to
/// check it against the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The lookup key.
    pub key: String,
    /// The payload value.
    pub value: String,
    /// SHA-1 of `key ∥ value` as stored on disk.
    pub digest: [u8; DIGEST_LEN],
}

/// Errors that can occur while decoding a record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended in the middle of a record.
    #[error("truncated record")]
    Truncated,

    /// The length fields do not describe a consistent record, or the
    /// payload is not valid UTF-8.
    #[error("malformed record: {0}")]
    Malformed(&'static str),
}

impl Record {
    /// Computes SHA-1 over `key ∥ value`.
    pub fn digest_of(key: &str, value: &str) -> [u8; DIGEST_LEN] {
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
        hasher.finalize().into()
    }

    /// Serializes a key/value pair into the on-disk layout.
    pub fn encode(key: &str, value: &str) -> Vec<u8> {
        let total = RECORD_OVERHEAD + key.len() + value.len();
        let mut buf = Vec::with_capacity(total);

        // The length fields cannot fail to write into a Vec.
        let _ = buf.write_u32::<LittleEndian>(total as u32);
        let _ = buf.write_u32::<LittleEndian>(key.len() as u32);
        buf.extend_from_slice(key.as_bytes());
        let _ = buf.write_u32::<LittleEndian>(value.len() as u32);
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(&Self::digest_of(key, value));

        buf
    }

    /// Parses a whole encoded record.
    ///
    /// The buffer must contain exactly one record: `total_size` has to
    /// match `buf.len()`. The stored digest is returned as-is, **not**
    /// verified.
    pub fn decode(buf: &[u8]) -> Result<Record, RecordError> {
        if buf.len() < RECORD_OVERHEAD {
            return Err(RecordError::Truncated);
        }

        let total = LittleEndian::read_u32(&buf[0..4]) as usize;
        if total != buf.len() {
            return Err(RecordError::Malformed("length prefix mismatch"));
        }

        let key_len = LittleEndian::read_u32(&buf[4..8]) as usize;
        let value_end = 12 + key_len;
        if value_end + DIGEST_LEN > total {
            return Err(RecordError::Malformed("key length out of bounds"));
        }

        let value_len = LittleEndian::read_u32(&buf[8 + key_len..value_end]) as usize;
        if value_end + value_len + DIGEST_LEN != total {
            return Err(RecordError::Malformed("value length out of bounds"));
        }

        let key = std::str::from_utf8(&buf[8..8 + key_len])
            .map_err(|_| RecordError::Malformed("key is not valid utf-8"))?
            .to_string();
        let value = std::str::from_utf8(&buf[value_end..value_end + value_len])
            .map_err(|_| RecordError::Malformed("value is not valid utf-8"))?
            .to_string();

        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&buf[total - DIGEST_LEN..]);

        Ok(Record { key, value, digest })
    }

    /// Reads one record from a sequential stream.
    ///
    /// Returns `Ok(Some((record, n)))` where `n` is the number of bytes
    /// consumed, or `Ok(None)` on a clean end-of-stream (no bytes left
    /// before the size prefix).
    ///
    /// # Errors
    ///
    /// - [`RecordError::Truncated`] if the stream ends inside a record.
    /// - [`RecordError::Malformed`] if the length fields are inconsistent.
    /// - [`RecordError::Io`] on any other read failure.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Option<(Record, usize)>, RecordError> {
        let mut size_buf = [0u8; 4];
        match read_exact_or_eof(reader, &mut size_buf)? {
            Filled::Eof => return Ok(None),
            Filled::Partial => return Err(RecordError::Truncated),
            Filled::Full => {}
        }

        let total = LittleEndian::read_u32(&size_buf) as usize;
        if total < RECORD_OVERHEAD {
            return Err(RecordError::Malformed("record size below minimum"));
        }

        let mut buf = vec![0u8; total];
        buf[..4].copy_from_slice(&size_buf);
        reader.read_exact(&mut buf[4..]).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                RecordError::Truncated
            } else {
                RecordError::Io(e)
            }
        })?;

        let record = Record::decode(&buf)?;
        Ok(Some((record, total)))
    }

    /// Recomputes the digest over the payload and compares it with the
    /// stored one.
    pub fn verify(&self) -> bool {
        Self::digest_of(&self.key, &self.value) == self.digest
    }
}

enum Filled {
    Full,
    Partial,
    Eof,
}

/// Fills `buf` from the reader, distinguishing a clean EOF before the
/// first byte from a truncation partway through.
fn read_exact_or_eof<R: BufRead>(reader: &mut R, buf: &mut [u8]) -> Result<Filled, RecordError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(Filled::Eof),
            Ok(0) => return Ok(Filled::Partial),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(RecordError::Io(e)),
        }
    }
    Ok(Filled::Full)
}

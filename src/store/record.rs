//! Durable store record format
//!
//! Per STORE.md §3, each record in the store log is framed as:
//! - Record Length (u32 LE, counts the whole record including this field)
//! - Record Type (u8): BIND / ENTRY / DEALLOC
//! - Body (variable)
//! - Checksum (u32 LE, CRC32 over length, type, and body)
//!
//! Bodies carry the owning log handle first, then variable fields as
//! u32-length-prefixed byte strings.

use std::io::{Cursor, Read};

use super::checksum::compute_checksum;
use super::errors::{StoreError, StoreResult};
use crate::version::Version;

/// Store record types as defined in STORE.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Binds a log to a key; written once, at the log's publication.
    Bind = 1,
    /// One appended entry of a log.
    Entry = 2,
    /// Marks a log as abandoned; replay discards it.
    Dealloc = 3,
}

impl RecordType {
    /// Convert from u8, returns None for invalid values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::Bind),
            2 => Some(RecordType::Entry),
            3 => Some(RecordType::Dealloc),
            _ => None,
        }
    }

    /// Convert to u8.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One record of the durable store log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRecord {
    /// Binds log `log_id` to the encoded `key`.
    Bind { log_id: u64, key: Vec<u8> },
    /// One entry appended to log `log_id`. `value` is empty for tombstones.
    Entry {
        log_id: u64,
        version: Version,
        tombstone: bool,
        value: Vec<u8>,
    },
    /// Log `log_id` lost its publication race and must not be restored.
    Dealloc { log_id: u64 },
}

/// Minimum size of any record: length + type + log handle + checksum.
pub(crate) const MIN_RECORD_SIZE: usize = 4 + 1 + 8 + 4;

impl StoreRecord {
    /// Create a BIND record.
    pub fn bind(log_id: u64, key: Vec<u8>) -> Self {
        StoreRecord::Bind { log_id, key }
    }

    /// Create an ENTRY record carrying a live value.
    pub fn entry(log_id: u64, version: Version, value: Vec<u8>) -> Self {
        StoreRecord::Entry {
            log_id,
            version,
            tombstone: false,
            value,
        }
    }

    /// Create an ENTRY record carrying a deletion marker.
    pub fn tombstone(log_id: u64, version: Version) -> Self {
        StoreRecord::Entry {
            log_id,
            version,
            tombstone: true,
            value: Vec::new(),
        }
    }

    /// Create a DEALLOC record.
    pub fn dealloc(log_id: u64) -> Self {
        StoreRecord::Dealloc { log_id }
    }

    /// The record's type tag.
    pub fn record_type(&self) -> RecordType {
        match self {
            StoreRecord::Bind { .. } => RecordType::Bind,
            StoreRecord::Entry { .. } => RecordType::Entry,
            StoreRecord::Dealloc { .. } => RecordType::Dealloc,
        }
    }

    /// The log this record belongs to.
    pub fn log_id(&self) -> u64 {
        match self {
            StoreRecord::Bind { log_id, .. }
            | StoreRecord::Entry { log_id, .. }
            | StoreRecord::Dealloc { log_id } => *log_id,
        }
    }

    /// Serialize the record body (everything between type byte and checksum).
    fn serialize_body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.log_id().to_le_bytes());
        match self {
            StoreRecord::Bind { key, .. } => {
                buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
                buf.extend_from_slice(key);
            }
            StoreRecord::Entry {
                version,
                tombstone,
                value,
                ..
            } => {
                buf.extend_from_slice(&version.value().to_le_bytes());
                buf.push(u8::from(*tombstone));
                buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
                buf.extend_from_slice(value);
            }
            StoreRecord::Dealloc { .. } => {}
        }
        buf
    }

    /// Serialize the complete framed record.
    pub fn serialize(&self) -> Vec<u8> {
        let body = self.serialize_body();
        let record_length = (4 + 1 + body.len() + 4) as u32;

        // Checksum covers length, type, and body.
        let mut framed = Vec::with_capacity(record_length as usize);
        framed.extend_from_slice(&record_length.to_le_bytes());
        framed.push(self.record_type().as_u8());
        framed.extend_from_slice(&body);
        let checksum = compute_checksum(&framed);
        framed.extend_from_slice(&checksum.to_le_bytes());
        framed
    }

    /// Deserialize a record from bytes, verifying the checksum.
    ///
    /// Returns the record and the number of bytes consumed. All failures
    /// surface as [`StoreError::Corruption`] with offsets relative to the
    /// start of `data`; the replayer rebases them onto the file.
    pub fn deserialize(data: &[u8]) -> StoreResult<(Self, usize)> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(StoreError::corruption(0, "record too short"));
        }

        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_length < MIN_RECORD_SIZE {
            return Err(StoreError::corruption(
                0,
                format!("invalid record length {record_length}"),
            ));
        }
        if data.len() < record_length {
            return Err(StoreError::corruption(
                0,
                format!(
                    "record truncated: expected {record_length} bytes, got {}",
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored_checksum = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed_checksum = compute_checksum(&data[..checksum_offset]);
        if computed_checksum != stored_checksum {
            return Err(StoreError::corruption(
                0,
                format!(
                    "checksum mismatch: computed {computed_checksum:08x}, stored {stored_checksum:08x}"
                ),
            ));
        }

        let record_type = RecordType::from_u8(data[4])
            .ok_or_else(|| StoreError::corruption(4, format!("invalid record type {}", data[4])))?;

        let mut cursor = Cursor::new(&data[5..checksum_offset]);
        let log_id = read_u64(&mut cursor)?;

        let record = match record_type {
            RecordType::Bind => StoreRecord::Bind {
                log_id,
                key: read_bytes(&mut cursor)?,
            },
            RecordType::Entry => {
                let version = Version::new(read_i64(&mut cursor)?);
                let tombstone = read_u8(&mut cursor)? != 0;
                let value = read_bytes(&mut cursor)?;
                StoreRecord::Entry {
                    log_id,
                    version,
                    tombstone,
                    value,
                }
            }
            RecordType::Dealloc => StoreRecord::Dealloc { log_id },
        };

        Ok((record, record_length))
    }
}

fn read_u8<R: Read>(reader: &mut R) -> StoreResult<u8> {
    let mut buf = [0u8; 1];
    reader
        .read_exact(&mut buf)
        .map_err(|_| StoreError::corruption(0, "record body too short"))?;
    Ok(buf[0])
}

fn read_u64<R: Read>(reader: &mut R) -> StoreResult<u64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|_| StoreError::corruption(0, "record body too short"))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> StoreResult<i64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|_| StoreError::corruption(0, "record body too short"))?;
    Ok(i64::from_le_bytes(buf))
}

fn read_bytes<R: Read>(reader: &mut R) -> StoreResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .map_err(|_| StoreError::corruption(0, "record body too short"))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|_| StoreError::corruption(0, "record body too short"))?;
    Ok(buf)
}

//! On-disk log record codec.
//!
//! Every record is encoded as:
//!
//! ```text
//! +----------+---------+------------------+--------------------+-----+-------+
//! | crc (4B) | kind 1B | key_len uvarint  | value_len uvarint  | key | value |
//! |  LE u32  |         |    at most 5B    |     at most 5B     |     |       |
//! +----------+---------+------------------+--------------------+-----+-------+
//! ```
//!
//! The CRC covers every byte after the CRC field itself. A header that
//! decodes to an all-zero CRC and zero lengths marks the end of the log.

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISO_HDLC};

// CRC-32/ISO-HDLC is the IEEE polynomial.
pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// crc + kind + two uvarint lengths (5 bytes each at most for u32 values).
pub const MAX_HEADER_SIZE: usize = 4 + 1 + 5 + 5;

/// Sequence number tag for non-transactional records: applied immediately
/// during replay, never buffered.
pub const NON_TXN_SEQ: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Normal = 0,
    Deleted = 1,
    TxnFinished = 2,
}

impl RecordKind {
    pub(crate) fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordKind::Normal),
            1 => Some(RecordKind::Deleted),
            2 => Some(RecordKind::TxnFinished),
            _ => None,
        }
    }
}

/// One append-only log entry. Never mutated once written to a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub kind: RecordKind,
}

/// Stable locator of a record inside the log. Lives in the index and in
/// hint-file records, nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub segment_id: u32,
    pub offset: u64,
    pub size: u32,
}

pub(crate) struct RecordHeader {
    pub crc: u32,
    pub kind: u8,
    pub key_len: u32,
    pub value_len: u32,
    /// Encoded header length in bytes.
    pub len: usize,
}

/// Appends `v` to `buf` as an unsigned LEB128 varint.
pub(crate) fn encode_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Decodes an unsigned LEB128 varint from the front of `buf`, returning
/// the value and the number of bytes consumed. `None` when `buf` ends
/// mid-varint or the varint overflows 64 bits.
pub(crate) fn decode_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Encodes a record into its on-disk form, CRC included.
pub fn encode_record(record: &LogRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + record.key.len() + record.value.len());
    buf.extend_from_slice(&[0u8; 4]);
    buf.push(record.kind as u8);
    encode_uvarint(&mut buf, record.key.len() as u64);
    encode_uvarint(&mut buf, record.value.len() as u64);
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let crc = CRC32.checksum(&buf[4..]);
    LittleEndian::write_u32(&mut buf[..4], crc);
    buf
}

/// Parses a record header from the front of `buf`. Returns `None` when
/// `buf` is too short to hold one, which callers treat as end of segment.
pub(crate) fn decode_header(buf: &[u8]) -> Option<RecordHeader> {
    if buf.len() <= 5 {
        return None;
    }
    let crc = LittleEndian::read_u32(&buf[..4]);
    let kind = buf[4];
    let mut index = 5;
    let (key_len, n) = decode_uvarint(&buf[index..])?;
    index += n;
    let (value_len, n) = decode_uvarint(&buf[index..])?;
    index += n;
    if key_len > u32::MAX as u64 || value_len > u32::MAX as u64 {
        return None;
    }
    Some(RecordHeader {
        crc,
        kind,
        key_len: key_len as u32,
        value_len: value_len as u32,
        len: index,
    })
}

/// Encodes a position as three concatenated uvarints (hint records only).
pub fn encode_position(pos: &RecordPosition) -> Vec<u8> {
    let mut buf = Vec::with_capacity(15);
    encode_uvarint(&mut buf, pos.segment_id as u64);
    encode_uvarint(&mut buf, pos.offset);
    encode_uvarint(&mut buf, pos.size as u64);
    buf
}

pub fn decode_position(buf: &[u8]) -> Option<RecordPosition> {
    let (segment_id, n) = decode_uvarint(buf)?;
    let mut index = n;
    let (offset, n) = decode_uvarint(&buf[index..])?;
    index += n;
    let (size, _) = decode_uvarint(&buf[index..])?;
    Some(RecordPosition {
        segment_id: segment_id as u32,
        offset,
        size: size as u32,
    })
}

/// Prefixes `key` with a uvarint sequence number. Non-transactional
/// records use [`NON_TXN_SEQ`].
pub(crate) fn encode_key_with_seq(key: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + 10);
    encode_uvarint(&mut buf, seq);
    buf.extend_from_slice(key);
    buf
}

/// Splits an on-disk key into its sequence number and the real key.
pub(crate) fn split_key_seq(key: &[u8]) -> Option<(u64, Vec<u8>)> {
    let (seq, n) = decode_uvarint(key)?;
    Some((seq, key[n..].to_vec()))
}

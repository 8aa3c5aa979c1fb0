use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::fio::{self, IoBackend, IoType};

use super::record::{
    decode_header, encode_position, encode_record, LogRecord, RecordKind, RecordPosition, CRC32,
    MAX_HEADER_SIZE,
};

pub const SEGMENT_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// Path of the segment file with the given id: `NNNNNNNNN.data`.
pub fn segment_file_name(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{:09}{}", id, SEGMENT_FILE_SUFFIX))
}

/// One append-only log file.
///
/// A segment knows its own id and write cursor and nothing else; which
/// segment is active and how segments relate is the engine's concern.
/// The same machinery backs the auxiliary hint / merge-marker / seq-no
/// files, which are record files without a meaningful id.
pub struct Segment {
    id: u32,
    io: Box<dyn IoBackend>,
    write_offset: AtomicU64,
}

impl Segment {
    /// Opens (creating if absent) the segment with the given id. The
    /// write cursor starts at the current file size; recovery lowers it
    /// when the file ends in a torn record.
    pub fn open(dir: &Path, id: u32, io_type: IoType) -> Result<Self> {
        Self::open_path(&segment_file_name(dir, id), id, io_type)
    }

    pub fn open_hint(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(HINT_FILE_NAME), 0, IoType::Standard)
    }

    pub fn open_merge_finished(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::Standard)
    }

    pub fn open_seq_no(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(SEQ_NO_FILE_NAME), 0, IoType::Standard)
    }

    fn open_path(path: &Path, id: u32, io_type: IoType) -> Result<Self> {
        let io = fio::open(path, io_type)?;
        let size = io.size()?;
        Ok(Self {
            id,
            io,
            write_offset: AtomicU64::new(size),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current write cursor.
    pub fn offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    pub fn set_write_offset(&self, offset: u64) {
        self.write_offset.store(offset, Ordering::Release);
    }

    /// Appends the encoded bytes at the write cursor and returns the
    /// offset they landed at. Callers serialize appends through the
    /// engine lock.
    pub fn append(&self, buf: &[u8]) -> Result<u64> {
        let offset = self.write_offset.load(Ordering::Acquire);
        self.io.write_at(buf, offset)?;
        self.write_offset
            .store(offset + buf.len() as u64, Ordering::Release);
        Ok(offset)
    }

    /// Reads and decodes one record at `offset`, returning it with its
    /// encoded size.
    ///
    /// `EndOfSegment` covers every clean termination: reading at or past
    /// EOF, the all-zero sentinel left by padding, and a torn tail whose
    /// header or payload extends past the end of the file. A corrupted
    /// length field in the file's final record is indistinguishable from
    /// a torn write and also reads as `EndOfSegment`; only corruption
    /// that leaves the record within the file reaches the CRC check.
    pub fn read_record(&self, offset: u64) -> Result<(LogRecord, u32)> {
        let size = self.io.size()?;
        if offset >= size {
            return Err(Error::EndOfSegment);
        }

        // Never read more header bytes than the file still holds.
        let header_len = (MAX_HEADER_SIZE as u64).min(size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        self.io.read_at(&mut header_buf, offset)?;

        let header = decode_header(&header_buf).ok_or(Error::EndOfSegment)?;
        if header.crc == 0 && header.key_len == 0 && header.value_len == 0 {
            return Err(Error::EndOfSegment);
        }

        let body_len = header.key_len as usize + header.value_len as usize;
        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            match self.io.read_at(&mut body, offset + header.len as u64) {
                Ok(()) => {}
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(Error::EndOfSegment);
                }
                Err(e) => return Err(e),
            }
        }

        let mut digest = CRC32.digest();
        digest.update(&header_buf[4..header.len]);
        digest.update(&body);
        if digest.finalize() != header.crc {
            return Err(Error::InvalidCrc);
        }
        let kind = RecordKind::from_u8(header.kind).ok_or(Error::InvalidCrc)?;

        let value = body.split_off(header.key_len as usize);
        let record = LogRecord {
            key: body,
            value,
            kind,
        };
        Ok((record, (header.len + body_len) as u32))
    }

    /// Appends a hint record mapping `key` to `pos`.
    pub fn write_hint_record(&self, key: &[u8], pos: &RecordPosition) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: encode_position(pos),
            kind: RecordKind::Normal,
        };
        self.append(&encode_record(&record))?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::decode_position;

    fn record(key: &[u8], value: &[u8], kind: RecordKind) -> LogRecord {
        LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            kind,
        }
    }

    #[test]
    fn test_append_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let segment = Segment::open(dir.path(), 0, IoType::Standard).unwrap();

        let first = record(b"alpha", b"one", RecordKind::Normal);
        let second = record(b"beta", b"", RecordKind::Deleted);
        let off1 = segment.append(&encode_record(&first)).unwrap();
        let off2 = segment.append(&encode_record(&second)).unwrap();
        assert_eq!(off1, 0);

        let (decoded, size1) = segment.read_record(off1).unwrap();
        assert_eq!(decoded, first);
        assert_eq!(off2, size1 as u64);

        let (decoded, size2) = segment.read_record(off2).unwrap();
        assert_eq!(decoded, second);

        // scanning past the last record terminates cleanly
        assert!(matches!(
            segment.read_record(off2 + size2 as u64),
            Err(Error::EndOfSegment)
        ));
    }

    #[test]
    fn test_sequential_scan_consumes_reported_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let segment = Segment::open(dir.path(), 1, IoType::Standard).unwrap();

        let records: Vec<LogRecord> = (0..20usize)
            .map(|i| {
                record(
                    format!("key-{i:03}").as_bytes(),
                    &vec![i as u8; i],
                    RecordKind::Normal,
                )
            })
            .collect();
        for r in &records {
            segment.append(&encode_record(r)).unwrap();
        }

        let mut offset = 0;
        let mut seen = Vec::new();
        loop {
            match segment.read_record(offset) {
                Ok((r, size)) => {
                    seen.push(r);
                    offset += size as u64;
                }
                Err(Error::EndOfSegment) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(seen, records);
        assert_eq!(offset, segment.offset());
    }

    #[test]
    fn test_corrupted_byte_fails_crc() {
        let dir = tempfile::tempdir().unwrap();
        let payload = encode_record(&record(b"key", b"value", RecordKind::Normal));

        // flip each byte in turn and expect the checksum to catch it; the
        // trailing filler keeps a corrupted length field from reading past
        // EOF before the CRC is checked
        for i in 0..payload.len() {
            let segment = Segment::open(dir.path(), i as u32, IoType::Standard).unwrap();
            let mut twisted = payload.clone();
            twisted[i] ^= 0x40;
            twisted.extend_from_slice(&[0xAA; 200]);
            segment.append(&twisted).unwrap();
            assert!(
                matches!(segment.read_record(0), Err(Error::InvalidCrc)),
                "flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_corrupted_length_in_final_record_reads_as_end() {
        let dir = tempfile::tempdir().unwrap();
        let segment = Segment::open(dir.path(), 0, IoType::Standard).unwrap();
        let mut twisted = encode_record(&record(b"key", b"value", RecordKind::Normal));
        // inflate the value length so the payload appears to run past
        // EOF; with nothing after the record this is indistinguishable
        // from a torn write
        twisted[6] = 0x7f;
        segment.append(&twisted).unwrap();
        assert!(matches!(segment.read_record(0), Err(Error::EndOfSegment)));
    }

    #[test]
    fn test_zero_sentinel_reads_as_end() {
        let dir = tempfile::tempdir().unwrap();
        let segment = Segment::open(dir.path(), 0, IoType::Standard).unwrap();
        segment.append(&[0u8; MAX_HEADER_SIZE]).unwrap();
        assert!(matches!(segment.read_record(0), Err(Error::EndOfSegment)));
    }

    #[test]
    fn test_torn_tail_reads_as_end() {
        let dir = tempfile::tempdir().unwrap();
        let segment = Segment::open(dir.path(), 0, IoType::Standard).unwrap();
        let enc = encode_record(&record(b"key", b"a much longer value", RecordKind::Normal));
        segment.append(&enc[..enc.len() - 6]).unwrap();
        assert!(matches!(segment.read_record(0), Err(Error::EndOfSegment)));
    }

    #[test]
    fn test_hint_record_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let hint = Segment::open_hint(dir.path()).unwrap();
        let pos = RecordPosition {
            segment_id: 3,
            offset: 512,
            size: 64,
        };
        hint.write_hint_record(b"user:42", &pos).unwrap();

        let (decoded, _) = hint.read_record(0).unwrap();
        assert_eq!(decoded.key, b"user:42");
        assert_eq!(decode_position(&decoded.value).unwrap(), pos);
    }

    #[test]
    fn test_mmap_reads_match_standard_io() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Segment::open(dir.path(), 7, IoType::Standard).unwrap();
        let r = record(b"mapped", b"value", RecordKind::Normal);
        writer.append(&encode_record(&r)).unwrap();
        writer.sync().unwrap();

        let reader = Segment::open(dir.path(), 7, IoType::MemoryMap).unwrap();
        let (decoded, _) = reader.read_record(0).unwrap();
        assert_eq!(decoded, r);
    }
}

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::{Config, IndexType};
use crate::error::{Error, Result};
use crate::fio::IoType;
use crate::flock::FileLock;
use crate::index::{self, Index};
use crate::merge;
use crate::segment::{
    decode_position, encode_key_with_seq, encode_record, split_key_seq, LogRecord, RecordKind,
    RecordPosition, Segment, NON_TXN_SEQ, SEGMENT_FILE_SUFFIX, SEQ_NO_FILE_NAME,
};
use crate::util;

pub(crate) const LOCK_FILE_NAME: &str = "flock";
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// Point-in-time statistics for a store.
#[derive(Debug, Clone)]
pub struct Stat {
    /// Number of live keys.
    pub keys: usize,
    /// Number of segment files, the active one included.
    pub segments: usize,
    /// Estimated bytes belonging to overwritten or deleted records that a
    /// merge would reclaim.
    pub reclaimable_bytes: u64,
    /// Bytes the store directory occupies on disk.
    pub disk_size: u64,
}

/// Mutable engine state guarded by the engine-wide lock: which segment is
/// active, the sealed segments by id, and the write-side counters. Taking
/// this lock exclusively linearizes the append-to-log step with the
/// matching index update.
pub(crate) struct StoreState {
    pub(crate) active: Arc<Segment>,
    pub(crate) sealed: HashMap<u32, Arc<Segment>>,
    /// Bytes appended since the last fsync, for the bytes_per_sync trigger.
    bytes_since_sync: u64,
    pub(crate) reclaimable: u64,
}

impl StoreState {
    /// Resolves the segment owning `id`. The returned handle outlives the
    /// lock, so record reads happen without holding it.
    pub(crate) fn segment_for(&self, id: u32) -> Option<Arc<Segment>> {
        if self.active.id() == id {
            Some(Arc::clone(&self.active))
        } else {
            self.sealed.get(&id).cloned()
        }
    }
}

/// An embedded log-structured key-value store.
///
/// All operations are synchronous and safe to call from multiple threads.
/// An advisory lock on the directory keeps other processes out for the
/// lifetime of the value.
pub struct Store {
    pub(crate) config: Config,
    pub(crate) state: RwLock<StoreState>,
    pub(crate) index: Box<dyn Index>,
    /// Last-used transaction sequence number; 0 is reserved for
    /// non-transactional records.
    pub(crate) seq_no: AtomicU64,
    pub(crate) merging: AtomicBool,
    _lock: FileLock,
}

impl Store {
    /// Opens the store rooted at `config.dir`, creating the directory if
    /// needed, adopting any completed merge output and rebuilding the
    /// index from the log (hint file first, then replay). Fails with
    /// `AlreadyInUse` when another process holds the directory.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir)?;

        let lock = FileLock::lock(config.dir.join(LOCK_FILE_NAME)).map_err(|e| {
            if e.kind() == io::ErrorKind::WouldBlock {
                Error::AlreadyInUse
            } else {
                Error::Io(e)
            }
        })?;

        merge::adopt_merge_dir(&config.dir)?;

        // Memory maps only help the replay scan, which the persistent
        // index skips; its segments open writable from the start.
        let scan_io = if config.mmap_at_startup && config.index_type != IndexType::Persistent {
            IoType::MemoryMap
        } else {
            IoType::Standard
        };
        let (mut active, mut sealed, ids) = load_segments(&config, scan_io)?;
        let index = index::new_index(config.index_type, &config.dir)?;

        let mut reclaimable = 0u64;
        let seq_no = if config.index_type == IndexType::Persistent {
            load_seq_no(&config.dir)?
        } else {
            load_hint_file(&config.dir, index.as_ref())?;
            let boundary = merge::stored_merge_boundary(&config.dir)?;
            let max_seq = replay_segments(
                index.as_ref(),
                &active,
                &sealed,
                &ids,
                boundary,
                &mut reclaimable,
            )?;
            if config.mmap_at_startup {
                // Downgrade to standard IO now that scanning is done.
                let offset = active.offset();
                active = Segment::open(&config.dir, active.id(), IoType::Standard)?;
                active.set_write_offset(offset);
                for (id, slot) in sealed.iter_mut() {
                    *slot = Segment::open(&config.dir, *id, IoType::Standard)?;
                }
            }
            max_seq
        };

        tracing::info!(
            dir = %config.dir.display(),
            segments = ids.len(),
            last_seq = seq_no,
            "store opened"
        );

        Ok(Self {
            config,
            state: RwLock::new(StoreState {
                active: Arc::new(active),
                sealed: sealed
                    .into_iter()
                    .map(|(id, seg)| (id, Arc::new(seg)))
                    .collect(),
                bytes_since_sync: 0,
                reclaimable,
            }),
            index,
            seq_no: AtomicU64::new(seq_no),
            merging: AtomicBool::new(false),
            _lock: lock,
        })
    }

    /// Stores `value` under `key`, overwriting any previous version.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let record = LogRecord {
            key: encode_key_with_seq(key, NON_TXN_SEQ),
            value: value.to_vec(),
            kind: RecordKind::Normal,
        };

        let mut state = self.state.write().unwrap();
        let pos = self.append_record(&mut state, &record)?;
        if let Some(old) = self.index.put(key.to_vec(), pos)? {
            state.reclaimable += old.size as u64;
        }
        Ok(())
    }

    /// Returns the current value for `key`, or `KeyNotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let pos = self.index.get(key)?.ok_or(Error::KeyNotFound)?;
        self.read_position(&pos)
    }

    /// Removes `key`. Deleting a key that does not exist succeeds as a
    /// no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: encode_key_with_seq(key, NON_TXN_SEQ),
            value: Vec::new(),
            kind: RecordKind::Deleted,
        };

        let mut state = self.state.write().unwrap();
        // A racing delete may have removed the key between the unlocked
        // check above and taking the lock; bail before appending a
        // tombstone for a key that is already gone.
        if self.index.get(key)?.is_none() {
            return Ok(());
        }
        let pos = self.append_record(&mut state, &record)?;
        // The tombstone itself is reclaimable the moment it is written.
        state.reclaimable += pos.size as u64;
        match self.index.delete(key)? {
            Some(old) => {
                state.reclaimable += old.size as u64;
                Ok(())
            }
            // The index reported the key present a moment ago and we hold
            // the exclusive lock, so this is a logic defect.
            None => Err(Error::IndexUpdateFailed),
        }
    }

    /// All live keys in ascending order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut iter = self.index.iterator(false)?;
        let mut keys = Vec::with_capacity(self.index.len()?);
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        Ok(keys)
    }

    /// Visits every live key-value pair in ascending key order until the
    /// visitor returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut iter = self.index.iterator(false)?;
        while iter.valid() {
            let value = self.read_position(iter.value())?;
            if !f(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    pub fn stat(&self) -> Result<Stat> {
        let state = self.state.read().unwrap();
        Ok(Stat {
            keys: self.index.len()?,
            segments: state.sealed.len() + 1,
            reclaimable_bytes: state.reclaimable,
            disk_size: util::dir_size(&self.config.dir)?,
        })
    }

    /// Flushes the active segment to durable storage.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.active.sync()?;
        state.bytes_since_sync = 0;
        Ok(())
    }

    /// Persists the sequence counter and flushes every segment. The
    /// directory lock is released when the store is dropped.
    pub fn close(&self) -> Result<()> {
        let seq_no_path = self.config.dir.join(SEQ_NO_FILE_NAME);
        if seq_no_path.exists() {
            fs::remove_file(&seq_no_path)?;
        }
        let seq_no_file = Segment::open_seq_no(&self.config.dir)?;
        let record = LogRecord {
            key: SEQ_NO_KEY.to_vec(),
            value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
            kind: RecordKind::Normal,
        };
        seq_no_file.append(&encode_record(&record))?;
        seq_no_file.sync()?;

        self.index.close()?;

        let state = self.state.write().unwrap();
        state.active.sync()?;
        for segment in state.sealed.values() {
            segment.sync()?;
        }
        Ok(())
    }

    /// Copies every persisted file except the lock file into `dir`.
    pub fn backup(&self, dir: &Path) -> Result<()> {
        let _state = self.state.read().unwrap();
        util::copy_dir(&self.config.dir, dir, &[LOCK_FILE_NAME])
    }

    /// Reads the record at `pos` and returns its value. A tombstone reads
    /// back as `KeyNotFound`; the index never points at one in steady
    /// state, only transiently during replay.
    pub(crate) fn read_position(&self, pos: &RecordPosition) -> Result<Vec<u8>> {
        let segment = {
            let state = self.state.read().unwrap();
            state
                .segment_for(pos.segment_id)
                .ok_or(Error::DataFileNotFound(pos.segment_id))?
        };
        let (record, _) = segment.read_record(pos.offset)?;
        if record.kind == RecordKind::Deleted {
            return Err(Error::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Encodes and appends `record` to the active segment, rotating first
    /// when the append would push it past the size limit. Called with the
    /// engine lock held exclusively.
    pub(crate) fn append_record(
        &self,
        state: &mut StoreState,
        record: &LogRecord,
    ) -> Result<RecordPosition> {
        let encoded = encode_record(record);
        let len = encoded.len() as u64;

        if state.active.offset() + len > self.config.segment_size {
            state.active.sync()?;
            state.bytes_since_sync = 0;
            let next_id = state.active.id() + 1;
            let filled = Arc::clone(&state.active);
            state.sealed.insert(filled.id(), filled);
            state.active = Arc::new(Segment::open(&self.config.dir, next_id, IoType::Standard)?);
            tracing::debug!(segment = next_id, "rotated active segment");
        }

        let offset = state.active.append(&encoded)?;
        state.bytes_since_sync += len;

        let need_sync = self.config.sync_writes
            || (self.config.bytes_per_sync > 0
                && state.bytes_since_sync >= self.config.bytes_per_sync);
        if need_sync {
            state.active.sync()?;
            state.bytes_since_sync = 0;
        }

        Ok(RecordPosition {
            segment_id: state.active.id(),
            offset,
            size: len as u32,
        })
    }
}

fn load_segments(
    config: &Config,
    io_type: IoType,
) -> Result<(Segment, HashMap<u32, Segment>, Vec<u32>)> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(&config.dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stem) = name.strip_suffix(SEGMENT_FILE_SUFFIX) {
            let id: u32 = stem.parse().map_err(|_| {
                Error::DirectoryCorrupted(format!("unparseable segment file name {name}"))
            })?;
            ids.push(id);
        }
    }
    ids.sort_unstable();
    if ids.is_empty() {
        ids.push(0);
    }

    let mut sealed = HashMap::new();
    for &id in &ids[..ids.len() - 1] {
        sealed.insert(id, Segment::open(&config.dir, id, io_type)?);
    }
    let active = Segment::open(&config.dir, ids[ids.len() - 1], io_type)?;
    Ok((active, sealed, ids))
}

fn load_hint_file(dir: &Path, index: &dyn Index) -> Result<()> {
    if !dir.join(crate::segment::HINT_FILE_NAME).exists() {
        return Ok(());
    }
    let hint = Segment::open_hint(dir)?;
    let mut offset = 0u64;
    let mut loaded = 0usize;
    loop {
        match hint.read_record(offset) {
            Ok((record, size)) => {
                let pos = decode_position(&record.value).ok_or_else(|| {
                    Error::DirectoryCorrupted("hint record holds no position".into())
                })?;
                index.put(record.key, pos)?;
                loaded += 1;
                offset += size as u64;
            }
            Err(Error::EndOfSegment) => break,
            Err(e) => return Err(e),
        }
    }
    tracing::debug!(keys = loaded, "index preloaded from hint file");
    Ok(())
}

struct PendingTxn {
    key: Vec<u8>,
    kind: RecordKind,
    pos: RecordPosition,
}

/// Replays every segment in ascending id order, applying
/// non-transactional records immediately and buffering transactional ones
/// until their commit marker. Returns the highest sequence number seen.
fn replay_segments(
    index: &dyn Index,
    active: &Segment,
    sealed: &HashMap<u32, Segment>,
    ids: &[u32],
    boundary: Option<u32>,
    reclaimable: &mut u64,
) -> Result<u64> {
    let mut pending: HashMap<u64, Vec<PendingTxn>> = HashMap::new();
    let mut max_seq = NON_TXN_SEQ;

    for (i, &id) in ids.iter().enumerate() {
        // Segments below the merge boundary are covered by the hint file.
        if boundary.is_some_and(|b| id < b) {
            continue;
        }
        let segment = if id == active.id() {
            active
        } else {
            sealed.get(&id).ok_or(Error::DataFileNotFound(id))?
        };

        let mut offset = 0u64;
        loop {
            let (record, size) = match segment.read_record(offset) {
                Ok(v) => v,
                Err(Error::EndOfSegment) => break,
                Err(e) => return Err(e),
            };
            let pos = RecordPosition {
                segment_id: id,
                offset,
                size,
            };
            let (seq, real_key) = split_key_seq(&record.key).ok_or_else(|| {
                Error::DirectoryCorrupted(format!(
                    "record key without sequence prefix in segment {id}"
                ))
            })?;

            if seq == NON_TXN_SEQ {
                apply_replayed(index, real_key, record.kind, pos, reclaimable)?;
            } else if record.kind == RecordKind::TxnFinished {
                if let Some(ops) = pending.remove(&seq) {
                    for op in ops {
                        apply_replayed(index, op.key, op.kind, op.pos, reclaimable)?;
                    }
                }
            } else {
                pending.entry(seq).or_default().push(PendingTxn {
                    key: real_key,
                    kind: record.kind,
                    pos,
                });
            }

            max_seq = max_seq.max(seq);
            offset += size as u64;
        }

        // The last segment is the active one; future appends resume here,
        // overwriting any torn tail.
        if i == ids.len() - 1 {
            segment.set_write_offset(offset);
        }
    }

    if !pending.is_empty() {
        // Durable bytes without a commit marker stay invisible forever.
        tracing::warn!(
            transactions = pending.len(),
            "discarded uncommitted transactions during replay"
        );
    }
    Ok(max_seq)
}

fn apply_replayed(
    index: &dyn Index,
    key: Vec<u8>,
    kind: RecordKind,
    pos: RecordPosition,
    reclaimable: &mut u64,
) -> Result<()> {
    let old = if kind == RecordKind::Deleted {
        *reclaimable += pos.size as u64;
        index.delete(&key)?
    } else {
        index.put(key, pos)?
    };
    if let Some(old) = old {
        *reclaimable += old.size as u64;
    }
    Ok(())
}

fn load_seq_no(dir: &Path) -> Result<u64> {
    if !dir.join(SEQ_NO_FILE_NAME).exists() {
        return Ok(NON_TXN_SEQ);
    }
    let file = Segment::open_seq_no(dir)?;
    let (record, _) = file.read_record(0)?;
    let text = std::str::from_utf8(&record.value)
        .map_err(|_| Error::DirectoryCorrupted("seq-no record is not UTF-8".into()))?;
    text.parse()
        .map_err(|_| Error::DirectoryCorrupted(format!("seq-no record holds '{text}'")))
}

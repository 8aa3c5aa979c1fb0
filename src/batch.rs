use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::segment::{encode_key_with_seq, LogRecord, RecordKind};
use crate::store::Store;

/// Key of the commit marker record appended after a batch's payload.
const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// A set of writes that becomes visible atomically.
///
/// Operations are staged in memory; nothing reaches the log until
/// [`commit`](WriteBatch::commit). Replay after a crash only applies a
/// batch whose commit marker made it to disk, so a batch is either fully
/// visible or not at all. Staged operations collapse per key: the last
/// put or delete for a key wins.
pub struct WriteBatch<'a> {
    store: &'a Store,
    config: BatchConfig,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Store {
    /// Starts an empty write batch against this store.
    pub fn new_batch(&self, config: BatchConfig) -> WriteBatch<'_> {
        WriteBatch {
            store: self,
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl WriteBatch<'_> {
    /// Stages a put of `value` under `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= self.config.max_batch_size && !pending.contains_key(key) {
            return Err(Error::ExceedsMaxBatchSize);
        }
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                kind: RecordKind::Normal,
            },
        );
        Ok(())
    }

    /// Stages a delete of `key`. When the key is neither indexed nor
    /// staged the delete is dropped outright; when it only exists as a
    /// staged put, the staged put is cancelled instead of writing a
    /// tombstone for a key the log never held.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let mut pending = self.pending.lock().unwrap();
        let indexed = self.store.index.get(key)?.is_some();
        if !indexed {
            pending.remove(key);
            return Ok(());
        }
        if pending.len() >= self.config.max_batch_size && !pending.contains_key(key) {
            return Err(Error::ExceedsMaxBatchSize);
        }
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                kind: RecordKind::Deleted,
            },
        );
        Ok(())
    }

    /// Appends the staged operations plus a commit marker, then applies
    /// them to the index. Holds the engine lock for the duration, so a
    /// batch commits as a contiguous run of records with a fresh sequence
    /// number. An empty batch is a no-op.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.config.max_batch_size {
            return Err(Error::ExceedsMaxBatchSize);
        }

        let mut state = self.store.state.write().unwrap();
        let seq = self.store.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut applied = Vec::with_capacity(pending.len());
        for record in pending.values() {
            let tagged = LogRecord {
                key: encode_key_with_seq(&record.key, seq),
                value: record.value.clone(),
                kind: record.kind,
            };
            let pos = self.store.append_record(&mut state, &tagged)?;
            applied.push((record.key.clone(), record.kind, pos));
        }

        // The marker is what makes the batch visible to replay.
        let marker = LogRecord {
            key: encode_key_with_seq(TXN_FIN_KEY, seq),
            value: Vec::new(),
            kind: RecordKind::TxnFinished,
        };
        self.store.append_record(&mut state, &marker)?;

        if self.config.sync_writes && !self.store.config.sync_writes {
            state.active.sync()?;
        }

        for (key, kind, pos) in applied {
            let old = if kind == RecordKind::Deleted {
                state.reclaimable += pos.size as u64;
                self.store.index.delete(&key)?
            } else {
                self.store.index.put(key, pos)?
            };
            if let Some(old) = old {
                state.reclaimable += old.size as u64;
            }
        }

        tracing::debug!(seq, records = pending.len(), "write batch committed");
        pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_batch_invisible_before_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(Config::new(dir.path())).unwrap();

        let batch = store.new_batch(BatchConfig::default());
        batch.put(b"a", b"1").unwrap();
        assert!(matches!(store.get(b"a"), Err(Error::KeyNotFound)));

        batch.commit().unwrap();
        assert_eq!(store.get(b"a").unwrap(), b"1");
    }

    #[test]
    fn test_batch_last_write_per_key_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(Config::new(dir.path())).unwrap();
        store.put(b"gone", b"old").unwrap();

        let batch = store.new_batch(BatchConfig::default());
        batch.put(b"k", b"first").unwrap();
        batch.put(b"k", b"second").unwrap();
        batch.delete(b"gone").unwrap();
        batch.commit().unwrap();

        assert_eq!(store.get(b"k").unwrap(), b"second");
        assert!(matches!(store.get(b"gone"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn test_batch_delete_of_staged_put_cancels_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(Config::new(dir.path())).unwrap();

        let batch = store.new_batch(BatchConfig::default());
        batch.put(b"k", b"v").unwrap();
        batch.delete(b"k").unwrap();
        batch.commit().unwrap();

        assert!(matches!(store.get(b"k"), Err(Error::KeyNotFound)));
        // no tombstone was written, so nothing became reclaimable
        assert_eq!(store.stat().unwrap().reclaimable_bytes, 0);
    }

    #[test]
    fn test_batch_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(Config::new(dir.path())).unwrap();

        let batch = store.new_batch(BatchConfig {
            max_batch_size: 2,
            sync_writes: false,
        });
        batch.put(b"a", b"1").unwrap();
        batch.put(b"b", b"2").unwrap();
        assert!(matches!(batch.put(b"c", b"3"), Err(Error::ExceedsMaxBatchSize)));
        // restaging an already-staged key is always allowed
        batch.put(b"a", b"1x").unwrap();
    }

    #[test]
    fn test_committed_batch_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(Config::new(dir.path())).unwrap();
            let batch = store.new_batch(BatchConfig::default());
            batch.put(b"a", b"1").unwrap();
            batch.put(b"b", b"2").unwrap();
            batch.commit().unwrap();
            store.close().unwrap();
        }

        let store = Store::open(Config::new(dir.path())).unwrap();
        assert_eq!(store.get(b"a").unwrap(), b"1");
        assert_eq!(store.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn test_uncommitted_batch_records_are_discarded_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(Config::new(dir.path())).unwrap();
            store.put(b"durable", b"yes").unwrap();

            // Write batch records straight to the log without the commit
            // marker, simulating a crash mid-commit.
            let seq = store.seq_no.fetch_add(1, Ordering::SeqCst) + 1;
            let record = LogRecord {
                key: encode_key_with_seq(b"phantom", seq),
                value: b"never".to_vec(),
                kind: RecordKind::Normal,
            };
            let mut state = store.state.write().unwrap();
            store.append_record(&mut state, &record).unwrap();
            drop(state);
            store.sync().unwrap();
        }

        let store = Store::open(Config::new(dir.path())).unwrap();
        assert_eq!(store.get(b"durable").unwrap(), b"yes");
        assert!(matches!(store.get(b"phantom"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn test_sequence_numbers_resume_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(Config::new(dir.path())).unwrap();
            let batch = store.new_batch(BatchConfig::default());
            batch.put(b"a", b"1").unwrap();
            batch.commit().unwrap();
            assert_eq!(store.seq_no.load(Ordering::SeqCst), 1);
            store.close().unwrap();
        }

        let store = Store::open(Config::new(dir.path())).unwrap();
        let batch = store.new_batch(BatchConfig::default());
        batch.put(b"b", b"2").unwrap();
        batch.commit().unwrap();
        assert_eq!(store.seq_no.load(Ordering::SeqCst), 2);
        assert_eq!(store.get(b"a").unwrap(), b"1");
        assert_eq!(store.get(b"b").unwrap(), b"2");
    }
}

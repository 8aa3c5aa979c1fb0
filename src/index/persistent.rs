use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use redb::{Database, ReadableTable, TableDefinition};

use super::{Index, IndexIterator};
use crate::error::{Error, Result};
use crate::segment::{decode_position, encode_position, RecordPosition};

pub(crate) const INDEX_FILE_NAME: &str = "keydir-index";

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("keydir");

fn backend(err: impl std::fmt::Display) -> Error {
    Error::IndexBackend(err.to_string())
}

fn decode(bytes: &[u8]) -> Result<RecordPosition> {
    decode_position(bytes).ok_or_else(|| backend("stored position failed to decode"))
}

/// On-disk ordered backend. Commits are durable, so the key directory
/// survives restarts and open skips the log replay entirely; the engine
/// persists the last sequence number separately to compensate.
pub struct PersistentIndex {
    db: Database,
    // Live-key count, maintained here because counting means a full scan.
    len: AtomicUsize,
}

impl PersistentIndex {
    pub fn open(dir: &Path) -> Result<Self> {
        let db = Database::create(dir.join(INDEX_FILE_NAME)).map_err(backend)?;

        // Create the table on first open so readers never see a missing one.
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(TABLE).map_err(backend)?;
        txn.commit().map_err(backend)?;

        let mut len = 0;
        {
            let txn = db.begin_read().map_err(backend)?;
            let table = txn.open_table(TABLE).map_err(backend)?;
            for item in table.range::<&[u8]>(..).map_err(backend)? {
                item.map_err(backend)?;
                len += 1;
            }
        }

        Ok(Self {
            db,
            len: AtomicUsize::new(len),
        })
    }
}

impl Index for PersistentIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<Option<RecordPosition>> {
        let encoded = encode_position(&pos);
        let txn = self.db.begin_write().map_err(backend)?;
        let old = {
            let mut table = txn.open_table(TABLE).map_err(backend)?;
            let guard = table
                .insert(key.as_slice(), encoded.as_slice())
                .map_err(backend)?;
            match guard {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            }
        };
        txn.commit().map_err(backend)?;
        if old.is_none() {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPosition>> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(TABLE).map_err(backend)?;
        match table.get(key).map_err(backend)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &[u8]) -> Result<Option<RecordPosition>> {
        let txn = self.db.begin_write().map_err(backend)?;
        let old = {
            let mut table = txn.open_table(TABLE).map_err(backend)?;
            let old = match table.remove(key).map_err(backend)? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            old
        };
        txn.commit().map_err(backend)?;
        if old.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(old)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.len.load(Ordering::Relaxed))
    }

    fn iterator(&self, reverse: bool) -> Result<IndexIterator> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(TABLE).map_err(backend)?;
        let mut entries = Vec::new();
        for item in table.range::<&[u8]>(..).map_err(backend)? {
            let (key, value) = item.map_err(backend)?;
            entries.push((key.value().to_vec(), decode(value.value())?));
        }
        Ok(IndexIterator::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(segment_id: u32, offset: u64) -> RecordPosition {
        RecordPosition {
            segment_id,
            offset,
            size: 32,
        }
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let index = PersistentIndex::open(dir.path()).unwrap();

        assert_eq!(index.put(b"k".to_vec(), pos(0, 0)).unwrap(), None);
        assert_eq!(
            index.put(b"k".to_vec(), pos(0, 32)).unwrap(),
            Some(pos(0, 0))
        );
        assert_eq!(index.get(b"k").unwrap(), Some(pos(0, 32)));
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.delete(b"k").unwrap(), Some(pos(0, 32)));
        assert_eq!(index.get(b"k").unwrap(), None);
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = PersistentIndex::open(dir.path()).unwrap();
            index.put(b"a".to_vec(), pos(1, 100)).unwrap();
            index.put(b"b".to_vec(), pos(2, 200)).unwrap();
        }

        let index = PersistentIndex::open(dir.path()).unwrap();
        assert_eq!(index.len().unwrap(), 2);
        assert_eq!(index.get(b"a").unwrap(), Some(pos(1, 100)));
        assert_eq!(index.get(b"b").unwrap(), Some(pos(2, 200)));
    }

    #[test]
    fn test_iterator_is_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let index = PersistentIndex::open(dir.path()).unwrap();
        for (i, key) in [b"z".as_slice(), b"m", b"a"].iter().enumerate() {
            index.put(key.to_vec(), pos(0, i as u64)).unwrap();
        }

        let mut iter = index.iterator(false).unwrap();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"m".to_vec(), b"z".to_vec()]);
    }
}

use crossbeam_skiplist::SkipMap;

use super::{Index, IndexIterator};
use crate::error::Result;
use crate::segment::RecordPosition;

/// Lock-free concurrent ordered backend, rebuilt from the log on every
/// open. Readers never block writers, which makes it the better choice
/// for read-heavy workloads with many threads.
pub struct SkipListIndex {
    map: SkipMap<Vec<u8>, RecordPosition>,
}

impl SkipListIndex {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }
}

impl Default for SkipListIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for SkipListIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<Option<RecordPosition>> {
        // Writers are serialized by the engine lock, so the read-insert
        // pair cannot race with another writer of the same key.
        let old = self.map.get(&key).map(|entry| *entry.value());
        self.map.insert(key, pos);
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPosition>> {
        Ok(self.map.get(key).map(|entry| *entry.value()))
    }

    fn delete(&self, key: &[u8]) -> Result<Option<RecordPosition>> {
        Ok(self.map.remove(key).map(|entry| *entry.value()))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.map.len())
    }

    fn iterator(&self, reverse: bool) -> Result<IndexIterator> {
        let entries = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        Ok(IndexIterator::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(offset: u64) -> RecordPosition {
        RecordPosition {
            segment_id: 0,
            offset,
            size: 16,
        }
    }

    #[test]
    fn test_put_get_delete() {
        let index = SkipListIndex::new();
        assert_eq!(index.put(b"k".to_vec(), pos(0)).unwrap(), None);
        assert_eq!(index.put(b"k".to_vec(), pos(16)).unwrap(), Some(pos(0)));
        assert_eq!(index.get(b"k").unwrap(), Some(pos(16)));
        assert_eq!(index.delete(b"k").unwrap(), Some(pos(16)));
        assert_eq!(index.delete(b"k").unwrap(), None);
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_iterator_is_ordered() {
        let index = SkipListIndex::new();
        for key in [b"cc".as_slice(), b"aa", b"bb"] {
            index.put(key.to_vec(), pos(0)).unwrap();
        }

        let mut iter = index.iterator(false).unwrap();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);

        let mut iter = index.iterator(true).unwrap();
        assert_eq!(iter.key(), b"cc");
        iter.seek(b"ab");
        assert_eq!(iter.key(), b"aa");
    }
}

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Index, IndexIterator};
use crate::error::Result;
use crate::segment::RecordPosition;

/// Ordered balanced tree backend, rebuilt from the log on every open.
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPosition>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<Option<RecordPosition>> {
        Ok(self.tree.write().unwrap().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPosition>> {
        Ok(self.tree.read().unwrap().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<RecordPosition>> {
        Ok(self.tree.write().unwrap().remove(key))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.tree.read().unwrap().len())
    }

    fn iterator(&self, reverse: bool) -> Result<IndexIterator> {
        let entries = self
            .tree
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
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
            size: 20,
        }
    }

    #[test]
    fn test_put_get_delete() {
        let index = BTreeIndex::new();
        assert_eq!(index.put(b"k1".to_vec(), pos(0)).unwrap(), None);
        assert_eq!(index.put(b"k1".to_vec(), pos(20)).unwrap(), Some(pos(0)));
        assert_eq!(index.get(b"k1").unwrap(), Some(pos(20)));
        assert_eq!(index.len().unwrap(), 1);

        assert_eq!(index.delete(b"k1").unwrap(), Some(pos(20)));
        assert_eq!(index.delete(b"k1").unwrap(), None);
        assert_eq!(index.get(b"k1").unwrap(), None);
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_iterator_snapshot_is_stable() {
        let index = BTreeIndex::new();
        index.put(b"a".to_vec(), pos(0)).unwrap();
        index.put(b"b".to_vec(), pos(20)).unwrap();

        let iter = index.iterator(false).unwrap();
        index.put(b"c".to_vec(), pos(40)).unwrap();
        index.delete(b"a").unwrap();

        let mut keys = Vec::new();
        let mut iter = iter;
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}

mod btree;
mod persistent;
mod skiplist;

use std::path::Path;

pub use btree::BTreeIndex;
pub use persistent::PersistentIndex;
pub(crate) use persistent::INDEX_FILE_NAME;
pub use skiplist::SkipListIndex;

use crate::config::IndexType;
use crate::error::Result;
use crate::segment::RecordPosition;

/// Key directory: maps raw key bytes to the position of the most recent
/// live version. Deleted keys are absent. Implementations are safe for
/// concurrent readers and writers.
pub trait Index: Send + Sync {
    /// Stores `pos` for `key`, returning the position it replaced.
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<Option<RecordPosition>>;

    fn get(&self, key: &[u8]) -> Result<Option<RecordPosition>>;

    /// Removes `key`, returning the position it held. `None` means the
    /// key was not present.
    fn delete(&self, key: &[u8]) -> Result<Option<RecordPosition>>;

    /// Number of live keys.
    fn len(&self) -> Result<usize>;

    /// Snapshot iterator over the current key set. Mutations made after
    /// creation are not observed.
    fn iterator(&self, reverse: bool) -> Result<IndexIterator>;

    fn close(&self) -> Result<()>;
}

pub fn new_index(typ: IndexType, dir: &Path) -> Result<Box<dyn Index>> {
    match typ {
        IndexType::BTree => Ok(Box::new(BTreeIndex::new())),
        IndexType::SkipList => Ok(Box::new(SkipListIndex::new())),
        IndexType::Persistent => Ok(Box::new(PersistentIndex::open(dir)?)),
    }
}

/// Snapshot iterator shared by every backend.
///
/// Positions over the entries captured at creation time; `seek` binary
/// searches for the first key >= the target in forward mode and <= the
/// target in reverse mode.
pub struct IndexIterator {
    entries: Vec<(Vec<u8>, RecordPosition)>,
    current: usize,
    reverse: bool,
}

impl IndexIterator {
    /// `entries` must be in ascending key order.
    pub(crate) fn new(mut entries: Vec<(Vec<u8>, RecordPosition)>, reverse: bool) -> Self {
        if reverse {
            entries.reverse();
        }
        Self {
            entries,
            current: 0,
            reverse,
        }
    }

    pub fn rewind(&mut self) {
        self.current = 0;
    }

    pub fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.entries.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.entries.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    pub fn next(&mut self) {
        self.current += 1;
    }

    pub fn valid(&self) -> bool {
        self.current < self.entries.len()
    }

    /// Panics when the iterator is exhausted; guard with [`valid`].
    ///
    /// [`valid`]: IndexIterator::valid
    pub fn key(&self) -> &[u8] {
        &self.entries[self.current].0
    }

    pub fn value(&self) -> &RecordPosition {
        &self.entries[self.current].1
    }
}

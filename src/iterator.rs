use crate::config::IteratorConfig;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::store::Store;

/// A cursor over a point-in-time snapshot of the store's keys.
///
/// Keys come from a snapshot of the index taken at creation, so writes
/// made afterwards are not observed. Values are read from the log on
/// demand through [`value`](StoreIterator::value).
pub struct StoreIterator<'a> {
    store: &'a Store,
    inner: IndexIterator,
    prefix: Vec<u8>,
}

impl Store {
    /// Opens an iterator positioned on the first matching key.
    pub fn iterator(&self, config: IteratorConfig) -> Result<StoreIterator<'_>> {
        let inner = self.index.iterator(config.reverse)?;
        let mut iter = StoreIterator {
            store: self,
            inner,
            prefix: config.prefix,
        };
        iter.skip_to_next();
        Ok(iter)
    }
}

impl StoreIterator<'_> {
    /// Repositions on the first matching key.
    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_to_next();
    }

    /// Positions on the first key at or past `key` in iteration order.
    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
        self.skip_to_next();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.inner.next();
        self.skip_to_next();
    }

    /// Whether the cursor is on a key. Once exhausted it stays invalid
    /// until `rewind` or `seek`.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// The current key. Panics when the cursor is not valid.
    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    /// Reads the current value from the log. Panics when the cursor is
    /// not valid.
    pub fn value(&self) -> Result<Vec<u8>> {
        self.store.read_position(self.inner.value())
    }

    fn skip_to_next(&mut self) {
        if self.prefix.is_empty() {
            return;
        }
        while self.inner.valid() && !self.inner.key().starts_with(&self.prefix) {
            self.inner.next();
        }
    }
}

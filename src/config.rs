use std::path::PathBuf;

use crate::error::{Error, Result};

/// Which in-memory (or on-disk) structure backs the key directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Ordered balanced tree, rebuilt from the log on every open.
    BTree,
    /// Lock-free concurrent skip list, rebuilt from the log on every open.
    SkipList,
    /// On-disk ordered table that survives restarts without log replay.
    Persistent,
}

/// Configuration for a store instance
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding segment files, the hint file and the lock file
    pub dir: PathBuf,

    /// Maximum size of a segment file before rotation (default: 256MB)
    pub segment_size: u64,

    /// fsync after every append (default: false)
    pub sync_writes: bool,

    /// fsync once this many unflushed bytes accumulate; 0 disables (default: 0)
    pub bytes_per_sync: u64,

    /// Index backend (default: BTree)
    pub index_type: IndexType,

    /// Open segments through read-only memory maps for the startup scan
    /// (default: false)
    pub mmap_at_startup: bool,

    /// Fraction of reclaimable bytes that must be exceeded before a merge
    /// may proceed (default: 0.5)
    pub merge_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./caskdb"),
            segment_size: 256 * 1024 * 1024, // 256MB
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
            merge_ratio: 0.5,
        }
    }
}

impl Config {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the per-segment size limit
    pub fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// fsync on every append
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// fsync once this many unflushed bytes accumulate
    pub fn bytes_per_sync(mut self, bytes: u64) -> Self {
        self.bytes_per_sync = bytes;
        self
    }

    /// Select the index backend
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Memory-map segments for the startup scan
    pub fn mmap_at_startup(mut self, enabled: bool) -> Self {
        self.mmap_at_startup = enabled;
        self
    }

    /// Set the merge trigger ratio
    pub fn merge_ratio(mut self, ratio: f32) -> Self {
        self.merge_ratio = ratio;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("store directory is empty".into()));
        }
        if self.segment_size == 0 {
            return Err(Error::InvalidConfig("segment size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.merge_ratio) {
            return Err(Error::InvalidConfig(format!(
                "merge ratio {} outside [0, 1]",
                self.merge_ratio
            )));
        }
        Ok(())
    }
}

/// Options for store-level iterators
#[derive(Debug, Clone, Default)]
pub struct IteratorConfig {
    /// Only yield keys carrying this prefix; empty matches everything
    pub prefix: Vec<u8>,

    /// Iterate in descending key order
    pub reverse: bool,
}

impl IteratorConfig {
    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

/// Options for write batches
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of staged operations (default: 10_000)
    pub max_batch_size: usize,

    /// fsync after the commit marker is appended (default: true)
    pub sync_writes: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            sync_writes: true,
        }
    }
}

impl BatchConfig {
    pub fn max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.segment_size, 256 * 1024 * 1024);
        assert!(!config.sync_writes);
        assert_eq!(config.bytes_per_sync, 0);
        assert_eq!(config.index_type, IndexType::BTree);
        assert_eq!(config.merge_ratio, 0.5);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/caskdb_test")
            .segment_size(8 * 1024)
            .sync_writes(true)
            .bytes_per_sync(4096)
            .index_type(IndexType::SkipList)
            .mmap_at_startup(true)
            .merge_ratio(0.2);

        assert_eq!(config.dir, PathBuf::from("/tmp/caskdb_test"));
        assert_eq!(config.segment_size, 8 * 1024);
        assert!(config.sync_writes);
        assert_eq!(config.bytes_per_sync, 4096);
        assert_eq!(config.index_type, IndexType::SkipList);
        assert!(config.mmap_at_startup);
        assert_eq!(config.merge_ratio, 0.2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(Config::new("").validate().is_err());
        assert!(Config::new("/tmp/x").segment_size(0).validate().is_err());
        assert!(Config::new("/tmp/x").merge_ratio(1.5).validate().is_err());
        assert!(Config::new("/tmp/x").validate().is_ok());
    }
}

//! An embedded key-value store built on an append-only log.
//!
//! Writes append records to segment files and an in-memory key directory
//! maps each key to its latest record. Reads cost one index lookup and
//! one positioned file read. A merge rewrites live records into fresh
//! segments to reclaim space from overwritten and deleted data.
//!
//! ```no_run
//! use caskdb::{Config, Store};
//!
//! fn main() -> caskdb::Result<()> {
//!     let store = Store::open(Config::new("/tmp/caskdb-demo"))?;
//!     store.put(b"name", b"caskdb")?;
//!     assert_eq!(store.get(b"name")?, b"caskdb");
//!     store.close()?;
//!     Ok(())
//! }
//! ```

mod batch;
mod config;
mod error;
mod fio;
mod flock;
mod index;
mod iterator;
mod merge;
mod segment;
mod store;
mod util;

pub use batch::WriteBatch;
pub use config::{BatchConfig, Config, IndexType, IteratorConfig};
pub use error::{Error, Result};
pub use iterator::StoreIterator;
pub use store::{Stat, Store};

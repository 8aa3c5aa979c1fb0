mod file;
mod mmap;

use std::path::Path;

pub use file::StandardIo;
pub use mmap::MmapIo;

use crate::error::Result;

/// How a segment file is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Positioned reads and writes against an ordinary file descriptor.
    Standard,
    /// Read-only memory map, used only to accelerate startup scans.
    MemoryMap,
}

/// Positioned IO over one file. Backends are selected once when the file
/// is opened and swapped only by reopening the file.
pub trait IoBackend: Send + Sync {
    /// Fills `buf` from `offset`. Fails when the range extends past EOF.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Writes `buf` at `offset`, returning the number of bytes written.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Flushes written data to durable storage.
    fn sync(&self) -> Result<()>;

    /// Current file size in bytes.
    fn size(&self) -> Result<u64>;
}

pub fn open(path: &Path, io_type: IoType) -> Result<Box<dyn IoBackend>> {
    match io_type {
        IoType::Standard => Ok(Box::new(StandardIo::open(path)?)),
        IoType::MemoryMap => Ok(Box::new(MmapIo::open(path)?)),
    }
}

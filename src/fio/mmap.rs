use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use super::IoBackend;
use crate::error::Result;

/// Read-only memory-mapped file access.
///
/// Only used while rebuilding the index at startup; the engine reopens
/// every segment with [`super::StandardIo`] before serving writes.
pub struct MmapIo {
    // None for zero-length files, which cannot be mapped.
    map: Option<Mmap>,
}

impl MmapIo {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // The mapped file is never written through this backend, and
            // appends only happen after the map has been dropped.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "memory-mapped segments are read-only",
        )
    }
}

impl IoBackend for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let data = self.map.as_deref().unwrap_or(&[]);
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, _buf: &[u8], _offset: u64) -> Result<usize> {
        Err(Self::unsupported().into())
    }

    fn sync(&self) -> Result<()> {
        Err(Self::unsupported().into())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.map.as_deref().map_or(0, |m| m.len() as u64))
    }
}

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Exclusive advisory lock on a file, held for the lifetime of the value.
///
/// Prevents a second process from opening the same store directory. The
/// lock is released when the descriptor is closed on drop.
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Creates the lock file (truncating any previous contents) and takes
    /// an exclusive non-blocking lock. The holder's pid is written into
    /// the file for debugging.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path.as_ref())?;

        Self::try_lock(&file)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

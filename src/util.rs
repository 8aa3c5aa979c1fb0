use std::fs;
use std::io;
use std::path::Path;

use crate::error::Result;

/// Total size in bytes of every file under `dir`, recursively.
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Recursively copies `src` into `dst`, skipping entries whose file name
/// matches one of `exclude`.
pub fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if exclude.contains(&name) {
                continue;
            }
        }
        let target = dst.join(&name);
        if entry.metadata()?.is_dir() {
            copy_dir(&entry.path(), &target, exclude)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

/// Free bytes available on the filesystem holding `path`.
#[cfg(unix)]
pub fn available_disk_size(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn test_dir_size_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a")).unwrap().write_all(&[0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        File::create(dir.path().join("sub/b")).unwrap().write_all(&[0u8; 50]).unwrap();

        assert_eq!(dir_size(dir.path()).unwrap(), 150);
    }

    #[test]
    fn test_copy_dir_honors_exclusions() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        File::create(src.path().join("keep")).unwrap().write_all(b"data").unwrap();
        File::create(src.path().join("flock")).unwrap();

        let out = dst.path().join("backup");
        copy_dir(src.path(), &out, &["flock"]).unwrap();

        assert!(out.join("keep").exists());
        assert!(!out.join("flock").exists());
    }

    #[test]
    fn test_available_disk_size() {
        let dir = tempfile::tempdir().unwrap();
        assert!(available_disk_size(dir.path()).unwrap() > 0);
    }
}

//! Filesystem primitives
//!
//! Blocking helpers; async callers run them through `spawn_blocking`.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// A directory entry with the fields quota accounting needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Recursive size of a file or directory. Symlinks count as themselves and
/// are not followed; a missing path has size zero.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        total += dir_size(&entry.path())?;
    }
    Ok(total)
}

pub fn last_modified(path: &Path) -> io::Result<DateTime<Utc>> {
    let modified = std::fs::symlink_metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Immediate children of a directory. Missing directory gives no entries.
pub fn list_entries(dir: &Path) -> io::Result<Vec<EntryInfo>> {
    let reader = match std::fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for entry in reader {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push(EntryInfo {
            size: dir_size(&path)?,
            modified: last_modified(&path)?,
            path,
            name,
        });
    }
    Ok(entries)
}

/// Remove a file or a whole directory tree. Missing paths are not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Place `source` at `target` as a symlink, copying when links are unavailable.
pub fn link_or_copy(source: &Path, target: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(source, target).is_ok() {
            return Ok(());
        }
    }
    std::fs::copy(source, target).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_size_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b"), vec![0u8; 50]).unwrap();

        assert_eq!(dir_size(dir.path()).unwrap(), 150);
        assert_eq!(dir_size(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_list_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x"), b"abc").unwrap();

        let entries = list_entries(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "x");
        assert_eq!(entries[0].size, 3);
        assert!(list_entries(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_remove_path() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("f"), b"1").unwrap();

        remove_path(&sub).unwrap();
        assert!(!sub.exists());
        remove_path(&sub).unwrap();
    }

    #[test]
    fn test_link_or_copy_reads_through() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.sdf");
        std::fs::write(&source, b"molecule").unwrap();
        let target = dir.path().join("target.sdf");

        link_or_copy(&source, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"molecule");
    }
}

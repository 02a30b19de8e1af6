//! Staging file management
//!
//! Recordings are written next to their final destination with a `.part`
//! suffix. The guard removes the staging file when dropped, unless the
//! recording was committed by renaming it onto the final path.

use crate::file_operations::part_path;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Guard for a staging file that is cleaned up on drop
#[derive(Debug)]
pub(crate) struct PartFile {
    /// Path of the staging file (`<final>.part`)
    path: PathBuf,
    /// Destination the staging file is renamed to on commit
    final_path: PathBuf,
    /// Set once the file has been renamed; disarms the cleanup
    committed: bool,
}

impl PartFile {
    /// Prepares a staging path for `final_path`
    ///
    /// Creates the parent directory and removes any stale staging file left
    /// behind by a crashed run. The staging file itself is not created; the
    /// external recorder does that.
    pub(crate) fn prepare(final_path: &Path) -> io::Result<Self> {
        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let path = part_path(final_path);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(Self {
            path,
            final_path: final_path.to_path_buf(),
            committed: false,
        })
    }

    /// Get the path to the staging file
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically moves the staging file onto the final path
    ///
    /// Returns the size of the committed file in bytes.
    pub(crate) fn commit(mut self) -> io::Result<u64> {
        let size = fs::metadata(&self.path)?.len();
        fs::rename(&self.path, &self.final_path)?;
        self.committed = true;
        Ok(size)
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            // Silently ignore errors during cleanup
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Show (2020)").join("Season 01").join("ep.mkv");

        let part = PartFile::prepare(&target).unwrap();

        assert!(target.parent().unwrap().is_dir());
        assert_eq!(part.path(), dir.path().join("Show (2020)/Season 01/ep.mkv.part"));
        assert!(!part.path().exists());
    }

    #[test]
    fn test_prepare_removes_stale_part() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("movie.mkv");
        fs::write(dir.path().join("movie.mkv.part"), b"stale").unwrap();

        let part = PartFile::prepare(&target).unwrap();

        assert!(!part.path().exists());
    }

    #[test]
    fn test_drop_removes_uncommitted_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("movie.mkv");

        let path = {
            let part = PartFile::prepare(&target).unwrap();
            fs::write(part.path(), b"partial").unwrap();
            part.path().to_path_buf()
            // part is dropped here
        };

        assert!(!path.exists());
        assert!(!target.exists());
    }

    #[test]
    fn test_commit_renames_onto_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("movie.mkv");

        let part = PartFile::prepare(&target).unwrap();
        let part_path = part.path().to_path_buf();
        fs::write(&part_path, b"complete").unwrap();

        let size = part.commit().unwrap();

        assert_eq!(size, 8);
        assert!(target.is_file());
        assert!(!part_path.exists());
    }

    #[test]
    fn test_commit_without_file_fails_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("movie.mkv");

        let part = PartFile::prepare(&target).unwrap();
        assert!(part.commit().is_err());
        assert!(!target.exists());
    }
}

//! Temporary files, unlinked as soon as they are open.
use std::path::Path;

use crate::{config, BackingError, Provider, SharedFd};

/// Storage in a file of the configured temporary directory.
///
/// The directory entry is removed before [`Provider::create`] returns, the file is then only
/// reachable through its descriptor and the mappings made from it. Prefer a directory on `tmpfs`,
/// otherwise writes to the ring eventually reach a disk.
pub struct TempFile;

impl TempFile {
    /// Create the storage in an explicit directory, ignoring the configured one.
    pub fn create_in(&self, dir: &Path, len: u64) -> Result<SharedFd, BackingError> {
        if len == 0 {
            return Err(BackingError::Empty);
        }

        let file = tempfile::tempfile_in(dir)
            .map_err(|source| BackingError::Create { provider: self.name(), source })?;

        tracing::debug!(len, dir = %dir.display(), "created unlinked temporary storage");
        SharedFd::sized(file, len, self.name())
    }
}

impl Provider for TempFile {
    fn name(&self) -> &'static str {
        "tmpfile"
    }

    fn create(&self, len: u64) -> Result<SharedFd, BackingError> {
        self.create_in(&config::tmpdir(), len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_no_directory_entry() {
        let dir = tempfile::tempdir().unwrap();

        let fd = TempFile.create_in(dir.path(), 4096).expect("temporary storage");
        assert_eq!(fd.len(), 4096);
        assert_eq!(fd.provider(), "tmpfile");
        assert_eq!(fd.as_file().metadata().unwrap().len(), 4096);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_directory_fails_creation() {
        let err = TempFile
            .create_in(Path::new("/nonexistent/infiniray"), 4096)
            .unwrap_err();
        assert!(matches!(err, BackingError::Create { provider: "tmpfile", .. }));
    }
}

//! Anonymous memory files.
use memfile::CreateOptions;

use crate::{BackingError, Provider, SharedFd};

/// Storage from `memfd_create`, living purely in memory.
pub struct Memfd;

/// Name shown in `/proc/<pid>/fd`, it has no other meaning.
const NAME: &str = "infiniray";

impl Provider for Memfd {
    fn name(&self) -> &'static str {
        "memfd"
    }

    fn create(&self, len: u64) -> Result<SharedFd, BackingError> {
        if len == 0 {
            return Err(BackingError::Empty);
        }

        let file = CreateOptions::new()
            .create(NAME)
            .map_err(|source| BackingError::Create { provider: self.name(), source })?;

        tracing::debug!(len, "created memfd storage");
        SharedFd::sized(file.into_file(), len, self.name())
    }
}

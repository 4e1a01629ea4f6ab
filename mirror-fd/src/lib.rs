//! Shared storage for mirrored mappings.
//!
//! A [`SharedFd`] is a block of file-like storage of an exact byte size that is reachable only
//! through its open descriptor. It can be mapped several times at once, and writes through one
//! mapping are observed through all others. Two providers exist: an anonymous memory file
//! (`memfd_create`) and a temporary file that is unlinked right after creation. Which one is used
//! is decided by [`BackingKind`], see [`config`].
//!
//! The descriptor is only needed to establish mappings. Once those exist they keep the storage
//! alive on their own and the `SharedFd` should be dropped.
use core::sync::atomic::{AtomicBool, Ordering};
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

pub mod config;
mod memfd;
mod tmpfile;

pub use config::{backing, set_backing, set_tmpdir, tmpdir, BackingKind, ParseBackingError};
pub use memfd::Memfd;
pub use tmpfile::TempFile;

/// An owned descriptor to shared storage with known size.
///
/// Closes the descriptor on drop.
#[derive(Debug)]
pub struct SharedFd {
    file: File,
    len: u64,
    provider: &'static str,
}

/// An error creating or sizing shared storage.
#[derive(Debug, thiserror::Error)]
pub enum BackingError {
    /// A mapping can not have length zero, so neither can its storage.
    #[error("refusing to create zero-length shared storage")]
    Empty,
    #[error("failed to create {provider} storage: {source}")]
    Create {
        provider: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to size {provider} storage to {len} bytes: {source}")]
    Size {
        provider: &'static str,
        len: u64,
        #[source]
        source: io::Error,
    },
}

/// A mechanism producing [`SharedFd`]s.
pub trait Provider: Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Create storage of exactly `len` bytes.
    fn create(&self, len: u64) -> Result<SharedFd, BackingError>;
}

impl SharedFd {
    /// Wrap a freshly created, unnamed file and size it.
    pub(crate) fn sized(file: File, len: u64, provider: &'static str) -> Result<Self, BackingError> {
        if len == 0 {
            return Err(BackingError::Empty);
        }

        file.set_len(len)
            .map_err(|source| BackingError::Size { provider, len, source })?;

        Ok(SharedFd { file, len, provider })
    }

    /// The size of the storage in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Name of the provider that created this storage.
    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn as_file(&self) -> &File {
        &self.file
    }
}

impl AsRawFd for SharedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for SharedFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// Create shared storage with the process-wide [`BackingKind`].
pub fn create(len: u64) -> Result<SharedFd, BackingError> {
    create_with(config::backing(), len)
}

/// Create shared storage with an explicit provider choice.
pub fn create_with(kind: BackingKind, len: u64) -> Result<SharedFd, BackingError> {
    kind.provider().create(len)
}

/// The provider the process-wide configuration currently resolves to.
///
/// For [`BackingKind::Auto`] this attempts to create a memory file, so the answer reflects what
/// the running kernel and sandbox actually permit.
pub fn probe() -> &'static dyn Provider {
    match config::backing() {
        BackingKind::Memfd => &Memfd,
        BackingKind::TempFile => &TempFile,
        BackingKind::Auto => AUTO.resolve(),
    }
}

/// Memory files where permitted, temporary files otherwise.
static AUTO: Auto = Auto::new(&Memfd, &TempFile);

/// Prefers one provider, falls back to another once the first turns out to be unavailable.
///
/// The verdict is remembered for the lifetime of the `Auto`. [`BackingKind::Auto`] refers to a
/// process-wide instance preferring [`Memfd`] over [`TempFile`].
pub struct Auto {
    preferred: &'static dyn Provider,
    fallback: &'static dyn Provider,
    unavailable: AtomicBool,
}

impl Auto {
    pub const fn new(preferred: &'static dyn Provider, fallback: &'static dyn Provider) -> Self {
        Auto {
            preferred,
            fallback,
            unavailable: AtomicBool::new(false),
        }
    }

    /// The provider `create` currently goes to, checked by creating a minimal storage.
    pub fn resolve(&self) -> &'static dyn Provider {
        if self.preferred_available() {
            match self.preferred.create(1) {
                Err(BackingError::Create { source, .. }) if is_unavailable(&source) => {
                    self.mark_unavailable(&source);
                }
                // Anything else is not a verdict on the facility itself.
                _ => return self.preferred,
            }
        }

        self.fallback
    }

    /// Whether the preferred provider has not been ruled out yet.
    pub fn preferred_available(&self) -> bool {
        !self.unavailable.load(Ordering::Relaxed)
    }

    fn mark_unavailable(&self, source: &io::Error) {
        tracing::warn!(
            %source,
            preferred = self.preferred.name(),
            fallback = self.fallback.name(),
            "provider unavailable, falling back",
        );
        self.unavailable.store(true, Ordering::Relaxed);
    }
}

impl Provider for Auto {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn create(&self, len: u64) -> Result<SharedFd, BackingError> {
        if self.preferred_available() {
            match self.preferred.create(len) {
                Ok(fd) => return Ok(fd),
                Err(BackingError::Create { source, .. }) if is_unavailable(&source) => {
                    self.mark_unavailable(&source);
                }
                Err(err) => return Err(err),
            }
        }

        self.fallback.create(len)
    }
}

impl BackingKind {
    pub fn provider(self) -> &'static dyn Provider {
        match self {
            BackingKind::Auto => &AUTO,
            BackingKind::Memfd => &Memfd,
            BackingKind::TempFile => &TempFile,
        }
    }
}

/// Errors by which a facility says it does not exist or is not permitted.
pub(crate) fn is_unavailable(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENOSYS | libc::EPERM | libc::EACCES | libc::EINVAL)
    )
}

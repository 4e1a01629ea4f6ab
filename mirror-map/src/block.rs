//! Validated mirrored memory, and the backend that produces it.
use core::ptr::NonNull;

use mirror_fd::{BackingError, BackingKind};

use crate::region::{validate_mirror, MirroredRegion};
use crate::{MapError, Mapper};

/// Ownership of a validated ring memory block.
///
/// The block spans `2 * len()` bytes starting at `as_ptr()`. Byte `k` and byte `k + len()` are the
/// same storage: a write through either address is read back through the other. The whole span
/// is unmapped when the block is dropped, exactly once.
pub struct MirrorBlock {
    base: NonNull<u8>,
    len: usize,
    mapper: Mapper,
}

// Safety: the block is the exclusive owner of its mapping, nothing else refers to it.
unsafe impl Send for MirrorBlock {}
unsafe impl Sync for MirrorBlock {}

#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error(transparent)]
    Backing(#[from] BackingError),
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Something that produces [`MirrorBlock`]s.
///
/// This is the contract a ring container allocates through. The default is [`MirrorBackend`].
pub trait Backend {
    /// Allocate a block whose half size is at least `bytes`, rounded to whole pages.
    fn allocate(&self, bytes: usize) -> Result<MirrorBlock, AllocError>;

    /// Return a block. The default just drops it, which unmaps it.
    fn deallocate(&self, block: MirrorBlock) {
        drop(block)
    }

    /// Granularity of the half size of allocated blocks.
    fn pagesize(&self) -> usize;
}

/// Creates blocks over fresh shared storage with a [`Mapper`].
#[derive(Clone, Debug, Default)]
pub struct MirrorBackend {
    mapper: Mapper,
    /// `None` defers to the process-wide [`mirror_fd::config`].
    backing: Option<BackingKind>,
}

impl MirrorBlock {
    /// Map `bytes` (rounded up to whole pages) of new shared storage twice, back to back.
    ///
    /// On any failure all partial mappings and the storage are released before returning.
    pub fn allocate(
        mapper: &Mapper,
        bytes: usize,
        backing: BackingKind,
    ) -> Result<Self, AllocError> {
        let len = mapper.page_round(bytes)?;
        let span = len.checked_mul(2).ok_or(MapError::TooLarge { len })?;

        let shared = mirror_fd::create_with(backing, len as u64)?;
        let placeholder = MirroredRegion::reserve(mapper, span)?;

        // Safety: both halves replace parts of the placeholder which we own. Since the two halves
        // cover it exactly, only the placeholder ever unmaps, see below.
        let first = unsafe { MirroredRegion::map_at(mapper, placeholder.base(), len, &shared)? };
        let second = match unsafe { MirroredRegion::map_at(mapper, first.end(), len, &shared) } {
            Ok(second) => second,
            Err(err) => {
                first.take();
                return Err(err.into());
            }
        };

        // The mappings keep the storage alive now.
        drop(shared);

        let mirrored = validate_mirror(&first, &second);
        first.take();
        second.take();

        if !mirrored {
            let base = placeholder.as_ptr() as usize;
            tracing::warn!(base, len, "mirror validation failed, releasing the mapping");
            return Err(MapError::NotMirrored { base, len }.into());
        }

        let span = placeholder.take();
        tracing::debug!(base = ?span.addr, len, "allocated mirrored block");

        Ok(MirrorBlock {
            base: span.addr,
            len,
            mapper: mapper.clone(),
        })
    }

    /// The first byte of the first half.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// The size of one half, which is the size of the ring.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The size of the whole mirrored span.
    pub fn span(&self) -> usize {
        2 * self.len
    }
}

impl Drop for MirrorBlock {
    fn drop(&mut self) {
        let second = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.len)) };

        // Safety: we own both halves, nobody refers to them past our own lifetime. Unmapping an
        // already unmapped range is not an error, so the full span is the catch-all when either
        // half failed for whatever reason.
        unsafe {
            let upper = self.mapper.unmap(second, self.len);
            let lower = self.mapper.unmap(self.base, self.len);

            if !(upper && lower) && !self.mapper.unmap(self.base, self.span()) {
                tracing::warn!(base = ?self.base, len = self.len, "failed to release mirrored block");
                return;
            }
        }

        tracing::debug!(base = ?self.base, len = self.len, "released mirrored block");
    }
}

impl core::fmt::Debug for MirrorBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MirrorBlock")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

impl MirrorBackend {
    pub fn new(mapper: Mapper) -> Self {
        MirrorBackend { mapper, backing: None }
    }

    /// Use a fixed provider instead of the process-wide configuration.
    pub fn with_backing(mut self, backing: BackingKind) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }
}

impl Backend for MirrorBackend {
    fn allocate(&self, bytes: usize) -> Result<MirrorBlock, AllocError> {
        let backing = self.backing.unwrap_or_else(mirror_fd::backing);
        MirrorBlock::allocate(&self.mapper, bytes, backing)
    }

    fn pagesize(&self) -> usize {
        self.mapper.pagesize()
    }
}

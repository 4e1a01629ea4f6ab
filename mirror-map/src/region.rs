//! Single mappings and the proof that two of them mirror each other.
use core::ptr::NonNull;
use std::os::fd::AsRawFd;

use mirror_fd::SharedFd;

use crate::{MapError, Mapper};

/// One owned virtual memory mapping.
///
/// Unmapped on drop, unless ownership was moved out with [`MirroredRegion::take`].
pub struct MirroredRegion {
    /// `None` only after `take`, which consumes the region. Observable solely inside `Drop`.
    addr: Option<NonNull<u8>>,
    len: usize,
    mapper: Mapper,
}

/// A mapping whose owner gave up on unmapping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMapping {
    pub addr: NonNull<u8>,
    pub len: usize,
}

impl MirroredRegion {
    /// Reserve private address space of `len` bytes, anywhere.
    ///
    /// This is the placeholder the shared halves are later placed into, it makes sure the whole
    /// span is free and page aligned.
    pub fn reserve(mapper: &Mapper, len: usize) -> Result<Self, MapError> {
        Self::check_len(mapper, len)?;
        let addr = mapper.reserve(len)?;
        tracing::debug!(addr = ?addr, len, "reserved placeholder");

        Ok(MirroredRegion {
            addr: Some(addr),
            len,
            mapper: mapper.clone(),
        })
    }

    /// Map `len` bytes of `backing` at exactly `addr`.
    ///
    /// # Safety
    ///
    /// Any previous mapping in `[addr, addr+len)` is silently replaced. The caller must own that
    /// range, usually as part of a reservation from [`MirroredRegion::reserve`], and not use any
    /// reference into it afterwards.
    pub unsafe fn map_at(
        mapper: &Mapper,
        addr: NonNull<u8>,
        len: usize,
        backing: &SharedFd,
    ) -> Result<Self, MapError> {
        Self::check_len(mapper, len)?;
        let addr = mapper.map_shared_fixed(addr, len, backing.as_raw_fd())?;
        tracing::debug!(addr = ?addr, len, provider = backing.provider(), "mapped shared half");

        Ok(MirroredRegion {
            addr: Some(addr),
            len,
            mapper: mapper.clone(),
        })
    }

    fn check_len(mapper: &Mapper, len: usize) -> Result<(), MapError> {
        let pagesize = mapper.pagesize();
        if len == 0 || len % pagesize != 0 {
            return Err(MapError::Unaligned { len, pagesize });
        }

        Ok(())
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base().as_ptr()
    }

    /// The first address of the mapping.
    pub fn base(&self) -> NonNull<u8> {
        // Every constructor sets the address, only `take` removes it while consuming `self`.
        self.addr.unwrap_or(NonNull::dangling())
    }

    /// The first address after the mapping.
    pub fn end(&self) -> NonNull<u8> {
        // Safety: one past the end of the mapping is in-bounds for pointer arithmetic.
        unsafe { NonNull::new_unchecked(self.as_ptr().add(self.len)) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Give up ownership without unmapping.
    pub fn take(mut self) -> RawMapping {
        let addr = self.base();
        self.addr = None;
        RawMapping { addr, len: self.len }
    }

    /// Unmap now.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for MirroredRegion {
    fn drop(&mut self) {
        let Some(addr) = self.addr.take() else {
            return;
        };

        // Safety: we own the mapping and hand out no references that outlive `self`.
        if !unsafe { self.mapper.unmap(addr, self.len) } {
            tracing::warn!(addr = ?addr, len = self.len, "failed to unmap region");
        } else {
            tracing::debug!(addr = ?addr, len = self.len, "unmapped region");
        }
    }
}

/// Check that `b` is a mirror of `a`, placed directly after it.
///
/// Writes distinct sentinels to the first byte of `b` and the last byte of `a` and reads them back
/// through the respective other region. Both bytes are zero afterwards, whatever the outcome. This
/// must only run while nothing else observes the regions, i.e. during construction.
pub fn validate_mirror(a: &MirroredRegion, b: &MirroredRegion) -> bool {
    const LOW: u8 = 0x55;
    const HIGH: u8 = 0xAA;

    let len = a.len();
    if len == 0 || b.len() != len || b.base() != a.end() {
        return false;
    }

    let a = a.as_ptr();
    let b = b.as_ptr();

    // Safety: all four offsets are within the respective live mapping. Volatile so that the
    // compiler can not forward the stores to the loads, which alias only by the kernel's doing.
    unsafe {
        a.write_volatile(0);
        b.write_volatile(LOW);
        b.add(len - 1).write_volatile(0);
        a.add(len - 1).write_volatile(HIGH);

        let mirrored = a.read_volatile() == LOW && b.add(len - 1).read_volatile() == HIGH;

        a.write_volatile(0);
        b.write_volatile(0);
        a.add(len - 1).write_volatile(0);
        b.add(len - 1).write_volatile(0);

        mirrored
    }
}

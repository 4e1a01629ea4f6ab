use core::marker::PhantomData;
use core::mem::size_of;

use mirror_map::{Backend, MirrorBackend, MirrorBlock};

use crate::{Error, Result};

/// Typed front of a [`Backend`], counting in elements of `T` instead of bytes.
pub struct RingAllocator<T, B = MirrorBackend> {
    backend: B,
    _marker: PhantomData<fn() -> T>,
}

/// A block together with how many elements fit into it.
#[derive(Debug)]
pub struct Allocation {
    pub block: MirrorBlock,
    /// Number of whole elements in one half, at least the requested count.
    pub count: usize,
    /// Size of one half in bytes.
    pub bytes: usize,
}

impl<T, B: Backend> RingAllocator<T, B> {
    pub fn new(backend: B) -> Self {
        RingAllocator {
            backend,
            _marker: PhantomData,
        }
    }

    /// Allocate room for at least `n` elements.
    pub fn allocate(&self, n: usize) -> Result<MirrorBlock> {
        Ok(self.backend.allocate(Self::array_size(n)?)?)
    }

    /// Allocate room for at least `n` elements and report how many actually fit.
    ///
    /// The byte size is rounded up to whole pages, the count is the number of elements that
    /// fit in that many bytes.
    pub fn allocate_at_least(&self, n: usize) -> Result<Allocation> {
        let block = self.allocate(n)?;
        let bytes = block.len();

        Ok(Allocation {
            block,
            count: bytes / size_of::<T>(),
            bytes,
        })
    }

    pub fn deallocate(&self, block: MirrorBlock) {
        self.backend.deallocate(block)
    }

    pub fn pagesize(&self) -> usize {
        self.backend.pagesize()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn array_size(n: usize) -> Result<usize> {
        n.checked_mul(size_of::<T>()).ok_or(Error::CapacityExceeded {
            capacity: usize::MAX / size_of::<T>().max(1),
            requested: n,
        })
    }
}

impl<T, B: Default> Default for RingAllocator<T, B> {
    fn default() -> Self {
        RingAllocator {
            backend: B::default(),
            _marker: PhantomData,
        }
    }
}

impl<T, B: Clone> Clone for RingAllocator<T, B> {
    fn clone(&self) -> Self {
        RingAllocator {
            backend: self.backend.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, B: core::fmt::Debug> core::fmt::Debug for RingAllocator<T, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingAllocator")
            .field("backend", &self.backend)
            .field("element", &core::any::type_name::<T>())
            .finish()
    }
}

use core::ffi::{c_int, c_void};
use core::ptr::NonNull;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};

/// The operating system calls needed to place mirrored mappings.
///
/// Functions signal failure by returning a null pointer or `-1` and leave the reason to `errno`.
/// The entries that change the address space are `unsafe` to call, a table is only ever invoked
/// through the methods of the [`Mapper`] owning it.
///
/// ```compile_fail
/// fn release(table: &mirror_map::VTable, addr: *mut core::ffi::c_void, len: usize) {
///     (table.munmap)(addr, len);
/// }
/// ```
pub struct VTable {
    /// Reserve `len` bytes of private, anonymous, read-write address space anywhere.
    pub reserve: unsafe fn(len: usize) -> *mut c_void,
    /// Map `len` bytes of `file` shared and read-write at exactly `addr`, replacing whatever was
    /// mapped there.
    pub map_shared_fixed: unsafe fn(addr: *mut c_void, len: usize, file: c_int) -> *mut c_void,
    pub munmap: unsafe fn(*mut c_void, usize) -> c_int,
    pub errno: fn() -> c_int,
    /// Granularity of mappings, a power of two.
    pub pagesize: fn() -> usize,
}

/// Performs mappings through a [`VTable`].
///
/// The table itself is not reachable from a `Mapper`:
///
/// ```compile_fail
/// let mapper = mirror_map::Mapper::new();
/// let munmap = mapper.munmap;
/// ```
#[derive(Clone)]
pub struct Mapper {
    inner: Arc<Inner>,
}

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("reserving {len} bytes of address space failed (errno {errno})")]
    Reserve { len: usize, errno: c_int },
    #[error("mapping {len} shared bytes at {addr:#x} failed (errno {errno})")]
    MapFixed { addr: usize, len: usize, errno: c_int },
    #[error("mapping requested at {expected:#x} was placed at {actual:#x}")]
    Misplaced { expected: usize, actual: usize },
    #[error("halves of {len} bytes at {base:#x} do not mirror each other")]
    NotMirrored { base: usize, len: usize },
    #[error("{len} bytes are not a positive multiple of the page size {pagesize}")]
    Unaligned { len: usize, pagesize: usize },
    #[error("a mirror of {len} bytes does not fit the address space")]
    TooLarge { len: usize },
}

struct Inner {
    vtable: VTable,
}

static LIBC: Lazy<Mapper> = Lazy::new(|| {
    unsafe fn _reserve(len: usize) -> *mut c_void {
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        let ptr = libc::mmap(core::ptr::null_mut(), len, prot, flags, -1, 0);
        if ptr == libc::MAP_FAILED {
            return core::ptr::null_mut();
        }
        ptr
    }

    unsafe fn _map_shared_fixed(addr: *mut c_void, len: usize, file: c_int) -> *mut c_void {
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_SHARED | libc::MAP_FIXED;
        let ptr = libc::mmap(addr, len, prot, flags, file, 0);
        if ptr == libc::MAP_FAILED {
            return core::ptr::null_mut();
        }
        ptr
    }

    unsafe fn _munmap(addr: *mut c_void, len: usize) -> c_int {
        libc::munmap(addr, len)
    }

    fn _errno() -> c_int {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

    unsafe {
        Mapper::new_unchecked(VTable {
            reserve: _reserve,
            map_shared_fixed: _map_shared_fixed,
            munmap: _munmap,
            errno: _errno,
            pagesize,
        })
    }
});

/// The page size of this system, queried once.
pub fn pagesize() -> usize {
    static PAGE_SIZE: OnceCell<usize> = OnceCell::new();

    *PAGE_SIZE.get_or_init(|| {
        match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            // Not going to happen on any POSIX system, but the smallest common page is safe.
            size if size <= 0 => 4096,
            size => size as usize,
        }
    })
}

impl Mapper {
    /// Create a `Mapper` from a customized vtable.
    ///
    /// # Safety
    ///
    /// The VTable must contain functions that implement the `mmap` interface as documented on
    /// each field. In particular a successful `map_shared_fixed` must make the bytes at `addr`
    /// alias the file's storage.
    pub unsafe fn new_unchecked(vtable: VTable) -> Self {
        Mapper {
            inner: Arc::new(Inner { vtable }),
        }
    }

    /// The mapper backed by `libc`, shared by all its users.
    pub fn new() -> Self {
        LIBC.clone()
    }

    pub fn pagesize(&self) -> usize {
        (self.inner.vtable.pagesize)()
    }

    /// Round `len` up to whole pages, at least one.
    pub fn page_round(&self, len: usize) -> Result<usize, MapError> {
        let pagesize = self.pagesize();
        len.max(1)
            .checked_next_multiple_of(pagesize)
            .ok_or(MapError::TooLarge { len })
    }

    pub(crate) fn reserve(&self, len: usize) -> Result<NonNull<u8>, MapError> {
        // Safety: fresh address space chosen by the system, no existing mapping is touched.
        let ptr = unsafe { (self.inner.vtable.reserve)(len) };
        NonNull::new(ptr.cast()).ok_or_else(|| MapError::Reserve {
            len,
            errno: (self.inner.vtable.errno)(),
        })
    }

    /// # Safety
    ///
    /// Replaces any mapping in `[addr, addr+len)`. The caller must own that range.
    pub(crate) unsafe fn map_shared_fixed(
        &self,
        addr: NonNull<u8>,
        len: usize,
        file: c_int,
    ) -> Result<NonNull<u8>, MapError> {
        let ptr = (self.inner.vtable.map_shared_fixed)(addr.as_ptr().cast(), len, file);

        let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
            return Err(MapError::MapFixed {
                addr: addr.as_ptr() as usize,
                len,
                errno: (self.inner.vtable.errno)(),
            });
        };

        if ptr != addr {
            // Not ours to keep, we did not ask for it.
            (self.inner.vtable.munmap)(ptr.as_ptr().cast(), len);
            return Err(MapError::Misplaced {
                expected: addr.as_ptr() as usize,
                actual: ptr.as_ptr() as usize,
            });
        }

        Ok(ptr)
    }

    /// # Safety
    ///
    /// No references into `[addr, addr+len)` may be used afterwards.
    pub(crate) unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> bool {
        0 == (self.inner.vtable.munmap)(addr.as_ptr().cast(), len)
    }
}

impl Default for Mapper {
    fn default() -> Self {
        Mapper::new()
    }
}

impl core::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mapper")
            .field("pagesize", &self.pagesize())
            .finish()
    }
}

#[test]
fn page_rounding() {
    let mapper = Mapper::new();
    let page = mapper.pagesize();
    assert!(page.is_power_of_two());
    assert_eq!(mapper.page_round(0).unwrap(), page);
    assert_eq!(mapper.page_round(1).unwrap(), page);
    assert_eq!(mapper.page_round(page).unwrap(), page);
    assert_eq!(mapper.page_round(page + 1).unwrap(), 2 * page);
    assert!(mapper.page_round(usize::MAX).is_err());
}

use core::marker::PhantomData;
use core::mem::{needs_drop, size_of, ManuallyDrop};
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use core::{fmt, slice};

use mirror_map::{Backend, MirrorBackend, MirrorBlock};
use num_integer::Integer;

use crate::allocator::{Allocation, RingAllocator};
use crate::layout::Wrap;
use crate::{Error, Result};

/// A fixed-capacity ring whose live elements are always one contiguous slice.
///
/// Elements are appended at the back and evicted from the front. The memory is mapped twice back
/// to back, so when the window runs over the end of the ring it simply continues into the mirror
/// of the start. The ring dereferences to `[T]` and every slice method applies to the window.
///
/// ```
/// use infiniray::RingArray;
///
/// let mut ring = RingArray::<u32>::new(1024)?;
/// ring.append(0..ring.capacity() as u32)?;
/// ring.erase(10);
/// ring.append([7, 8, 9])?;
///
/// assert_eq!(ring.front(), Some(&10));
/// assert_eq!(ring[ring.len() - 3..], [7, 8, 9]);
/// # Ok::<_, infiniray::Error>(())
/// ```
///
/// Element types without a place in the ring do not compile:
///
/// ```compile_fail
/// let ring = infiniray::RingArray::<()>::new(16);
/// ```
pub struct RingArray<T, B: Backend = MirrorBackend> {
    /// Returned to the allocator by hand, after the elements are gone.
    block: ManuallyDrop<MirrorBlock>,
    base: NonNull<T>,
    /// Whole elements in one half.
    capacity: usize,
    /// Bytes in one half.
    bytes: usize,
    /// The logical start, kept below `period`.
    pos: usize,
    /// After this many steps of `pos` the head address repeats.
    period: usize,
    len: usize,
    allocator: RingAllocator<T, B>,
    _owns: PhantomData<T>,
}

// Safety: the ring exclusively owns its block and its elements, like a `Vec`.
unsafe impl<T: Send, B: Backend + Send> Send for RingArray<T, B> {}
unsafe impl<T: Sync, B: Backend + Sync> Sync for RingArray<T, B> {}

impl<T> RingArray<T> {
    /// Create a ring for at least `capacity` elements.
    ///
    /// The actual capacity fills the allocated pages and may be larger.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_backend(capacity, MirrorBackend::default())
    }
}

impl<T, B: Backend> RingArray<T, B> {
    pub fn with_backend(capacity: usize, backend: B) -> Result<Self> {
        #[allow(clippy::let_unit_value)]
        let () = Wrap::<T>::ACCEPTED;

        let allocator = RingAllocator::new(backend);
        // At least one element, even if the caller asked for none.
        let Allocation { block, count, bytes } = allocator.allocate_at_least(capacity.max(1))?;
        debug_assert_eq!(block.as_ptr() as usize % core::mem::align_of::<T>(), 0);

        let period = bytes / size_of::<T>().gcd(&bytes);
        tracing::debug!(capacity = count, bytes, period, fast = Wrap::<T>::FAST, "ring created");

        Ok(RingArray {
            base: block.base().cast(),
            block: ManuallyDrop::new(block),
            capacity: count,
            bytes,
            pos: 0,
            period,
            len: 0,
            allocator,
            _owns: PhantomData,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// How many more elements fit.
    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    /// Size of one half of the mirrored memory.
    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    pub fn allocator(&self) -> &RingAllocator<T, B> {
        &self.allocator
    }

    /// The address of the first live element.
    fn head(&self) -> *mut T {
        if Wrap::<T>::FAST {
            debug_assert!(self.pos < self.capacity);
            // Safety: `pos < period == capacity`, within the first half.
            unsafe { self.base.as_ptr().add(self.pos) }
        } else {
            let offset = self.pos as u128 * size_of::<T>() as u128 % self.bytes as u128;
            // Safety: the offset is below `bytes`, within the first half.
            unsafe { self.base.as_ptr().cast::<u8>().add(offset as usize).cast() }
        }
    }

    pub fn as_slice(&self) -> &[T] {
        // Safety: `len` initialized elements follow the head. They end at most `capacity`
        // elements past an address of the first half, so within the mirror.
        unsafe { slice::from_raw_parts(self.head(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // Safety: as in `as_slice`, and we are borrowed uniquely.
        unsafe { slice::from_raw_parts_mut(self.head(), self.len) }
    }

    /// Checked access.
    pub fn at(&self, index: usize) -> Result<&T> {
        let len = self.len;
        self.as_slice()
            .get(index)
            .ok_or(Error::OutOfRange { index, len })
    }

    pub fn at_mut(&mut self, index: usize) -> Result<&mut T> {
        let len = self.len;
        self.as_mut_slice()
            .get_mut(index)
            .ok_or(Error::OutOfRange { index, len })
    }

    pub fn front(&self) -> Option<&T> {
        self.as_slice().first()
    }

    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.as_mut_slice().first_mut()
    }

    pub fn back(&self) -> Option<&T> {
        self.as_slice().last()
    }

    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.as_mut_slice().last_mut()
    }

    /// The whole mirrored span, both halves, as raw bytes.
    ///
    /// Byte `k` and byte `k + byte_size()` are the same memory. Reading through this pointer
    /// while holding a reference from the slice view is fine; writing is not.
    pub fn raw_block(&self) -> *const [u8] {
        ptr::slice_from_raw_parts(self.block.as_ptr(), self.block.span())
    }

    /// Append one element.
    pub fn push(&mut self, value: T) -> Result<()> {
        self.check_room(1)?;
        // Safety: just checked.
        unsafe { self.push_unchecked(value) };
        Ok(())
    }

    /// Append the element returned by `f`, which is only called if there is room.
    pub fn emplace_with(&mut self, f: impl FnOnce() -> T) -> Result<&mut T> {
        self.check_room(1)?;
        // Safety: just checked.
        let slot = unsafe { self.push_unchecked(f()) };
        // Safety: initialized and within the window.
        Ok(unsafe { &mut *slot })
    }

    /// Append all elements of `iter`, one at a time.
    ///
    /// Stops with `CapacityExceeded` at the first element that does not fit. Everything before it
    /// stays appended.
    pub fn append(&mut self, iter: impl IntoIterator<Item = T>) -> Result<()> {
        for value in iter {
            self.push(value)?;
        }

        Ok(())
    }

    /// Append clones of `values`, as [`RingArray::append`].
    pub fn extend_from_slice(&mut self, values: &[T]) -> Result<()>
    where
        T: Clone,
    {
        for value in values {
            self.check_room(1)?;
            // Safety: just checked.
            unsafe { self.push_unchecked(value.clone()) };
        }

        Ok(())
    }

    /// Remove up to `n` elements from the front, returning how many were removed.
    pub fn erase(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        let front = ptr::slice_from_raw_parts_mut(self.head(), n);
        self.advance(n);

        if needs_drop::<T>() {
            // Safety: initialized, and no longer part of the window.
            unsafe { ptr::drop_in_place(front) };
        }

        n
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        // Safety: the head is initialized and leaves the window right after.
        let value = unsafe { self.head().read() };
        self.advance(1);
        Some(value)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        self.len -= 1;
        // Safety: was the last initialized element of the window.
        Some(unsafe { self.head().add(self.len).read() })
    }

    /// Drop elements from the back until at most `n` remain.
    pub fn truncate(&mut self, n: usize) {
        if n >= self.len {
            return;
        }

        // Safety: `n < len`, within the window.
        let tail = ptr::slice_from_raw_parts_mut(unsafe { self.head().add(n) }, self.len - n);
        self.len = n;
        // Safety: initialized, and no longer part of the window.
        unsafe { ptr::drop_in_place(tail) };
    }

    /// Grow with values from `f` or shrink from the back to exactly `n` elements.
    ///
    /// Resizing to zero also resets the logical start, as [`RingArray::clear`].
    pub fn resize_with(&mut self, n: usize, mut f: impl FnMut() -> T) -> Result<()> {
        if n > self.capacity {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity,
                requested: n,
            });
        }

        if n == 0 {
            self.clear();
        } else if n <= self.len {
            self.truncate(n);
        } else {
            while self.len < n {
                // Safety: `len < n <= capacity`.
                unsafe { self.push_unchecked(f()) };
            }
        }

        Ok(())
    }

    pub fn resize(&mut self, n: usize, fill: T) -> Result<()>
    where
        T: Clone,
    {
        self.resize_with(n, || fill.clone())
    }

    pub fn resize_default(&mut self, n: usize) -> Result<()>
    where
        T: Default,
    {
        self.resize_with(n, T::default)
    }

    /// Drop all elements and start over at the beginning of the memory.
    pub fn clear(&mut self) {
        self.truncate(0);
        self.pos = 0;
    }

    fn check_room(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity,
                requested: self.len + n,
            });
        }

        Ok(())
    }

    /// # Safety
    ///
    /// There must be room for one more element.
    unsafe fn push_unchecked(&mut self, value: T) -> *mut T {
        debug_assert!(self.len < self.capacity);
        let slot = self.head().add(self.len);
        slot.write(value);
        self.len += 1;
        slot
    }

    /// Move the logical start forward, the caller takes care of the elements.
    fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.pos = (self.pos + n) % self.period;
        self.len -= n;
    }
}

impl<T, B: Backend> Drop for RingArray<T, B> {
    fn drop(&mut self) {
        /// Returns the block even while an element destructor unwinds.
        struct Release<'a, T, B: Backend>(&'a mut RingArray<T, B>);

        impl<T, B: Backend> Drop for Release<'_, T, B> {
            fn drop(&mut self) {
                // Safety: not accessed again, the ring is going away.
                let block = unsafe { ManuallyDrop::take(&mut self.0.block) };
                self.0.allocator.deallocate(block);
            }
        }

        let mut release = Release(self);
        release.0.truncate(0);
    }
}

impl<T, B: Backend> Deref for RingArray<T, B> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, B: Backend> DerefMut for RingArray<T, B> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T, B: Backend> AsRef<[T]> for RingArray<T, B> {
    fn as_ref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, B: Backend> AsMut<[T]> for RingArray<T, B> {
    fn as_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<'a, T, B: Backend> IntoIterator for &'a RingArray<T, B> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<'a, T, B: Backend> IntoIterator for &'a mut RingArray<T, B> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_mut_slice().iter_mut()
    }
}

impl<T: fmt::Debug, B: Backend> fmt::Debug for RingArray<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_at_erase() {
        let mut ring = RingArray::<u64>::new(16).unwrap();
        assert!(ring.capacity() >= 16);
        assert!(ring.is_empty());

        ring.push(1).unwrap();
        ring.push(2).unwrap();
        *ring.emplace_with(|| 0).unwrap() = 3;

        assert_eq!(ring.as_slice(), [1, 2, 3]);
        assert_eq!(*ring.at(2).unwrap(), 3);
        assert!(matches!(ring.at(3), Err(Error::OutOfRange { index: 3, len: 3 })));

        assert_eq!(ring.erase(2), 2);
        assert_eq!(ring.as_slice(), [3]);
        assert_eq!(ring.erase(5), 1);
        assert!(ring.is_empty());
        assert_eq!(ring.pop_front(), None);
    }

    #[test]
    fn head_wraps_on_both_paths() {
        fn cycle<T: Copy + PartialEq + fmt::Debug>(make: impl Fn(usize) -> T) {
            let mut ring = RingArray::<T>::new(100).unwrap();
            let cap = ring.capacity();
            let mut next = 0;

            // Many times around the ring with a window that keeps straddling the end.
            for _ in 0..5 * cap / 7 {
                while !ring.is_full() {
                    ring.push(make(next)).unwrap();
                    next += 1;
                }

                ring.erase(7);
                assert!(ring.pos < ring.period);

                let first = next - ring.len();
                for (idx, value) in ring.iter().enumerate() {
                    assert_eq!(*value, make(first + idx));
                }
            }
        }

        cycle(|n| n as u64);
        cycle(|n| [n as u8; 3]);
        cycle(|n| [n as u32; 3]);
    }

    #[test]
    fn resize_and_truncate() {
        let mut ring = RingArray::<u16>::new(8).unwrap();
        let cap = ring.capacity();

        ring.resize(4, 9).unwrap();
        assert_eq!(ring.as_slice(), [9; 4]);
        ring.resize_default(6).unwrap();
        assert_eq!(ring.as_slice(), [9, 9, 9, 9, 0, 0]);
        ring.truncate(10);
        assert_eq!(ring.len(), 6);
        ring.truncate(1);
        assert_eq!(ring.as_slice(), [9]);

        assert!(matches!(
            ring.resize(cap + 1, 0),
            Err(Error::CapacityExceeded { requested, .. }) if requested == cap + 1
        ));
        assert_eq!(ring.len(), 1);

        ring.erase(1);
        ring.push(5).unwrap();
        ring.resize(0, 0).unwrap();
        assert_eq!(ring.pos, 0);
        assert!(ring.is_empty());
    }

    #[test]
    fn pop_both_ends() {
        let mut ring = RingArray::<String>::new(4).unwrap();
        ring.append(["a", "b", "c"].map(String::from)).unwrap();

        assert_eq!(ring.pop_back().as_deref(), Some("c"));
        assert_eq!(ring.pop_front().as_deref(), Some("a"));
        assert_eq!(ring.front().map(String::as_str), Some("b"));
        assert_eq!(ring.back().map(String::as_str), Some("b"));
        assert_eq!(format!("{ring:?}"), r#"["b"]"#);
    }
}

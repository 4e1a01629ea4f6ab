//! Which element types may live in a mirrored ring, and how they are addressed.
use core::marker::PhantomData;
use core::mem::{align_of, size_of};

/// Smallest page size of any supported platform. Mappings are aligned to at least this.
pub(crate) const MIN_PAGE: usize = 4096;

pub(crate) struct Wrap<T>(PhantomData<T>);

impl<T> Wrap<T> {
    /// The size divides a large power of two, i.e. is itself one.
    ///
    /// Then it also divides every page rounded byte size and elements tile the ring exactly, so
    /// plain element indexing modulo the capacity finds the same address as byte arithmetic.
    pub(crate) const FAST: bool =
        size_of::<T>() != 0 && (1u64 << 63) % (size_of::<T>() as u64) == 0;

    /// Evaluated when a ring of `T` is instantiated, fails the build for unsupported types.
    ///
    /// Any other size still works by modular byte arithmetic, as long as the element's offset
    /// stays aligned when it straddles the end of the first half.
    pub(crate) const ACCEPTED: () = {
        assert!(size_of::<T>() != 0, "zero-sized types can not be stored in a mirrored ring");
        assert!(
            Self::FAST || align_of::<T>() <= 1 << size_of::<T>().trailing_zeros(),
            "element type does not wrap safely on page edges"
        );
        assert!(
            align_of::<T>() <= MIN_PAGE,
            "element alignment exceeds the page alignment of mappings"
        );
    };
}

//! An infinite array: a fixed-capacity ring that is always one flat slice.
//!
//! [`RingArray`] keeps a window of elements that grows at the back and is evicted from the front.
//! Its memory is the same shared storage mapped twice in a row (see `mirror-map`), so a window
//! that runs over the end of the ring continues seamlessly into the mirror of its start. No
//! access ever has to split at the wrap-around, the window can be passed to anything that takes
//! a `&[T]`.
//!
//! The costly part happens once, on construction: shared storage is created, mapped twice and
//! the mirror is proven by writing to it. Afterwards appending, evicting and indexing are plain
//! pointer arithmetic.
//!
//! ## Errors
//!
//! Every fallible operation returns a [`Result`]. Callers that consider any failure fatal can use
//! [`OrAbort::or_abort`] at their boundary instead of unwrapping. A failed mirror proof is always
//! an error, a ring is never built on memory that has not been shown to alias.
//!
//! ## Configuration
//!
//! The storage provider and the directory for temporary-file storage are process-wide settings,
//! see [`set_backing`] and [`set_tmpdir`] or the `INFINIRAY_BACKING` and `INFINIRAY_TMPDIR`
//! environment variables.
//!
//! ## Not thread-safe
//!
//! A ring has no internal synchronization. It can be sent to another thread, shared references
//! only give read access to the window.
mod allocator;
mod array;
mod error;
mod layout;

pub use allocator::{Allocation, RingAllocator};
pub use array::RingArray;
pub use error::{Error, OrAbort, Result};

pub use mirror_fd::{set_backing, set_tmpdir, BackingKind};
pub use mirror_map::{AllocError, Backend, MirrorBackend, MirrorBlock};

//! Mirrored virtual memory.
//!
//! The same shared storage is mapped twice, back to back, so that an access running past the end
//! of the first mapping lands on the start of the storage again. A ring buffer built on top needs
//! no wrap-around handling: every window of at most the ring's length is one contiguous slice.
//!
//! Placement goes in three steps:
//! 1. reserve twice the (page rounded) size as private address space, so the span is known free,
//! 2. map the shared storage over the lower and the upper half of that reservation,
//! 3. prove by writing sentinels that the halves really alias, see [`validate_mirror`].
//!
//! The result is a [`MirrorBlock`], the single owner of the whole span. Kernels treat placement
//! hints as advisory and we never trust an unvalidated mirror; any failure releases everything
//! created so far and is reported as an error.
mod block;
mod mmap;
mod region;

pub use block::{AllocError, Backend, MirrorBackend, MirrorBlock};
pub use mmap::{pagesize, MapError, Mapper, VTable};
pub use region::{validate_mirror, MirroredRegion, RawMapping};

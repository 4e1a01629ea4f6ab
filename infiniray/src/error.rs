use mirror_fd::BackingError;
use mirror_map::{AllocError, MapError};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Everything that can go wrong with a ring.
///
/// `Allocation` and `Mapping` only occur on construction and leave nothing behind. `OutOfRange`
/// and `CapacityExceeded` are reported by a single call and the ring stays usable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The shared storage could not be created or sized.
    #[error("failed to allocate ring storage: {0}")]
    Allocation(#[source] BackingError),
    /// The storage could not be mapped twice, or the two mappings are not mirrors.
    #[error("failed to map ring storage: {0}")]
    Mapping(#[source] MapError),
    #[error("index {index} is out of range for a ring of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("ring capacity {capacity} exceeded, {requested} elements requested")]
    CapacityExceeded { capacity: usize, requested: usize },
}

impl From<AllocError> for Error {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::Backing(err) => Error::Allocation(err),
            AllocError::Map(err) => Error::Mapping(err),
        }
    }
}

impl From<MapError> for Error {
    fn from(err: MapError) -> Self {
        Error::Mapping(err)
    }
}

impl From<BackingError> for Error {
    fn from(err: BackingError) -> Self {
        Error::Allocation(err)
    }
}

/// The fail-fast policy: turn any ring error into a process abort.
///
/// ```no_run
/// use infiniray::{OrAbort, RingArray};
///
/// let mut ring = RingArray::<u64>::new(4096).or_abort();
/// ring.push(1).or_abort();
/// ```
pub trait OrAbort<T> {
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T> {
    #[track_caller]
    fn or_abort(self) -> T {
        match self {
            Ok(val) => val,
            Err(err) => {
                let location = core::panic::Location::caller();
                tracing::error!(%err, %location, "unrecoverable ring failure, aborting");
                std::process::abort()
            }
        }
    }
}

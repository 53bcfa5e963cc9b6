//! Error types and programming-error reporting.

use thiserror::Error;

/// The allocator could not provide memory for a new object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("memory allocation of {size} bytes failed")]
pub struct AllocError {
    pub size: usize,
}

/// Failure to lock a managed object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum LockError {
    /// The object was allocated with `LockClass::None`.
    #[error("object was allocated without a lock")]
    NoLock,
}

/// A container refused to link an object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum LinkError {
    /// The duplicate policy rejected the object.
    #[error("container already holds a matching object")]
    Duplicate,
}

/// Structural inconsistency found by `Container::check`.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum IntegrityError {
    #[error("object in bucket {found} hashes to bucket {expected}")]
    WrongBucket { found: usize, expected: usize },
    #[error("bucket {bucket} is out of link order at position {position}")]
    OutOfOrder { bucket: usize, position: usize },
    #[error("container counts {counted} objects but buckets hold {actual}")]
    CountMismatch { counted: usize, actual: usize },
}

/// Report misuse of the object model.
///
/// Fatal in diagnostic builds. Release builds log the violation and the
/// caller declines to perform the operation.
macro_rules! misuse {
    ($($arg:tt)+) => {{
        if $crate::stats::ENABLED {
            panic!($($arg)+);
        } else {
            tracing::error!($($arg)+);
        }
    }};
}

pub(crate) use misuse;

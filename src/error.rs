//! Error types for slabkit.

use thiserror::Error;

/// Result type alias using slabkit's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pool and allocator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A construction parameter or request violated a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The raw allocator could not satisfy a request.
    #[error("memory allocation failed: {size} bytes aligned to {align}")]
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// Size arithmetic overflowed while computing a slab or buffer layout.
    #[error("layout overflow: {0}")]
    LayoutOverflow(String),

    /// A returned address does not belong to the pool or is not on an element boundary.
    #[error("returned address {addr:#x} does not belong to this pool")]
    ReturnMismatch {
        /// The offending address.
        addr: usize,
    },

    /// An element was returned while it was not rented.
    #[error("element {index} returned twice")]
    DuplicateReturn {
        /// Index of the element within the pool buffer.
        index: usize,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`].
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AllocationFailed {
            size: 4096,
            align: 64,
        };
        assert_eq!(
            err.to_string(),
            "memory allocation failed: 4096 bytes aligned to 64"
        );

        let err = Error::ReturnMismatch { addr: 0x10 };
        assert_eq!(
            err.to_string(),
            "returned address 0x10 does not belong to this pool"
        );

        assert_eq!(
            Error::invalid("size must be > 0").to_string(),
            "invalid argument: size must be > 0"
        );
    }
}

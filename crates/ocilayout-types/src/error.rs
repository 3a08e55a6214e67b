use std::fmt;

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid digest {digest:?}: {reason}")]
    InvalidDigest { digest: String, reason: String },

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Coarse classification of a failure, stable across every crate in the
/// workspace so callers can branch without matching concrete error enums.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Digest absent from the store, or descriptor absent from the index.
    NotFound,
    /// More than one index entry matched a single-result query.
    Ambiguous,
    /// The mutation would violate index uniqueness.
    Conflict,
    /// Persistence or filesystem failure, including detected corruption.
    Io,
    /// The caller aborted the operation.
    Cancelled,
    /// Malformed input such as an unparsable digest.
    Invalid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::Ambiguous => "ambiguous",
            Self::Conflict => "conflict",
            Self::Io => "i/o failure",
            Self::Cancelled => "cancelled",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

impl TypeError {
    /// Every type error is a malformed-input error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Invalid
    }
}

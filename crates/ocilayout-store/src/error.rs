use ocilayout_types::{Digest, ErrorKind, TypeError};

/// Errors from content store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No blob is stored under the digest.
    #[error("blob not found: {0}")]
    NotFound(Digest),

    /// Ingested content hashed to a different digest than declared.
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: Digest, computed: Digest },

    /// Ingested or stored content has a different length than declared.
    #[error("size mismatch for {digest}: expected {expected}, got {actual}")]
    SizeMismatch {
        digest: Digest,
        expected: u64,
        actual: u64,
    },

    /// A stored blob no longer hashes to its digest.
    #[error("corrupt blob {digest}: {reason}")]
    Corrupt { digest: Digest, reason: String },

    /// Malformed digest or unsupported algorithm.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Type(_) => ErrorKind::Invalid,
            Self::DigestMismatch { .. }
            | Self::SizeMismatch { .. }
            | Self::Corrupt { .. }
            | Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

//! Error types for the index crate.

use std::path::PathBuf;

use ocilayout_types::{Digest, ErrorKind};

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No entry matched the matcher.
    #[error("no index entry matches {0}")]
    NotFound(String),

    /// More than one entry matched where exactly one was required.
    #[error("{count} index entries match {matcher}")]
    Ambiguous { matcher: String, count: usize },

    /// An entry with this digest is already indexed.
    #[error("descriptor already indexed: {0}")]
    AlreadyExists(Digest),

    /// A replacement would leave two entries with the same digest.
    #[error("replacement {0} collides with an entry that is not being replaced")]
    Conflict(Digest),

    /// The index document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No index has been stored at this location.
    #[error("no index at {}", .0.display())]
    Missing(PathBuf),

    /// The persisted index exists but is not a valid image index.
    #[error("corrupt index at {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// I/O error from the persistence backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::Missing(_) => ErrorKind::NotFound,
            Self::Ambiguous { .. } => ErrorKind::Ambiguous,
            Self::AlreadyExists(_) | Self::Conflict(_) => ErrorKind::Conflict,
            Self::Serialization(_) => ErrorKind::Invalid,
            Self::Corrupt { .. } | Self::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;

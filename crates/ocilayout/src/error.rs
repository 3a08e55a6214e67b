use std::path::PathBuf;

use ocilayout_index::IndexError;
use ocilayout_store::StoreError;
use ocilayout_types::{Digest, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// A constituent blob of an image could not be ingested.
    #[error("writing blob {digest}: {source}")]
    WriteBlob {
        digest: Digest,
        #[source]
        source: StoreError,
    },

    /// Blobs were stored but the index mutation failed.
    #[error("{op} {digest} in index: {source}")]
    Register {
        op: &'static str,
        digest: Digest,
        #[source]
        source: IndexError,
    },

    /// The source of an image could not provide one of its blobs.
    #[error("opening source blob {digest}: {source}")]
    SourceBlob {
        digest: Digest,
        #[source]
        source: Box<LayoutError>,
    },

    /// Selecting an image from the index failed.
    #[error("looking up {matcher} in index: {source}")]
    Lookup {
        matcher: String,
        #[source]
        source: IndexError,
    },

    /// Removing entries from the index failed.
    #[error("removing {matcher} from index: {source}")]
    Unregister {
        matcher: String,
        #[source]
        source: IndexError,
    },

    /// A stored blob could not be opened.
    #[error("reading blob {digest}: {source}")]
    ReadBlob {
        digest: Digest,
        #[source]
        source: StoreError,
    },

    /// The directory is not an initialized image layout.
    #[error("{} is not an image layout: {missing} is missing", path.display())]
    NotLayout { path: PathBuf, missing: &'static str },

    /// The `oci-layout` marker is unreadable or names another version.
    #[error("bad layout marker at {}: {reason}", path.display())]
    Marker { path: PathBuf, reason: String },

    /// A stored manifest or index could not be parsed for references.
    #[error("malformed manifest {digest}: {reason}")]
    Manifest { digest: Digest, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LayoutError {
    /// Coarse classification, preserved through the context variants.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) | Self::WriteBlob { source: e, .. } | Self::ReadBlob { source: e, .. } => {
                e.kind()
            }
            Self::Index(e)
            | Self::Register { source: e, .. }
            | Self::Lookup { source: e, .. }
            | Self::Unregister { source: e, .. } => e.kind(),
            Self::SourceBlob { source, .. } => source.kind(),
            Self::NotLayout { .. } => ErrorKind::NotFound,
            Self::Manifest { .. } | Self::Marker { .. } | Self::Config(_) => ErrorKind::Invalid,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

pub type LayoutResult<T> = Result<T, LayoutError>;

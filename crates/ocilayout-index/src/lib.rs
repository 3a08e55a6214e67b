//! Top-level image index of an OCI image layout.
//!
//! The index is the ordered list of descriptors naming the images held by a
//! layout, persisted as `index.json`. It knows nothing about blobs: keeping
//! every indexed descriptor backed by stored content is the job of the layer
//! above.
//!
//! # Key Types
//!
//! - [`Indexer`] -- Index with add/replace/find/list, serialized across handles by [`IndexLock`]
//! - [`DescriptorMatcher`] -- Composable predicate selecting index entries
//! - [`IndexDocument`] -- The `index.json` wire shape
//! - [`IndexBackend`] -- Persistence seam ([`FileBackend`], [`MemoryBackend`])

pub mod backend;
pub mod document;
pub mod error;
pub mod indexer;
pub mod matcher;

pub use backend::{FileBackend, IndexBackend, IndexLock, MemoryBackend};
pub use document::IndexDocument;
pub use error::{IndexError, IndexResult};
pub use indexer::{Indexer, INDEX_FILE};
pub use matcher::DescriptorMatcher;

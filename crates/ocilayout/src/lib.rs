//! OCI image layouts.
//!
//! A [`Layout`] is a directory holding a content-addressed blob store, an
//! `index.json` naming the images it contains, and the `oci-layout` marker.
//! This crate is the entry point for applications: it orchestrates the store
//! and the index so that every indexed descriptor is backed by stored content.
//!
//! ```text
//! <root>/
//! ├── oci-layout
//! ├── index.json
//! └── blobs/<alg>/<hex>
//! ```

pub mod config;
pub mod error;
pub mod image;
pub mod layout;

pub use config::LayoutConfig;
pub use error::{LayoutError, LayoutResult};
pub use image::{write_image, BlobImage, Image, StoreImage};
pub use layout::{FsckReport, Layout, LAYOUT_FILE, LAYOUT_VERSION};

// Re-export key types
pub use ocilayout_index::{DescriptorMatcher, IndexBackend, Indexer};
pub use ocilayout_store::{BlobReader, ContentStore, LocalStore};
pub use ocilayout_types::{media_type, Algorithm, Descriptor, Digest, ErrorKind};
pub use tokio_util::sync::CancellationToken;

//! Content-addressed blob storage for OCI image layouts.
//!
//! Every blob is an immutable byte sequence identified by the digest of its
//! content, stored under `blobs/<algorithm>/<hex>` of a layout directory.
//!
//! # Storage Backends
//!
//! All backends implement the [`ContentStore`] trait:
//!
//! - [`LocalStore`] -- filesystem store rooted at a layout directory
//! - [`InMemoryStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written (content-addressing guarantees this).
//! 2. Write-then-publish: content lands in a temporary file and is renamed
//!    under its digest only after it has been fully written and hashed.
//! 3. Writing an existing digest is a no-op, and racing writers of the same
//!    digest both succeed.
//! 4. Reads re-verify content against the digest; corrupt bytes are never
//!    returned as a clean stream.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod local;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use local::LocalStore;
pub use memory::InMemoryStore;
pub use traits::{BlobReader, ContentStore};

//! Content hashing for OCI image layouts.
//!
//! Provides streaming digest computation for every [`Algorithm`] the layout
//! accepts, plus reader adapters that hash while bytes flow through them.
//!
//! All hashing wraps established libraries (`sha2`, `blake3`); there is no custom
//! cryptography.
//!
//! [`Algorithm`]: ocilayout_types::Algorithm

pub mod hasher;
pub mod reader;

pub use hasher::{digest_bytes, Digester};
pub use reader::{DigestingReader, VerifyingReader};

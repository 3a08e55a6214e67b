//! Foundation types for OCI image layouts.
//!
//! This crate provides the identity and descriptor types shared by every other
//! `ocilayout` crate. It performs no I/O and no hashing.
//!
//! # Key Types
//!
//! - [`Digest`] -- Algorithm-tagged content identifier (`sha256:<hex>`)
//! - [`Algorithm`] -- Supported digest algorithms
//! - [`Descriptor`] -- OCI content descriptor (media type, digest, size, annotations)
//! - [`Platform`] -- Optional platform block of a descriptor
//! - [`ErrorKind`] -- Coarse error classification shared by all crates

pub mod descriptor;
pub mod digest;
pub mod error;
pub mod media_type;

pub use descriptor::{Descriptor, Platform, ANNOTATION_REF_NAME};
pub use digest::{Algorithm, Digest};
pub use error::{ErrorKind, TypeError};

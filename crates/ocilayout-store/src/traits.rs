use std::io::{self, Read};

use ocilayout_types::{Descriptor, Digest};

use crate::error::{StoreError, StoreResult};

/// Readable blob content returned by [`ContentStore::open`].
pub type BlobReader = Box<dyn Read + Send>;

/// Content-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - The digest under which a blob is exposed always equals the hash of its
///   bytes. Readers returned by [`open`](Self::open) fail rather than end
///   cleanly if stored bytes no longer match.
/// - Writes are idempotent: writing content that is already stored returns
///   the same descriptor and does not duplicate storage.
/// - A failed write leaves nothing reachable under the target digest.
///
/// Every store is an ingester: image writers only need this trait.
pub trait ContentStore: Send + Sync {
    /// Ingest a stream of unknown digest. The store hashes the content with
    /// its configured algorithm and returns the resulting descriptor.
    fn write(&self, media_type: &str, content: &mut dyn Read) -> StoreResult<Descriptor>;

    /// Ingest a stream whose descriptor is already known.
    ///
    /// If the digest is already present the stream is not read at all.
    /// Otherwise the computed digest and size must match `expected`, or the
    /// write fails and nothing is published.
    fn write_verified(&self, expected: &Descriptor, content: &mut dyn Read)
        -> StoreResult<Descriptor>;

    /// Open a blob for reading. Fails with [`StoreError::NotFound`] if absent.
    fn open(&self, digest: &Digest) -> StoreResult<BlobReader>;

    /// Check whether a blob exists without reading it.
    fn exists(&self, digest: &Digest) -> StoreResult<bool>;

    /// Size in bytes of a stored blob.
    fn size(&self, digest: &Digest) -> StoreResult<u64>;

    /// Ingest an in-memory buffer.
    fn write_bytes(&self, media_type: &str, data: &[u8]) -> StoreResult<Descriptor> {
        let mut cursor = io::Cursor::new(data);
        self.write(media_type, &mut cursor)
    }

    /// Read a whole blob into memory, verifying it against its digest.
    fn read_all(&self, digest: &Digest) -> StoreResult<Vec<u8>> {
        let mut reader = self.open(digest)?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| corruption(digest, e))?;
        Ok(data)
    }

    /// Re-hash a stored blob and report whether it still matches its digest.
    fn verify(&self, digest: &Digest) -> StoreResult<()> {
        let mut reader = self.open(digest)?;
        io::copy(&mut reader, &mut io::sink()).map_err(|e| corruption(digest, e))?;
        Ok(())
    }
}

/// Map a read failure to [`StoreError::Corrupt`] when it came from digest
/// verification, and to [`StoreError::Io`] otherwise.
pub(crate) fn corruption(digest: &Digest, err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::InvalidData {
        StoreError::Corrupt {
            digest: digest.clone(),
            reason: err.to_string(),
        }
    } else {
        StoreError::Io(err)
    }
}

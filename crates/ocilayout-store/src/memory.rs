use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::{Arc, RwLock};

use ocilayout_crypto::{DigestingReader, Digester, VerifyingReader};
use ocilayout_types::{Algorithm, Descriptor, Digest};

use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobReader, ContentStore};

/// In-memory, HashMap-based content store.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock`;
/// content is shared with readers through `Arc` so opening a blob does not
/// copy it.
pub struct InMemoryStore {
    blobs: RwLock<HashMap<Digest, Arc<Vec<u8>>>>,
    algorithm: Algorithm,
}

impl InMemoryStore {
    /// Create a new empty store writing `sha256` digests.
    pub fn new() -> Self {
        Self::with_algorithm(Algorithm::default())
    }

    /// Create a new empty store writing digests of the given algorithm.
    pub fn with_algorithm(algorithm: Algorithm) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            algorithm,
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.read_map().values().map(|b| b.len() as u64).sum()
    }

    /// Return a sorted list of all digests in the store.
    pub fn digests(&self) -> Vec<Digest> {
        let mut digests: Vec<Digest> = self.read_map().keys().cloned().collect();
        digests.sort();
        digests
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Digest, Arc<Vec<u8>>>> {
        // Values are immutable once inserted, so a poisoned map is still consistent.
        self.blobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, digest: Digest, data: Vec<u8>) {
        let mut map = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        map.entry(digest).or_insert_with(|| Arc::new(data));
    }

    fn ingest(&self, algorithm: Algorithm, content: &mut dyn Read) -> StoreResult<(Digest, Vec<u8>)> {
        let mut reader = DigestingReader::new(content, Digester::new(algorithm));
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let (digest, _) = reader.finish();
        Ok((digest, data))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryStore {
    fn write(&self, media_type: &str, content: &mut dyn Read) -> StoreResult<Descriptor> {
        let (digest, data) = self.ingest(self.algorithm, content)?;
        let size = data.len() as u64;
        self.insert(digest.clone(), data);
        Ok(Descriptor::new(media_type, digest, size))
    }

    fn write_verified(
        &self,
        expected: &Descriptor,
        content: &mut dyn Read,
    ) -> StoreResult<Descriptor> {
        if self.exists(&expected.digest)? {
            let actual = self.size(&expected.digest)?;
            if actual != expected.size {
                return Err(StoreError::SizeMismatch {
                    digest: expected.digest.clone(),
                    expected: expected.size,
                    actual,
                });
            }
            return Ok(expected.clone());
        }
        let (digest, data) = self.ingest(expected.digest.algorithm(), content)?;
        if data.len() as u64 != expected.size {
            return Err(StoreError::SizeMismatch {
                digest: expected.digest.clone(),
                expected: expected.size,
                actual: data.len() as u64,
            });
        }
        if digest != expected.digest {
            return Err(StoreError::DigestMismatch {
                expected: expected.digest.clone(),
                computed: digest,
            });
        }
        self.insert(digest, data);
        Ok(expected.clone())
    }

    fn open(&self, digest: &Digest) -> StoreResult<BlobReader> {
        let data = self
            .read_map()
            .get(digest)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(digest.clone()))?;
        Ok(Box::new(VerifyingReader::new(
            io::Cursor::new(SharedBytes(data)),
            digest.clone(),
        )))
    }

    fn exists(&self, digest: &Digest) -> StoreResult<bool> {
        Ok(self.read_map().contains_key(digest))
    }

    fn size(&self, digest: &Digest) -> StoreResult<u64> {
        self.read_map()
            .get(digest)
            .map(|b| b.len() as u64)
            .ok_or_else(|| StoreError::NotFound(digest.clone()))
    }
}

/// `AsRef<[u8]>` view over shared blob bytes, so a cursor can read them.
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("blob_count", &self.len())
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

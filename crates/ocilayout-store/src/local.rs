use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ocilayout_crypto::{DigestingReader, Digester, VerifyingReader};
use ocilayout_types::{Algorithm, Descriptor, Digest};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobReader, ContentStore};

/// Name of the blob directory inside a layout.
pub const BLOBS_DIR: &str = "blobs";

/// Prefix of in-flight ingest files. Never a valid hex digest.
const INGEST_PREFIX: &str = ".ingest-";

/// Ingest files untouched for this long are reported as crash leftovers.
const STALE_INGEST_AGE: Duration = Duration::from_secs(60 * 60);

/// Filesystem content store rooted at a layout directory.
///
/// Blobs live at `<root>/blobs/<algorithm>/<hex>`. Ingest streams into a
/// temporary file inside the target algorithm directory (same filesystem) and
/// is published with a no-clobber rename once the digest is known, so a
/// partially written blob is never visible under a digest.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    blobs: PathBuf,
    algorithm: Algorithm,
    sync: bool,
}

impl LocalStore {
    /// Open (or create) a store under `root` with `sha256` and fsync enabled.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_options(root, Algorithm::default(), true)
    }

    /// Open (or create) a store with an explicit write algorithm and sync
    /// policy. With `sync` off, blobs are published without `fsync`.
    pub fn with_options(root: impl AsRef<Path>, algorithm: Algorithm, sync: bool) -> StoreResult<Self> {
        let store = Self::attach(root, algorithm, sync);
        fs::create_dir_all(store.blobs.join(algorithm.as_str()))?;
        Ok(store)
    }

    /// A store over `root` that creates nothing until the first write.
    pub fn attach(root: impl AsRef<Path>, algorithm: Algorithm, sync: bool) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            blobs: root.join(BLOBS_DIR),
            root,
            algorithm,
            sync,
        }
    }

    /// The layout directory this store lives in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The algorithm used by [`ContentStore::write`].
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Path at which the blob for `digest` is (or would be) stored.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        let (alg, hex) = digest.path_components();
        self.blobs.join(alg).join(hex)
    }

    /// Enumerate every published blob, sorted by digest.
    ///
    /// In-flight ingest files and entries that do not parse as digests are
    /// skipped. A store with no blob directory yet is empty.
    pub fn digests(&self) -> StoreResult<Vec<Digest>> {
        let mut digests = Vec::new();
        if !self.blobs.is_dir() {
            return Ok(digests);
        }
        for entry in WalkDir::new(&self.blobs).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop in blob store"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with(INGEST_PREFIX) {
                if is_stale(entry.path()) {
                    warn!(path = %entry.path().display(), "skipping stale ingest file");
                }
                continue;
            }
            if name.starts_with('.') {
                continue;
            }
            let alg = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match format!("{alg}:{name}").parse::<Digest>() {
                Ok(digest) => digests.push(digest),
                Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping foreign file in blob store"),
            }
        }
        digests.sort();
        Ok(digests)
    }

    fn ingest_file(&self, algorithm: Algorithm) -> StoreResult<NamedTempFile> {
        let dir = self.blobs.join(algorithm.as_str());
        fs::create_dir_all(&dir)?;
        let file = tempfile::Builder::new()
            .prefix(INGEST_PREFIX)
            .tempfile_in(&dir)?;
        Ok(file)
    }

    /// Move a fully written temporary file under its digest.
    fn publish(&self, mut tmp: NamedTempFile, digest: &Digest) -> StoreResult<()> {
        if self.sync {
            tmp.as_file_mut().sync_all()?;
        }
        let target = self.blob_path(digest);
        match tmp.persist_noclobber(&target) {
            Ok(_) => {
                if self.sync {
                    if let Some(parent) = target.parent() {
                        fsync_dir(parent)?;
                    }
                }
                debug!(digest = %digest, "published blob");
                Ok(())
            }
            // Another writer published identical content first.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                warn!(digest = %digest, "lost publish race; discarding duplicate ingest");
                Ok(())
            }
            Err(e) => Err(StoreError::Io(e.error)),
        }
    }
}

impl ContentStore for LocalStore {
    fn write(&self, media_type: &str, content: &mut dyn Read) -> StoreResult<Descriptor> {
        let mut tmp = self.ingest_file(self.algorithm)?;
        let mut reader = DigestingReader::new(content, Digester::new(self.algorithm));
        io::copy(&mut reader, &mut tmp)?;
        let (digest, size) = reader.finish();

        if self.exists(&digest)? {
            debug!(digest = %digest, "blob already present");
        } else {
            self.publish(tmp, &digest)?;
        }
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
            debug!(digest = %expected.digest, "blob already present; skipping ingest");
            return Ok(expected.clone());
        }

        let algorithm = expected.digest.algorithm();
        let mut tmp = self.ingest_file(algorithm)?;
        let mut reader = DigestingReader::new(content, Digester::new(algorithm));
        io::copy(&mut reader, &mut tmp)?;
        let (digest, size) = reader.finish();

        if size != expected.size {
            return Err(StoreError::SizeMismatch {
                digest: expected.digest.clone(),
                expected: expected.size,
                actual: size,
            });
        }
        if digest != expected.digest {
            return Err(StoreError::DigestMismatch {
                expected: expected.digest.clone(),
                computed: digest,
            });
        }

        self.publish(tmp, &digest)?;
        Ok(expected.clone())
    }

    fn open(&self, digest: &Digest) -> StoreResult<BlobReader> {
        let file = File::open(self.blob_path(digest)).map_err(|e| not_found_or(digest, e))?;
        Ok(Box::new(VerifyingReader::new(
            BufReader::new(file),
            digest.clone(),
        )))
    }

    fn exists(&self, digest: &Digest) -> StoreResult<bool> {
        match fs::metadata(self.blob_path(digest)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn size(&self, digest: &Digest) -> StoreResult<u64> {
        let meta = fs::metadata(self.blob_path(digest)).map_err(|e| not_found_or(digest, e))?;
        Ok(meta.len())
    }
}

fn not_found_or(digest: &Digest, err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(digest.clone())
    } else {
        StoreError::Io(err)
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age >= STALE_INGEST_AGE)
}

/// Flush a directory entry update (rename) to disk.
pub(crate) fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

//! Persistence backends for the index document.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs4::FileExt;
use tracing::debug;

use crate::document::IndexDocument;
use crate::error::{IndexError, IndexResult};

/// Prefix of in-flight index rewrites, next to `index.json`.
const TEMP_PREFIX: &str = ".index-";

/// Sidecar file locked for the duration of every index rewrite.
pub const LOCK_FILE: &str = ".index.lock";

/// Exclusive hold on a stored index. Released on drop.
#[derive(Debug)]
pub struct IndexLock {
    _file: Option<File>,
}

impl IndexLock {
    /// A guard that holds nothing, for backends with no outside writers.
    pub fn unshared() -> Self {
        Self { _file: None }
    }
}

/// Storage for the index document.
///
/// `store` must be all-or-nothing: after an error, a subsequent `load`
/// returns the previously stored document.
pub trait IndexBackend: Send + Sync {
    /// Read the current document. `Ok(None)` if nothing was stored yet.
    fn load(&self) -> IndexResult<Option<IndexDocument>>;

    /// Durably replace the current document.
    fn store(&self, doc: &IndexDocument) -> IndexResult<()>;

    /// Block until no other handle, in this process or another, is between
    /// `load` and `store` on the same document.
    fn lock(&self) -> IndexResult<IndexLock> {
        Ok(IndexLock::unshared())
    }
}

/// `index.json` on the local filesystem.
///
/// Rewrites go to a temporary file in the same directory, are flushed, and
/// then renamed over the previous file, so readers and crashes observe either
/// the old or the new document.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    sync: bool,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_sync(path, true)
    }

    /// With `sync` off, rewrites are renamed into place without `fsync`.
    pub fn with_sync(path: impl Into<PathBuf>, sync: bool) -> Self {
        Self {
            path: path.into(),
            sync,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the advisory lock guarding rewrites of this index.
    pub fn lock_path(&self) -> PathBuf {
        self.dir().join(LOCK_FILE)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

impl IndexBackend for FileBackend {
    fn load(&self) -> IndexResult<Option<IndexDocument>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc: IndexDocument =
            serde_json::from_slice(&bytes).map_err(|e| IndexError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(doc))
    }

    fn store(&self, doc: &IndexDocument) -> IndexResult<()> {
        let bytes = serde_json::to_vec(doc)?;
        let dir = self.dir();
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)?;
        tmp.write_all(&bytes)?;
        if self.sync {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(&self.path).map_err(|e| IndexError::Io(e.error))?;
        if self.sync {
            File::open(dir)?.sync_all()?;
        }
        debug!(
            path = %self.path.display(),
            entries = doc.manifests.len(),
            "persisted index"
        );
        Ok(())
    }

    fn lock(&self) -> IndexResult<IndexLock> {
        fs::create_dir_all(self.dir())?;
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(IndexLock { _file: Some(file) })
    }
}

/// Index document held in memory. For tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    doc: RwLock<Option<IndexDocument>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexBackend for MemoryBackend {
    fn load(&self) -> IndexResult<Option<IndexDocument>> {
        Ok(self.doc.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn store(&self, doc: &IndexDocument) -> IndexResult<()> {
        *self.doc.write().unwrap_or_else(|e| e.into_inner()) = Some(doc.clone());
        Ok(())
    }
}

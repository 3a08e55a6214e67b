use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ocilayout_index::{
    DescriptorMatcher, FileBackend, IndexBackend, IndexError, Indexer, INDEX_FILE,
};
use ocilayout_store::{BlobReader, ContentStore, LocalStore, StoreError};
use ocilayout_types::{Descriptor, Digest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LayoutConfig;
use crate::error::{LayoutError, LayoutResult};
use crate::image::{write_image, Image, StoreImage};

/// Name of the layout marker file.
pub const LAYOUT_FILE: &str = "oci-layout";

/// Version written to the layout marker.
pub const LAYOUT_VERSION: &str = "1.0.0";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutMarker {
    image_layout_version: String,
}

/// An OCI image layout on disk.
///
/// Owns one blob store and one index. Image writes always store every blob
/// before touching the index, so a failed or cancelled add leaves at most
/// unreferenced blobs behind and never an index entry without content.
///
/// `Layout` is `Send + Sync`; share it through `Arc` and call it from
/// blocking contexts (`tokio::task::spawn_blocking` in async code).
pub struct Layout {
    root: PathBuf,
    store: Arc<LocalStore>,
    indexer: Indexer,
}

impl std::fmt::Debug for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("root", &self.root)
            .field("images", &self.indexer.len())
            .finish()
    }
}

impl Layout {
    /// Open or initialize a layout at `path` with default settings.
    ///
    /// Existing blobs and index entries are kept; the marker is rewritten.
    /// Fails if the directory cannot be written or the existing index is
    /// corrupt. Use [`open`](Self::open) to refuse anything but an existing
    /// layout.
    pub fn new(path: impl AsRef<Path>) -> LayoutResult<Self> {
        Self::with_config(path, LayoutConfig::default())
    }

    /// Open or initialize a layout at `path`.
    pub fn with_config(path: impl AsRef<Path>, config: LayoutConfig) -> LayoutResult<Self> {
        let backend = FileBackend::with_sync(path.as_ref().join(INDEX_FILE), config.sync);
        Self::with_backend(path, config, Box::new(backend))
    }

    /// Open or initialize a layout whose index is persisted by `backend`.
    pub fn with_backend(
        path: impl AsRef<Path>,
        config: LayoutConfig,
        backend: Box<dyn IndexBackend>,
    ) -> LayoutResult<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let store = LocalStore::with_options(&root, config.algorithm, config.sync)?;
        let indexer = Indexer::with_backend(backend)?;
        write_marker(&root, config.sync)?;
        info!(
            root = %root.display(),
            images = indexer.len(),
            algorithm = %config.algorithm,
            "opened layout"
        );
        Ok(Self {
            root,
            store: Arc::new(store),
            indexer,
        })
    }

    /// Open an existing layout at `path` with default settings.
    ///
    /// Fails with [`LayoutError::NotLayout`] when the marker or the index is
    /// missing. Nothing is created or rewritten.
    pub fn open(path: impl AsRef<Path>) -> LayoutResult<Self> {
        Self::open_with_config(path, LayoutConfig::default())
    }

    /// Open an existing layout at `path`.
    pub fn open_with_config(path: impl AsRef<Path>, config: LayoutConfig) -> LayoutResult<Self> {
        let root = path.as_ref().to_path_buf();
        read_marker(&root)?;
        let backend = FileBackend::with_sync(root.join(INDEX_FILE), config.sync);
        let indexer = Indexer::open_existing(backend).map_err(|e| match e {
            IndexError::Missing(_) => LayoutError::NotLayout {
                path: root.clone(),
                missing: INDEX_FILE,
            },
            other => other.into(),
        })?;
        let store = LocalStore::attach(&root, config.algorithm, config.sync);
        debug!(root = %root.display(), "opened existing layout");
        Ok(Self {
            root,
            store: Arc::new(store),
            indexer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The blob store of this layout.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// The index of this layout.
    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    // ---- Image operations ----

    /// Store every blob of `image`, then append its descriptor to the index.
    pub fn add_image(&self, image: &dyn Image) -> LayoutResult<Descriptor> {
        self.add_image_with(image, &CancellationToken::new())
    }

    /// [`add_image`](Self::add_image) with caller-driven cancellation.
    pub fn add_image_with(
        &self,
        image: &dyn Image,
        cancel: &CancellationToken,
    ) -> LayoutResult<Descriptor> {
        let desc = write_image(self.store.as_ref(), image, cancel)?;
        if cancel.is_cancelled() {
            return Err(LayoutError::Cancelled);
        }
        self.indexer
            .add(desc.clone())
            .map_err(|source| LayoutError::Register {
                op: "add",
                digest: desc.digest.clone(),
                source,
            })?;
        debug!(digest = %desc.digest, "added image");
        Ok(desc)
    }

    /// Store every blob of `image`, then atomically swap it in for the index
    /// entries selected by `matcher`.
    pub fn replace_image(
        &self,
        image: &dyn Image,
        matcher: &DescriptorMatcher,
    ) -> LayoutResult<Descriptor> {
        self.replace_image_with(image, matcher, &CancellationToken::new())
    }

    /// [`replace_image`](Self::replace_image) with caller-driven cancellation.
    pub fn replace_image_with(
        &self,
        image: &dyn Image,
        matcher: &DescriptorMatcher,
        cancel: &CancellationToken,
    ) -> LayoutResult<Descriptor> {
        let desc = write_image(self.store.as_ref(), image, cancel)?;
        if cancel.is_cancelled() {
            return Err(LayoutError::Cancelled);
        }
        self.indexer
            .replace(desc.clone(), matcher)
            .map_err(|source| LayoutError::Register {
                op: "replace",
                digest: desc.digest.clone(),
                source,
            })?;
        debug!(digest = %desc.digest, matcher = %matcher, "replaced image");
        Ok(desc)
    }

    /// The indexed image identified by `desc` (digest, size and media type).
    pub fn image(&self, desc: &Descriptor) -> LayoutResult<StoreImage> {
        self.find_image(&DescriptorMatcher::equal(desc))
    }

    /// The single indexed image selected by `matcher`.
    pub fn find_image(&self, matcher: &DescriptorMatcher) -> LayoutResult<StoreImage> {
        let found = self
            .indexer
            .find(matcher)
            .map_err(|source| LayoutError::Lookup {
                matcher: matcher.to_string(),
                source,
            })?;
        Ok(self.view(found))
    }

    /// Every indexed image, in index order.
    pub fn images(&self) -> Vec<StoreImage> {
        self.indexer
            .list(&DescriptorMatcher::Every)
            .into_iter()
            .map(|d| self.view(d))
            .collect()
    }

    /// Drop the index entries selected by `matcher`. Their blobs stay in the
    /// store.
    pub fn remove_image(&self, matcher: &DescriptorMatcher) -> LayoutResult<Vec<Descriptor>> {
        self.indexer
            .remove(matcher)
            .map_err(|source| LayoutError::Unregister {
                matcher: matcher.to_string(),
                source,
            })
    }

    /// Open any stored blob.
    pub fn blob(&self, digest: &Digest) -> LayoutResult<BlobReader> {
        self.store.open(digest).map_err(|source| LayoutError::ReadBlob {
            digest: digest.clone(),
            source,
        })
    }

    /// Verify every stored blob and check that every indexed image is
    /// complete.
    pub fn fsck(&self) -> LayoutResult<FsckReport> {
        let mut report = FsckReport::default();

        for digest in self.store.digests()? {
            report.blobs_checked += 1;
            match self.store.verify(&digest) {
                Ok(()) => {}
                Err(StoreError::Corrupt { digest, reason }) => {
                    warn!(digest = %digest, reason = %reason, "corrupt blob");
                    report.corrupt.push(digest);
                }
                Err(e) => return Err(e.into()),
            }
        }

        for image in self.images() {
            let top = image.descriptor();
            if !self.store.exists(&top.digest)? {
                report.missing.push(top.digest.clone());
                continue;
            }
            match image.blobs() {
                Ok(blobs) => {
                    for blob in blobs {
                        if !self.store.exists(&blob.digest)? {
                            report.missing.push(blob.digest);
                        }
                    }
                }
                Err(e) => {
                    warn!(digest = %top.digest, error = %e, "cannot follow image references");
                    report.unreadable.push((top.clone(), e.to_string()));
                }
            }
        }
        report.missing.sort();
        report.missing.dedup();
        Ok(report)
    }

    fn view(&self, desc: Descriptor) -> StoreImage {
        StoreImage::new(self.store.clone(), desc)
    }
}

/// Result of [`Layout::fsck`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsckReport {
    /// Number of blobs re-hashed.
    pub blobs_checked: usize,
    /// Blobs whose content no longer matches their digest.
    pub corrupt: Vec<Digest>,
    /// Blobs referenced by indexed images but absent from the store.
    pub missing: Vec<Digest>,
    /// Indexed images whose references could not be followed.
    pub unreadable: Vec<(Descriptor, String)>,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty() && self.missing.is_empty() && self.unreadable.is_empty()
    }
}

/// Check that `root` carries a marker for a supported layout version.
fn read_marker(root: &Path) -> LayoutResult<()> {
    let path = root.join(LAYOUT_FILE);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(LayoutError::NotLayout {
                path: root.to_path_buf(),
                missing: LAYOUT_FILE,
            })
        }
        Err(e) => return Err(e.into()),
    };
    let marker: LayoutMarker = serde_json::from_slice(&bytes).map_err(|e| LayoutError::Marker {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    if marker.image_layout_version != LAYOUT_VERSION {
        return Err(LayoutError::Marker {
            path,
            reason: format!("unsupported imageLayoutVersion {}", marker.image_layout_version),
        });
    }
    Ok(())
}

/// Atomically (re)write the `oci-layout` marker.
fn write_marker(root: &Path, sync: bool) -> io::Result<()> {
    let marker = LayoutMarker {
        image_layout_version: LAYOUT_VERSION.to_string(),
    };
    let bytes = serde_json::to_vec(&marker)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".oci-layout-")
        .tempfile_in(root)?;
    tmp.write_all(&bytes)?;
    if sync {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(root.join(LAYOUT_FILE)).map_err(|e| e.error)?;
    if sync {
        File::open(root)?.sync_all()?;
    }
    Ok(())
}

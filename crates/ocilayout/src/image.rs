//! Images as sets of blobs, and streaming them into a store.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use ocilayout_crypto::digest_bytes;
use ocilayout_store::{BlobReader, ContentStore, StoreError};
use ocilayout_types::{media_type, Algorithm, Descriptor, Digest};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{LayoutError, LayoutResult};

/// An image as seen by a layout: a top-level descriptor plus the blobs it is
/// made of.
pub trait Image: Send + Sync {
    /// Descriptor of the top-level manifest or index.
    fn descriptor(&self) -> &Descriptor;

    /// Every constituent blob except the top-level one, ordered so that a
    /// blob comes after the blobs it references.
    fn blobs(&self) -> LayoutResult<Vec<Descriptor>>;

    /// Open the content of the top-level blob or of one of [`blobs`](Self::blobs).
    fn open_blob(&self, desc: &Descriptor) -> LayoutResult<BlobReader>;
}

/// Stream every blob of `image` into `store`, top-level blob last.
///
/// Each blob goes through [`ContentStore::write_verified`], so content that
/// does not match its descriptor is rejected and blobs already present are
/// not re-read. `cancel` is checked before each blob.
pub fn write_image(
    store: &dyn ContentStore,
    image: &dyn Image,
    cancel: &CancellationToken,
) -> LayoutResult<Descriptor> {
    let top = image.descriptor().clone();
    let mut order = image.blobs()?;
    order.push(top.clone());

    for desc in &order {
        if cancel.is_cancelled() {
            return Err(LayoutError::Cancelled);
        }
        if store.exists(&desc.digest)? {
            continue;
        }
        let mut content = image
            .open_blob(desc)
            .map_err(|source| LayoutError::SourceBlob {
                digest: desc.digest.clone(),
                source: Box::new(source),
            })?;
        store
            .write_verified(desc, &mut content)
            .map_err(|source| LayoutError::WriteBlob {
                digest: desc.digest.clone(),
                source,
            })?;
    }
    debug!(digest = %top.digest, blobs = order.len(), "wrote image");
    Ok(top)
}

// ---------------------------------------------------------------------------
// In-memory images
// ---------------------------------------------------------------------------

/// An image held entirely in memory.
///
/// Used to build images programmatically and in tests. Descriptors are not
/// checked against content here; the store rejects mismatches on write.
#[derive(Clone, Debug)]
pub struct BlobImage {
    descriptor: Descriptor,
    content: Vec<u8>,
    blobs: Vec<(Descriptor, Vec<u8>)>,
}

impl BlobImage {
    /// An image whose top-level blob is `content` with the given descriptor.
    pub fn new(descriptor: Descriptor, content: Vec<u8>) -> Self {
        Self {
            descriptor,
            content,
            blobs: Vec::new(),
        }
    }

    /// Append a constituent blob.
    pub fn with_blob(mut self, descriptor: Descriptor, content: Vec<u8>) -> Self {
        self.blobs.push((descriptor, content));
        self
    }

    /// Build an OCI image manifest referencing `config` and `layers`, with
    /// `sha256` descriptors computed from the content.
    pub fn oci_manifest(config: &[u8], layers: &[&[u8]]) -> Self {
        let describe = |media_type: &str, data: &[u8]| {
            Descriptor::new(media_type, digest_bytes(Algorithm::Sha256, data), data.len() as u64)
        };
        let config_desc = describe(media_type::IMAGE_CONFIG, config);
        let layer_descs: Vec<Descriptor> = layers
            .iter()
            .map(|l| describe(media_type::IMAGE_LAYER, l))
            .collect();

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::IMAGE_MANIFEST,
            "config": config_desc,
            "layers": layer_descs,
        })
        .to_string()
        .into_bytes();

        let mut image = Self::new(describe(media_type::IMAGE_MANIFEST, &manifest), manifest)
            .with_blob(config_desc, config.to_vec());
        for (desc, data) in layer_descs.into_iter().zip(layers) {
            image = image.with_blob(desc, data.to_vec());
        }
        image
    }

    /// Set an annotation on the top-level descriptor.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_annotation(key, value);
        self
    }

    /// Set the reference name of the top-level descriptor.
    pub fn with_ref_name(mut self, name: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_ref_name(name);
        self
    }

    /// Raw content of the top-level blob.
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

impl Image for BlobImage {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn blobs(&self) -> LayoutResult<Vec<Descriptor>> {
        Ok(self.blobs.iter().map(|(d, _)| d.clone()).collect())
    }

    fn open_blob(&self, desc: &Descriptor) -> LayoutResult<BlobReader> {
        let data = if desc.digest == self.descriptor.digest {
            &self.content
        } else {
            self.blobs
                .iter()
                .find(|(d, _)| d.digest == desc.digest)
                .map(|(_, data)| data)
                .ok_or_else(|| StoreError::NotFound(desc.digest.clone()))?
        };
        Ok(Box::new(io::Cursor::new(data.clone())))
    }
}

// ---------------------------------------------------------------------------
// Store-backed images
// ---------------------------------------------------------------------------

/// Descriptor references of a manifest or index. Everything else in the
/// document is ignored.
#[derive(Debug, Default, Deserialize)]
struct References {
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

/// An image whose content lives in a content store.
///
/// Constituent blobs are discovered by following the `config`, `layers` and
/// `manifests` references of manifest and index documents.
#[derive(Clone)]
pub struct StoreImage {
    descriptor: Descriptor,
    store: Arc<dyn ContentStore>,
}

impl std::fmt::Debug for StoreImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreImage")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl StoreImage {
    pub fn new(store: Arc<dyn ContentStore>, descriptor: Descriptor) -> Self {
        Self { descriptor, store }
    }

    /// The whole top-level blob, verified against its digest.
    pub fn content(&self) -> LayoutResult<Vec<u8>> {
        let digest = &self.descriptor.digest;
        self.store.read_all(digest).map_err(|source| LayoutError::ReadBlob {
            digest: digest.clone(),
            source,
        })
    }

    /// Open any blob of the backing store.
    pub fn blob(&self, digest: &Digest) -> LayoutResult<BlobReader> {
        self.store.open(digest).map_err(|source| LayoutError::ReadBlob {
            digest: digest.clone(),
            source,
        })
    }

    /// Direct references of `desc`. Empty for anything that is not a
    /// manifest or index.
    pub fn children(&self, desc: &Descriptor) -> LayoutResult<Vec<Descriptor>> {
        if !media_type::is_manifest_like(&desc.media_type) {
            return Ok(Vec::new());
        }
        let data = self
            .store
            .read_all(&desc.digest)
            .map_err(|source| LayoutError::ReadBlob {
                digest: desc.digest.clone(),
                source,
            })?;
        let refs: References =
            serde_json::from_slice(&data).map_err(|e| LayoutError::Manifest {
                digest: desc.digest.clone(),
                reason: e.to_string(),
            })?;
        Ok(refs
            .config
            .into_iter()
            .chain(refs.layers)
            .chain(refs.manifests)
            .collect())
    }

    /// Every blob reachable from `root`, children before their parents,
    /// each once. Iterative, so reference depth is bounded by memory only.
    fn walk(&self, root: &Descriptor) -> LayoutResult<Vec<Descriptor>> {
        let mut seen = HashSet::from([root.digest.clone()]);
        let mut out = Vec::new();
        // A frame is a node still to be emitted and its unvisited children.
        let mut stack: Vec<(Option<Descriptor>, std::vec::IntoIter<Descriptor>)> =
            vec![(None, self.children(root)?.into_iter())];
        while let Some((_, pending)) = stack.last_mut() {
            match pending.next() {
                Some(child) => {
                    if seen.insert(child.digest.clone()) {
                        let grandchildren = self.children(&child)?.into_iter();
                        stack.push((Some(child), grandchildren));
                    }
                }
                None => {
                    if let Some((Some(node), _)) = stack.pop() {
                        out.push(node);
                    }
                }
            }
        }
        Ok(out)
    }
}

impl Image for StoreImage {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn blobs(&self) -> LayoutResult<Vec<Descriptor>> {
        self.walk(&self.descriptor)
    }

    fn open_blob(&self, desc: &Descriptor) -> LayoutResult<BlobReader> {
        self.blob(&desc.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocilayout_store::InMemoryStore;
    use std::io::Read;

    fn read(mut r: BlobReader) -> Vec<u8> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn oci_manifest_references_its_blobs() {
        let image = BlobImage::oci_manifest(b"{}", &[b"layer-1", b"layer-2"]);
        let blobs = image.blobs().unwrap();
        assert_eq!(blobs.len(), 3);
        assert_eq!(blobs[0].media_type, media_type::IMAGE_CONFIG);

        let manifest: serde_json::Value = serde_json::from_slice(image.content()).unwrap();
        assert_eq!(manifest["layers"][1]["digest"], blobs[2].digest.to_string());
        assert_eq!(
            image.descriptor().digest,
            digest_bytes(Algorithm::Sha256, image.content())
        );
    }

    #[test]
    fn write_image_stores_every_blob() {
        let store = InMemoryStore::new();
        let image = BlobImage::oci_manifest(b"{\"os\":\"linux\"}", &[b"abc"]);
        let top = write_image(&store, &image, &CancellationToken::new()).unwrap();
        assert_eq!(&top, image.descriptor());
        assert_eq!(store.len(), 3);
        for desc in image.blobs().unwrap() {
            assert!(store.exists(&desc.digest).unwrap());
        }
    }

    #[test]
    fn write_image_rejects_lying_descriptor() {
        let store = InMemoryStore::new();
        let top = Descriptor::new(
            media_type::IMAGE_MANIFEST,
            digest_bytes(Algorithm::Sha256, b"claimed"),
            7,
        );
        let image = BlobImage::new(top, b"changed".to_vec());
        let err = write_image(&store, &image, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, LayoutError::WriteBlob { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn write_image_honours_cancellation() {
        let store = InMemoryStore::new();
        let image = BlobImage::oci_manifest(b"{}", &[b"abc"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = write_image(&store, &image, &cancel).unwrap_err();
        assert!(matches!(err, LayoutError::Cancelled));
        assert!(store.is_empty());
    }

    #[test]
    fn store_image_walks_nested_indexes() {
        let store = Arc::new(InMemoryStore::new());
        let image = BlobImage::oci_manifest(b"{}", &[b"one", b"two"]);
        write_image(store.as_ref(), &image, &CancellationToken::new()).unwrap();

        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [image.descriptor()],
        })
        .to_string();
        let index_desc = store
            .write_bytes(media_type::IMAGE_INDEX, index.as_bytes())
            .unwrap();

        let stored = StoreImage::new(store.clone(), index_desc);
        let blobs = stored.blobs().unwrap();
        // Config and layers first, then the manifest that references them.
        assert_eq!(blobs.len(), 4);
        assert_eq!(blobs[3].digest, image.descriptor().digest);

        let layer = read(stored.open_blob(&blobs[1]).unwrap());
        assert_eq!(layer, b"one");
    }

    #[test]
    fn deep_reference_chain_is_walked_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let mut top = store.write_bytes(media_type::IMAGE_LAYER, b"base").unwrap();
        let mut chain = vec![top.clone()];
        for _ in 0..20_000 {
            let index = serde_json::json!({ "schemaVersion": 2, "manifests": [top] }).to_string();
            top = store
                .write_bytes(media_type::IMAGE_INDEX, index.as_bytes())
                .unwrap();
            chain.push(top.clone());
        }
        chain.pop();

        let blobs = StoreImage::new(store, top).blobs().unwrap();
        assert_eq!(blobs, chain);
    }

    #[test]
    fn shared_children_are_listed_once() {
        let store = Arc::new(InMemoryStore::new());
        let image = BlobImage::oci_manifest(b"{}", &[b"same", b"same"]);
        write_image(store.as_ref(), &image, &CancellationToken::new()).unwrap();
        let blobs = StoreImage::new(store, image.descriptor().clone()).blobs().unwrap();
        assert_eq!(blobs.len(), 2);
    }

    /// An image that lists a blob it cannot provide.
    struct Incomplete {
        inner: BlobImage,
        ghost: Descriptor,
    }

    impl Image for Incomplete {
        fn descriptor(&self) -> &Descriptor {
            self.inner.descriptor()
        }

        fn blobs(&self) -> LayoutResult<Vec<Descriptor>> {
            Ok(vec![self.ghost.clone()])
        }

        fn open_blob(&self, desc: &Descriptor) -> LayoutResult<BlobReader> {
            self.inner.open_blob(desc)
        }
    }

    #[test]
    fn unreadable_source_blob_names_the_digest() {
        let store = InMemoryStore::new();
        let ghost = Descriptor::new(
            media_type::IMAGE_CONFIG,
            digest_bytes(Algorithm::Sha256, b"ghost"),
            5,
        );
        let image = Incomplete {
            inner: BlobImage::oci_manifest(b"{}", &[]),
            ghost: ghost.clone(),
        };
        let err = write_image(&store, &image, &CancellationToken::new()).unwrap_err();
        match &err {
            LayoutError::SourceBlob { digest, .. } => assert_eq!(digest, &ghost.digest),
            other => panic!("expected SourceBlob, got {other:?}"),
        }
        assert_eq!(err.kind(), ocilayout_types::ErrorKind::NotFound);
        assert!(store.is_empty());
    }

    #[test]
    fn store_image_read_errors_carry_the_digest() {
        let store = Arc::new(InMemoryStore::new());
        let desc = Descriptor::new(
            media_type::IMAGE_MANIFEST,
            digest_bytes(Algorithm::Sha256, b"absent"),
            6,
        );
        let image = StoreImage::new(store, desc.clone());
        let err = image.content().unwrap_err();
        assert!(matches!(err, LayoutError::ReadBlob { ref digest, .. } if digest == &desc.digest));
        assert!(matches!(image.blob(&desc.digest), Err(LayoutError::ReadBlob { .. })));
    }

    #[test]
    fn store_image_rejects_malformed_manifest() {
        let store = Arc::new(InMemoryStore::new());
        let desc = store
            .write_bytes(media_type::IMAGE_MANIFEST, b"not json")
            .unwrap();
        let err = StoreImage::new(store, desc).blobs().unwrap_err();
        assert!(matches!(err, LayoutError::Manifest { .. }));
    }

    #[test]
    fn non_manifest_has_no_children() {
        let store = Arc::new(InMemoryStore::new());
        let desc = store.write_bytes(media_type::IMAGE_LAYER, b"raw").unwrap();
        let image = StoreImage::new(store, desc);
        assert!(image.blobs().unwrap().is_empty());
        assert_eq!(image.content().unwrap(), b"raw");
    }
}

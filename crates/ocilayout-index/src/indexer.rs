//! The [`Indexer`]: ordered, persisted set of top-level descriptors.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use ocilayout_types::Descriptor;
use tracing::{debug, warn};

use crate::backend::{FileBackend, IndexBackend};
use crate::document::IndexDocument;
use crate::error::{IndexError, IndexResult};
use crate::matcher::DescriptorMatcher;

/// File name of the index inside a layout.
pub const INDEX_FILE: &str = "index.json";

/// Top-level index of a layout.
///
/// Every mutation runs under the backend's [`lock`](IndexBackend::lock): it
/// reloads the stored document, applies the change, persists it, and only
/// then updates the cached snapshot. Several handles on one `index.json`, in
/// one process or many, therefore never overwrite each other's entries.
/// Reads load the stored document, which is replaced whole, so a reader sees
/// a mutation entirely or not at all. A failed persist leaves the stored
/// document untouched.
pub struct Indexer {
    backend: Box<dyn IndexBackend>,
    snapshot: RwLock<Arc<IndexDocument>>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("entries", &self.len())
            .finish()
    }
}

impl Indexer {
    /// Open the index at `path`, creating an empty one if absent.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        Self::with_backend(Box::new(FileBackend::new(path.as_ref())))
    }

    /// Open the index stored in `backend`, initializing it when empty.
    pub fn with_backend(backend: Box<dyn IndexBackend>) -> IndexResult<Self> {
        let doc = {
            let _held = backend.lock()?;
            match backend.load()? {
                Some(doc) => doc,
                None => {
                    let doc = IndexDocument::default();
                    backend.store(&doc)?;
                    doc
                }
            }
        };
        Ok(Self::from_document(backend, doc))
    }

    /// Open an index that must already be stored at `backend`'s path.
    /// Nothing is created.
    pub fn open_existing(backend: FileBackend) -> IndexResult<Self> {
        match backend.load()? {
            Some(doc) => Ok(Self::from_document(Box::new(backend), doc)),
            None => Err(IndexError::Missing(backend.path().to_path_buf())),
        }
    }

    fn from_document(backend: Box<dyn IndexBackend>, doc: IndexDocument) -> Self {
        debug!(entries = doc.manifests.len(), "opened index");
        Self {
            backend,
            snapshot: RwLock::new(Arc::new(doc)),
            write_lock: Mutex::new(()),
        }
    }

    /// Append a descriptor.
    ///
    /// Fails with [`IndexError::AlreadyExists`] if an entry with the same
    /// digest is already indexed.
    pub fn add(&self, desc: Descriptor) -> IndexResult<()> {
        self.mutate(|manifests| {
            if manifests.iter().any(|d| d.digest == desc.digest) {
                return Err(IndexError::AlreadyExists(desc.digest.clone()));
            }
            debug!(digest = %desc.digest, "index add");
            manifests.push(desc);
            Ok(true)
        })
    }

    /// Remove every entry matching `matcher` and insert `desc` where the
    /// first of them was. With no matches, `desc` is appended.
    ///
    /// Fails with [`IndexError::Conflict`] if an entry that is not being
    /// replaced already carries `desc`'s digest.
    pub fn replace(&self, desc: Descriptor, matcher: &DescriptorMatcher) -> IndexResult<()> {
        self.mutate(|manifests| {
            if manifests
                .iter()
                .any(|d| d.digest == desc.digest && !matcher.matches(d))
            {
                return Err(IndexError::Conflict(desc.digest.clone()));
            }
            let position = manifests.iter().position(|d| matcher.matches(d));
            let before = manifests.len();
            manifests.retain(|d| !matcher.matches(d));
            debug!(
                digest = %desc.digest,
                replaced = before - manifests.len(),
                "index replace"
            );
            match position {
                Some(i) => manifests.insert(i, desc),
                None => manifests.push(desc),
            }
            Ok(true)
        })
    }

    /// Remove every entry matching `matcher`, returning them in index order.
    /// Nothing is written when nothing matches.
    pub fn remove(&self, matcher: &DescriptorMatcher) -> IndexResult<Vec<Descriptor>> {
        let mut removed = Vec::new();
        self.mutate(|manifests| {
            let (gone, kept): (Vec<_>, Vec<_>) =
                manifests.drain(..).partition(|d| matcher.matches(d));
            *manifests = kept;
            removed = gone;
            Ok(!removed.is_empty())
        })?;
        debug!(removed = removed.len(), matcher = %matcher, "index remove");
        Ok(removed)
    }

    /// The single entry matching `matcher`.
    pub fn find(&self, matcher: &DescriptorMatcher) -> IndexResult<Descriptor> {
        let mut found = self.list(matcher);
        match found.len() {
            0 => Err(IndexError::NotFound(matcher.to_string())),
            1 => Ok(found.remove(0)),
            count => Err(IndexError::Ambiguous {
                matcher: matcher.to_string(),
                count,
            }),
        }
    }

    /// All entries matching `matcher`, in index order.
    pub fn list(&self, matcher: &DescriptorMatcher) -> Vec<Descriptor> {
        self.document()
            .manifests
            .iter()
            .filter(|d| matcher.matches(d))
            .cloned()
            .collect()
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.document().manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current stored document.
    ///
    /// Falls back to the last document this handle loaded or wrote when the
    /// backend cannot be read.
    pub fn document(&self) -> Arc<IndexDocument> {
        match self.backend.load() {
            Ok(Some(doc)) => Arc::new(doc),
            Ok(None) => self.snapshot(),
            Err(e) => {
                warn!(error = %e, "cannot reload index; serving last snapshot");
                self.snapshot()
            }
        }
    }

    fn snapshot(&self) -> Arc<IndexDocument> {
        // The snapshot is replaced whole, never mutated, so a poisoned lock
        // still guards a consistent value.
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Read-modify-write of the stored document. `apply` returns whether it
    /// changed anything; unchanged documents are not rewritten.
    fn mutate<F>(&self, apply: F) -> IndexResult<()>
    where
        F: FnOnce(&mut Vec<Descriptor>) -> IndexResult<bool>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let _held = self.backend.lock()?;
        let mut next = match self.backend.load()? {
            Some(doc) => doc,
            None => IndexDocument::clone(&self.snapshot()),
        };
        if !apply(&mut next.manifests)? {
            return Ok(());
        }
        self.backend.store(&next)?;
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use ocilayout_types::{media_type, ErrorKind};
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn desc(n: u64) -> Descriptor {
        let digest = format!("sha256:{:064x}", n).parse().unwrap();
        Descriptor::new(media_type::IMAGE_MANIFEST, digest, n)
    }

    fn memory_indexer() -> Indexer {
        Indexer::with_backend(Box::new(MemoryBackend::new())).unwrap()
    }

    /// Backend that fails every `store` once armed.
    struct FlakyBackend {
        inner: MemoryBackend,
        fail: Arc<AtomicBool>,
    }

    impl IndexBackend for FlakyBackend {
        fn load(&self) -> IndexResult<Option<IndexDocument>> {
            self.inner.load()
        }

        fn store(&self, doc: &IndexDocument) -> IndexResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(IndexError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.store(doc)
        }
    }

    // -----------------------------------------------------------------------
    // add / find / list
    // -----------------------------------------------------------------------

    #[test]
    fn add_preserves_insertion_order() {
        let idx = memory_indexer();
        for n in [3, 1, 2] {
            idx.add(desc(n)).unwrap();
        }
        let listed: Vec<u64> = idx.list(&DescriptorMatcher::Every).iter().map(|d| d.size).collect();
        assert_eq!(listed, vec![3, 1, 2]);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let idx = memory_indexer();
        idx.add(desc(1)).unwrap();
        let err = idx.add(desc(1).with_ref_name("again")).unwrap_err();
        assert!(matches!(err, IndexError::AlreadyExists(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn find_not_found_and_ambiguous() {
        let idx = memory_indexer();
        let err = idx.find(&DescriptorMatcher::Every).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        idx.add(desc(1)).unwrap();
        idx.add(desc(2)).unwrap();
        let err = idx.find(&DescriptorMatcher::Every).unwrap_err();
        assert!(matches!(err, IndexError::Ambiguous { count: 2, .. }));

        let found = idx.find(&DescriptorMatcher::equal(&desc(2))).unwrap();
        assert_eq!(found, desc(2));
    }

    #[test]
    fn find_by_ref_name() {
        let idx = memory_indexer();
        idx.add(desc(1).with_ref_name("v1")).unwrap();
        idx.add(desc(2).with_ref_name("v2")).unwrap();
        let found = idx.find(&DescriptorMatcher::ref_name("v2")).unwrap();
        assert_eq!(found.digest, desc(2).digest);
    }

    // -----------------------------------------------------------------------
    // replace
    // -----------------------------------------------------------------------

    #[test]
    fn replace_takes_position_of_first_match() {
        let idx = memory_indexer();
        for n in 1..=4 {
            idx.add(desc(n)).unwrap();
        }
        let matcher = DescriptorMatcher::equal(&desc(2)).or(DescriptorMatcher::equal(&desc(4)));
        idx.replace(desc(9), &matcher).unwrap();
        let listed: Vec<u64> = idx.list(&DescriptorMatcher::Every).iter().map(|d| d.size).collect();
        assert_eq!(listed, vec![1, 9, 3]);
        assert!(idx.find(&DescriptorMatcher::equal(&desc(2))).is_err());
    }

    #[test]
    fn replace_without_match_appends() {
        let idx = memory_indexer();
        idx.add(desc(1)).unwrap();
        idx.replace(desc(2), &DescriptorMatcher::ref_name("none")).unwrap();
        assert_eq!(idx.list(&DescriptorMatcher::Every), vec![desc(1), desc(2)]);
    }

    #[test]
    fn replace_same_digest_updates_annotations() {
        let idx = memory_indexer();
        idx.add(desc(1)).unwrap();
        idx.replace(desc(1).with_ref_name("latest"), &DescriptorMatcher::equal(&desc(1)))
            .unwrap();
        let found = idx.find(&DescriptorMatcher::ref_name("latest")).unwrap();
        assert_eq!(found.digest, desc(1).digest);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn replace_colliding_with_unmatched_entry_is_conflict() {
        let idx = memory_indexer();
        idx.add(desc(1)).unwrap();
        idx.add(desc(2)).unwrap();
        let err = idx
            .replace(desc(2), &DescriptorMatcher::equal(&desc(1)))
            .unwrap_err();
        assert!(matches!(err, IndexError::Conflict(_)));
        assert_eq!(idx.list(&DescriptorMatcher::Every), vec![desc(1), desc(2)]);
    }

    // -----------------------------------------------------------------------
    // remove
    // -----------------------------------------------------------------------

    #[test]
    fn remove_returns_removed_entries() {
        let idx = memory_indexer();
        idx.add(desc(1).with_ref_name("a")).unwrap();
        idx.add(desc(2).with_ref_name("b")).unwrap();
        idx.add(desc(3).with_ref_name("a")).unwrap();
        let removed = idx.remove(&DescriptorMatcher::ref_name("a")).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(idx.len(), 1);
        assert!(idx.remove(&DescriptorMatcher::ref_name("a")).unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    #[test]
    fn open_creates_empty_index_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let idx = Indexer::open(&path).unwrap();
        assert!(idx.is_empty());
        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["manifests"], serde_json::json!([]));
    }

    #[test]
    fn reopen_sees_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        {
            let idx = Indexer::open(&path).unwrap();
            idx.add(desc(1)).unwrap();
            idx.add(desc(2)).unwrap();
            idx.replace(desc(3), &DescriptorMatcher::equal(&desc(1))).unwrap();
        }
        let idx = Indexer::open(&path).unwrap();
        assert_eq!(idx.list(&DescriptorMatcher::Every), vec![desc(3), desc(2)]);
    }

    #[test]
    fn corrupt_index_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        fs::write(&path, b"not json").unwrap();
        let err = Indexer::open(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn leftover_temp_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        Indexer::open(&path).unwrap().add(desc(1)).unwrap();
        fs::write(dir.path().join(".index-crashed"), b"{\"schemaVersion\":2,\"manif").unwrap();
        let idx = Indexer::open(&path).unwrap();
        assert_eq!(idx.list(&DescriptorMatcher::Every), vec![desc(1)]);
    }

    #[test]
    fn failed_persist_leaves_snapshot_unchanged() {
        let fail = Arc::new(AtomicBool::new(false));
        let idx = Indexer::with_backend(Box::new(FlakyBackend {
            inner: MemoryBackend::new(),
            fail: Arc::clone(&fail),
        }))
        .unwrap();
        idx.add(desc(1)).unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(idx.add(desc(2)).is_err());
        assert!(idx.replace(desc(3), &DescriptorMatcher::Every).is_err());
        assert!(idx.remove(&DescriptorMatcher::Every).is_err());
        assert_eq!(idx.list(&DescriptorMatcher::Every), vec![desc(1)]);

        fail.store(false, Ordering::SeqCst);
        idx.add(desc(2)).unwrap();
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn open_existing_requires_a_stored_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let err = Indexer::open_existing(FileBackend::new(&path)).unwrap_err();
        assert!(matches!(err, IndexError::Missing(ref p) if p == &path));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        Indexer::open(&path).unwrap().add(desc(1)).unwrap();
        let idx = Indexer::open_existing(FileBackend::new(&path)).unwrap();
        assert_eq!(idx.list(&DescriptorMatcher::Every), vec![desc(1)]);
    }

    #[test]
    fn remove_without_match_does_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let idx = Indexer::open(&path).unwrap();
        idx.add(desc(1)).unwrap();
        let before = fs::metadata(&path).unwrap().modified().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(idx.remove(&DescriptorMatcher::ref_name("none")).unwrap().is_empty());
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
    }

    // -----------------------------------------------------------------------
    // Several handles
    // -----------------------------------------------------------------------

    #[test]
    fn two_handles_keep_each_others_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let first = Indexer::open(&path).unwrap();
        let second = Indexer::open(&path).unwrap();

        first.add(desc(1)).unwrap();
        second.add(desc(2)).unwrap();
        assert_eq!(first.list(&DescriptorMatcher::Every), vec![desc(1), desc(2)]);
        assert_eq!(second.len(), 2);

        // Duplicate detection sees the other handle's entry.
        assert!(matches!(second.add(desc(1)), Err(IndexError::AlreadyExists(_))));
        first.replace(desc(3), &DescriptorMatcher::equal(&desc(2))).unwrap();
        assert_eq!(second.find(&DescriptorMatcher::equal(&desc(3))).unwrap(), desc(3));

        let fresh = Indexer::open(&path).unwrap();
        assert_eq!(fresh.list(&DescriptorMatcher::Every), vec![desc(1), desc(3)]);
    }

    #[test]
    fn handles_in_separate_threads_never_lose_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        Indexer::open(&path).unwrap();

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let path = path.clone();
                thread::spawn(move || {
                    let idx =
                        Indexer::with_backend(Box::new(FileBackend::with_sync(&path, false))).unwrap();
                    for i in 0..10u64 {
                        idx.add(desc(t * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }

        let fresh = Indexer::open(&path).unwrap();
        assert_eq!(fresh.len(), 40);
    }

    #[test]
    fn readers_see_replace_whole_or_not_at_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let idx = Arc::new(Indexer::with_backend(Box::new(FileBackend::with_sync(&path, false))).unwrap());
        let (x, y) = (desc(1), desc(2));
        idx.add(desc(7)).unwrap();
        idx.add(x.clone()).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let idx = Arc::clone(&idx);
            let done = Arc::clone(&done);
            let (x, y) = (x.clone(), y.clone());
            thread::spawn(move || {
                let mut reads = 0u32;
                while !done.load(Ordering::SeqCst) || reads == 0 {
                    let live = idx.list(&DescriptorMatcher::Every);
                    let has_x = live.contains(&x);
                    let has_y = live.contains(&y);
                    assert!(has_x != has_y, "saw x={has_x} y={has_y} in {live:?}");
                    assert!(live.contains(&desc(7)));
                    reads += 1;
                }
            })
        };

        let either = DescriptorMatcher::equal(&x).or(DescriptorMatcher::equal(&y));
        for round in 0..100 {
            let next = if round % 2 == 0 { y.clone() } else { x.clone() };
            idx.replace(next, &either).unwrap();
        }
        done.store(true, Ordering::SeqCst);
        reader.join().expect("reader should never observe a partial replace");
        assert_eq!(idx.list(&DescriptorMatcher::Every), vec![desc(7), x]);
    }

    #[test]
    fn concurrent_add_and_replace_stay_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let idx = Arc::new(Indexer::with_backend(Box::new(FileBackend::with_sync(&path, false))).unwrap());

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let idx = Arc::clone(&idx);
                thread::spawn(move || {
                    for i in 0..10u64 {
                        let n = t * 100 + i;
                        idx.add(desc(n)).unwrap();
                        if i % 2 == 1 {
                            // Swap the entry just added for a fresh one.
                            idx.replace(desc(n + 50), &DescriptorMatcher::equal(&desc(n)))
                                .unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }

        let live = idx.list(&DescriptorMatcher::Every);
        assert_eq!(live.len(), 80);
        let mut digests: Vec<_> = live.iter().map(|d| d.digest.clone()).collect();
        digests.sort();
        digests.dedup();
        assert_eq!(digests.len(), 80);

        let fresh = Indexer::open(&path).unwrap();
        assert_eq!(fresh.list(&DescriptorMatcher::Every), live);
    }
}

//! Availability check: do completed items still exist on disk?
//!
//! Items are located by content digest, never by path. Media files are
//! looked up in the digest index of their collection folder; covers in the
//! digest index of the cover cache. Missing covers are regenerated from the
//! media file when possible, and downloaded again otherwise.

use std::path::PathBuf;
use std::sync::Arc;

use bitflags::bitflags;

use super::index::{DigestIndex, LibraryIndex, build_index, build_library_index};
use crate::catalog::CatalogStore;
use crate::error::{Error, Result};
use crate::media::Tagger;
use crate::media::cover::CoverCache;
use crate::model::{FileInfo, ItemRecord};
use crate::remote::CoverFetcher;

bitflags! {
    /// Problems found for one item.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IssueFlags: u8 {
        /// No file in the collection folder has the recorded media digest
        const MEDIA_MISSING = 1 << 0;
        /// The cached cover was gone or changed
        const COVER_MISSING = 1 << 1;
        /// A new cover was cached and its digest recorded
        const COVER_RESTORED = 1 << 2;
    }
}

/// An item with at least one issue.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedItem {
    pub collection_id: String,
    pub item_id: String,
    pub title: String,
    pub flags: IssueFlags,
}

/// Outcome of one availability check.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityReport {
    /// Completed items examined
    pub checked: usize,
    pub flagged: Vec<FlaggedItem>,
    /// Covers re-extracted from media files
    pub covers_restored_local: usize,
    /// Covers downloaded again
    pub covers_restored_remote: usize,
    /// `(item_id, reason)` of covers that could not be repaired
    pub cover_failures: Vec<(String, String)>,
}

impl AvailabilityReport {
    pub fn is_clean(&self) -> bool {
        self.flagged.is_empty()
    }

    /// Items whose media must be fetched again.
    pub fn missing_media(&self) -> impl Iterator<Item = &FlaggedItem> {
        self.flagged
            .iter()
            .filter(|f| f.flags.contains(IssueFlags::MEDIA_MISSING))
    }
}

/// Where a replacement cover came from.
enum CoverOrigin {
    Local,
    Remote,
}

/// Checks completed items against the files actually on disk.
pub struct AvailabilityChecker {
    store: Arc<CatalogStore>,
    tagger: Arc<dyn Tagger>,
    covers: Arc<dyn CoverFetcher>,
    download_root: PathBuf,
    cache: Arc<CoverCache>,
}

impl AvailabilityChecker {
    pub fn new(
        store: Arc<CatalogStore>,
        tagger: Arc<dyn Tagger>,
        covers: Arc<dyn CoverFetcher>,
        download_root: PathBuf,
        cache_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            tagger,
            covers,
            download_root,
            cache: Arc::new(CoverCache::new(cache_dir)),
        }
    }

    /// Check every completed item and repair cover cache gaps.
    ///
    /// Never clears `success`; see [`requeue_missing`] for that.
    pub async fn run(&self) -> Result<AvailabilityReport> {
        let catalog = self.store.snapshot();

        let root = self.download_root.clone();
        let cache_dir = self.cache.dir().to_path_buf();
        let (library, cover_index): (LibraryIndex, DigestIndex) =
            tokio::task::spawn_blocking(move || -> Result<_> {
                Ok((build_library_index(&root)?, build_index(&cache_dir)?))
            })
            .await??;

        let empty = DigestIndex::new();
        let mut report = AvailabilityReport::default();

        for (collection_id, collection) in &catalog.collections {
            let media_index = library.get(collection_id).unwrap_or(&empty);

            for item in collection.items.values().filter(|i| i.success) {
                let Some(info) = item.file_info.as_ref() else {
                    continue;
                };
                report.checked += 1;

                let mut flags = IssueFlags::empty();
                let media_path = media_index.get(&info.media_hash).cloned();
                if media_path.is_none() {
                    flags |= IssueFlags::MEDIA_MISSING;
                    tracing::info!(target: "syncy::health", item = %item.item_id, "Media file missing");
                }

                if !cover_index.contains_key(&info.cover_hash) {
                    flags |= IssueFlags::COVER_MISSING;
                    match self.repair_cover(item, info, media_path).await {
                        Ok(CoverOrigin::Local) => {
                            flags |= IssueFlags::COVER_RESTORED;
                            report.covers_restored_local += 1;
                        }
                        Ok(CoverOrigin::Remote) => {
                            flags |= IssueFlags::COVER_RESTORED;
                            report.covers_restored_remote += 1;
                        }
                        Err(e) => {
                            tracing::warn!(target: "syncy::health", item = %item.item_id, error = %e, "Cover repair failed");
                            report.cover_failures.push((item.item_id.clone(), e.to_string()));
                        }
                    }
                }

                if !flags.is_empty() {
                    report.flagged.push(FlaggedItem {
                        collection_id: collection_id.clone(),
                        item_id: item.item_id.clone(),
                        title: item.title.clone(),
                        flags,
                    });
                }
            }
        }

        tracing::info!(
            target: "syncy::health",
            checked = report.checked,
            flagged = report.flagged.len(),
            restored_local = report.covers_restored_local,
            restored_remote = report.covers_restored_remote,
            "Availability check finished"
        );
        Ok(report)
    }

    /// Cache a fresh cover for `item` and record its digest.
    async fn repair_cover(
        &self,
        item: &ItemRecord,
        info: &FileInfo,
        media_path: Option<PathBuf>,
    ) -> Result<CoverOrigin> {
        let local = match media_path {
            Some(path) => {
                let tagger = Arc::clone(&self.tagger);
                match tokio::task::spawn_blocking(move || tagger.extract_cover(&path)).await? {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::debug!(target: "syncy::health", item = %item.item_id, error = %e, "No embedded cover");
                        None
                    }
                }
            }
            None => None,
        };

        let (bytes, origin) = match local {
            Some(bytes) => (bytes, CoverOrigin::Local),
            None => {
                if info.source_url.is_empty() {
                    return Err(Error::validation("no cover source recorded"));
                }
                (self.covers.fetch(&info.source_url).await?, CoverOrigin::Remote)
            }
        };

        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);
        let collection_id = item.collection_id.clone();
        let item_id = item.item_id.clone();
        let mode = info.cover_mode;
        tokio::task::spawn_blocking(move || {
            let (_, digest) = cache.store(&item_id, &bytes, mode)?;
            store.set_cover_hash(&collection_id, &item_id, &digest)
        })
        .await??;
        Ok(origin)
    }
}

/// Reset every item flagged `MEDIA_MISSING` so the next sync fetches it again.
///
/// Items that vanished from the catalog since the check are skipped.
pub fn requeue_missing(store: &CatalogStore, report: &AvailabilityReport) -> Result<usize> {
    let mut requeued = 0;
    for flagged in report.missing_media() {
        match store.reset_item(&flagged.collection_id, &flagged.item_id) {
            Ok(()) => requeued += 1,
            Err(Error::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    tracing::info!(target: "syncy::health", requeued, "Requeued missing items");
    Ok(requeued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewCollection;
    use crate::health::hash_file;
    use crate::media::mocks::MockTagger;
    use crate::model::FileInfo;
    use crate::organizer::ensure_collection_folder;
    use crate::remote::mocks::{MockCovers, sample_png};
    use crate::test_utils::{new_item, temp_store};

    const PLAYLIST: &str = "svc:playlist:X";
    const TRACK: &str = "svc:track:1";

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<CatalogStore>,
        tagger: Arc<MockTagger>,
        covers: Arc<MockCovers>,
        checker: AvailabilityChecker,
        media: PathBuf,
        cover: PathBuf,
    }

    /// One completed item with its media file and cached cover on disk.
    fn fixture() -> Fixture {
        let (store, dir) = temp_store();
        let store = Arc::new(store);
        let root = dir.path().to_path_buf();
        let cache_dir = root.join(".covers");

        store.add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
        store.add_item(PLAYLIST, TRACK, new_item("One")).unwrap();

        let folder = ensure_collection_folder(&root, "Mix", PLAYLIST).unwrap();
        let media = folder.join("One.mp3");
        std::fs::write(&media, b"media bytes").unwrap();

        let cache = CoverCache::new(&cache_dir);
        let (cover, cover_hash) = cache.store(TRACK, &sample_png(4, 4), Default::default()).unwrap();

        let tagger = Arc::new(MockTagger::default());
        tagger.embed_cover(&media, &cover).unwrap();

        store
            .complete_item(
                PLAYLIST,
                TRACK,
                None,
                FileInfo {
                    source_url: "https://covers.test/1.png".to_string(),
                    cover_mode: Default::default(),
                    cover_hash,
                    media_container: Default::default(),
                    media_bitrate: 320,
                    media_hash: hash_file(&media).unwrap(),
                    length_seconds: 200,
                },
            )
            .unwrap();

        let covers = Arc::new(MockCovers::default());
        let checker = AvailabilityChecker::new(
            Arc::clone(&store),
            tagger.clone(),
            covers.clone(),
            root,
            cache_dir,
        );

        Fixture {
            _dir: dir,
            store,
            tagger,
            covers,
            checker,
            media,
            cover,
        }
    }

    fn cover_hash(store: &CatalogStore) -> String {
        store.item(PLAYLIST, TRACK).unwrap().file_info.unwrap().cover_hash
    }

    #[tokio::test]
    async fn test_clean_library() {
        let f = fixture();
        let report = f.checker.run().await.unwrap();
        assert_eq!(report.checked, 1);
        assert!(report.is_clean());
        assert_eq!(f.covers.calls(), 0);
    }

    #[tokio::test]
    async fn test_deleted_media_is_flagged() {
        let f = fixture();
        std::fs::remove_file(&f.media).unwrap();

        let report = f.checker.run().await.unwrap();
        assert_eq!(report.flagged.len(), 1);
        assert_eq!(report.flagged[0].flags, IssueFlags::MEDIA_MISSING);
        assert_eq!(report.missing_media().count(), 1);
        // The check itself does not touch success
        assert!(f.store.item(PLAYLIST, TRACK).unwrap().success);
    }

    #[tokio::test]
    async fn test_restored_copy_under_new_name_clears_flag() {
        let f = fixture();
        let bytes = std::fs::read(&f.media).unwrap();
        std::fs::remove_file(&f.media).unwrap();
        assert!(!f.checker.run().await.unwrap().is_clean());

        let renamed = f.media.with_file_name("Totally different name.mp3");
        std::fs::write(&renamed, &bytes).unwrap();

        let report = f.checker.run().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(f.covers.calls(), 0);
    }

    #[tokio::test]
    async fn test_media_in_renamed_folder_is_found() {
        let f = fixture();
        let folder = f.media.parent().unwrap();
        std::fs::rename(folder, folder.with_file_name("Renamed")).unwrap();

        assert!(f.checker.run().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_cover_restored_from_media() {
        let f = fixture();
        std::fs::remove_file(&f.cover).unwrap();
        let before = cover_hash(&f.store);

        let report = f.checker.run().await.unwrap();
        assert_eq!(report.covers_restored_local, 1);
        assert_eq!(report.covers_restored_remote, 0);
        assert_eq!(
            report.flagged[0].flags,
            IssueFlags::COVER_MISSING | IssueFlags::COVER_RESTORED
        );
        assert_eq!(f.covers.calls(), 0);
        assert_eq!(f.tagger.extracts(), 1);

        assert!(f.cover.exists());
        assert_eq!(cover_hash(&f.store), hash_file(&f.cover).unwrap());
        assert!(!before.is_empty());
    }

    #[tokio::test]
    async fn test_cover_downloaded_when_media_missing() {
        let f = fixture();
        std::fs::remove_file(&f.cover).unwrap();
        std::fs::remove_file(&f.media).unwrap();

        let report = f.checker.run().await.unwrap();
        assert_eq!(report.covers_restored_remote, 1);
        assert_eq!(f.covers.calls(), 1);
        assert_eq!(f.tagger.extracts(), 0);
        assert!(report.flagged[0].flags.contains(IssueFlags::MEDIA_MISSING));
        assert_eq!(cover_hash(&f.store), hash_file(&f.cover).unwrap());
    }

    #[tokio::test]
    async fn test_cover_repair_failure_is_reported() {
        let f = fixture();
        std::fs::remove_file(&f.cover).unwrap();
        std::fs::remove_file(&f.media).unwrap();
        f.covers.fail.store(true, std::sync::atomic::Ordering::SeqCst);

        let report = f.checker.run().await.unwrap();
        assert_eq!(report.cover_failures.len(), 1);
        assert_eq!(report.flagged[0].flags, IssueFlags::MEDIA_MISSING | IssueFlags::COVER_MISSING);
    }

    #[tokio::test]
    async fn test_requeue_missing() {
        let f = fixture();
        std::fs::remove_file(&f.media).unwrap();
        let report = f.checker.run().await.unwrap();

        assert_eq!(requeue_missing(&f.store, &report).unwrap(), 1);
        let item = f.store.item(PLAYLIST, TRACK).unwrap();
        assert!(!item.success);
        assert!(item.file_info.is_none());
    }

    #[test]
    fn test_flags_compose() {
        let flags = IssueFlags::MEDIA_MISSING | IssueFlags::COVER_MISSING;
        assert!(flags.contains(IssueFlags::MEDIA_MISSING));
        assert!(!flags.contains(IssueFlags::COVER_RESTORED));
    }
}

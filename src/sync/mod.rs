//! Sync orchestration.
//!
//! [`SyncService`] ties the catalog, reconciliation, the job engine and the
//! remote/media collaborators together:
//!
//! 1. `add_collection` registers a remote playlist
//! 2. `sync_collection` diffs it against the catalog, registers placeholders
//!    for new tracks, and runs one job per track still missing
//! 3. `check_availability` finds completed tracks whose files are gone
//!
//! # Example
//!
//! ```ignore
//! let service = SyncService::new(store, Collaborators::production(&config), SyncSettings::from_config(&config));
//! let id = service.add_collection("https://music.youtube.com/playlist?list=PL123").await?;
//! let report = service.sync_collection(&id).await?;
//! println!("{} completed, {} failed", report.completed, report.failed.len());
//! ```

mod job;

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::catalog::{CatalogStore, NewCollection, NewItem};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::health::{AvailabilityChecker, AvailabilityReport, DigestIndex, build_index, requeue_missing};
use crate::jobs::{JobEngine, JobFailure, JobProgress, Task};
use crate::media::cover::CoverCache;
use crate::media::{FfmpegTranscoder, LoftyTagger, Tagger, Transcoder};
use crate::model::{Artists, CatalogId, Codec, CoverMode, IdKind, ItemRecord};
use crate::organizer::ensure_collection_folder;
use crate::reconcile::{RemovalPolicy, diff, without_blacklisted};
use crate::remote::{CoverFetcher, HttpCoverFetcher, RemoteItem, RemoteSource, YtDlpSource};

pub use job::ItemJob;

/// Settings the orchestrator and its jobs need, taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub download_root: PathBuf,
    pub temp_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub filename_template: String,
    pub cover_mode: CoverMode,
    pub codec: Codec,
    pub quality: u8,
    pub removal_policy: RemovalPolicy,
    pub max_parallel: usize,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            download_root: config.download.download_path.clone(),
            temp_dir: config.download.temp_path.clone(),
            cache_dir: config.download.cache_path.clone(),
            filename_template: config.download.filename_template.clone(),
            cover_mode: config.download.cover_mode,
            codec: config.download.codec,
            quality: config.download.encode_quality,
            removal_policy: config.sync.removal_policy,
            max_parallel: config.sync.max_parallel,
        }
    }
}

/// External collaborators of the sync.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn RemoteSource>,
    pub covers: Arc<dyn CoverFetcher>,
    pub transcoder: Arc<dyn Transcoder>,
    pub tagger: Arc<dyn Tagger>,
}

impl Collaborators {
    /// yt-dlp, HTTP covers, ffmpeg and lofty.
    pub fn production(config: &Config) -> Self {
        Self {
            source: Arc::new(YtDlpSource::new(config.sync.reachability_url.clone())),
            covers: Arc::new(HttpCoverFetcher::new()),
            transcoder: Arc::new(FfmpegTranscoder::new()),
            tagger: Arc::new(LoftyTagger::new()),
        }
    }
}

/// Outcome of syncing one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Placeholders registered for new remote items
    pub added: usize,
    /// Items removed according to the removal policy
    pub removed: usize,
    /// Jobs submitted
    pub scheduled: usize,
    pub completed: usize,
    pub failed: Vec<JobFailure>,
}

/// Orchestrates add / sync / availability workflows.
pub struct SyncService {
    store: Arc<CatalogStore>,
    collaborators: Collaborators,
    settings: Arc<SyncSettings>,
    engine: JobEngine<ItemJob>,
    progress: Mutex<Option<UnboundedReceiver<JobProgress>>>,
}

impl SyncService {
    pub fn new(store: Arc<CatalogStore>, collaborators: Collaborators, settings: SyncSettings) -> Self {
        let settings = Arc::new(settings);
        let handler = Arc::new(ItemJob {
            store: Arc::clone(&store),
            source: Arc::clone(&collaborators.source),
            covers: Arc::clone(&collaborators.covers),
            transcoder: Arc::clone(&collaborators.transcoder),
            tagger: Arc::clone(&collaborators.tagger),
            cache: Arc::new(CoverCache::new(settings.cache_dir.clone())),
            settings: Arc::clone(&settings),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let engine = JobEngine::new(handler, settings.max_parallel).with_progress(tx);

        Self {
            store,
            collaborators,
            settings,
            engine,
            progress: Mutex::new(Some(rx)),
        }
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Take the progress stream. Only the first caller gets it.
    pub fn progress(&self) -> Option<UnboundedReceiver<JobProgress>> {
        self.progress.lock().take()
    }

    /// Stop scheduling new jobs; running jobs finish.
    pub fn shutdown(&self) {
        tracing::info!(target: "syncy::sync", "Shutting down, letting running jobs drain");
        self.engine.stop_accepting();
        self.engine.cancel_pending();
    }

    /// Register a remote playlist. Returns its collection id.
    pub async fn add_collection(&self, remote_ref: &str) -> Result<String> {
        let source = &self.collaborators.source;
        self.ensure_reachable().await?;

        let id = source.resolve_collection(remote_ref)?;
        if !id.is_syncable() {
            return Err(Error::validation(format!("{id} is not a playlist")));
        }
        let collection_id = id.to_string();
        if self.store.verify_path(&collection_id, None) {
            return Err(Error::already_exists(format!("collection {collection_id}")));
        }

        let remote = source.fetch_collection(&id.remote_id).await?;
        let data = NewCollection {
            title: if remote.title.trim().is_empty() { id.remote_id.clone() } else { remote.title },
            author: remote.author,
        };

        let key = collection_id.clone();
        self.with_store(move |store| store.add_collection(&key, data)).await?;
        tracing::info!(target: "syncy::sync", collection = %collection_id, "Collection added");
        Ok(collection_id)
    }

    /// Bring one collection in line with its remote playlist.
    pub async fn sync_collection(&self, collection_id: &str) -> Result<SyncReport> {
        let id = self.syncable_id(collection_id)?;
        let collection = self.store.collection(collection_id)?;
        self.ensure_reachable().await?;

        let remote = self
            .collaborators
            .source
            .fetch_collection(&id.remote_id)
            .await?;
        let remote_items: Vec<(String, RemoteItem)> = remote
            .items
            .into_iter()
            .map(|item| (id.child_track(&item.remote_id).to_string(), item))
            .collect();

        let remote_ids: BTreeSet<String> = remote_items.iter().map(|(k, _)| k.clone()).collect();
        let remote_ids = without_blacklisted(remote_ids, &collection.blacklist);
        let existing: BTreeSet<String> = collection.items.keys().cloned().collect();
        let changes = diff(&existing, &remote_ids);

        tracing::info!(
            target: "syncy::sync",
            collection = collection_id,
            remote = remote_ids.len(),
            new = changes.to_add.len(),
            gone = changes.to_remove.len(),
            "Reconciled"
        );

        // Placeholders are durable before any job runs
        let new_items: Vec<(String, NewItem)> = remote_items
            .into_iter()
            .filter(|(key, _)| changes.to_add.contains(key))
            .map(|(key, item)| (key, placeholder(item)))
            .collect();
        let added = new_items.len();
        let key = collection_id.to_string();
        self.with_store(move |store| {
            for (item_id, item) in new_items {
                store.add_item(&key, &item_id, item)?;
            }
            Ok(())
        })
        .await?;

        let removed = self
            .apply_removals(collection_id, &collection.folder_name, &changes.to_remove)
            .await?;

        let root = self.settings.download_root.clone();
        let folder_name = collection.folder_name.clone();
        let key = collection_id.to_string();
        let folder = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            ensure_collection_folder(&root, &folder_name, &key)
        })
        .await??;

        let current = self.store.collection(collection_id)?;
        let tasks: Vec<Task> = current
            .items
            .values()
            .filter(|item| {
                !item.success
                    && remote_ids.contains(&item.item_id)
                    && !current.blacklist.contains(&item.item_id)
            })
            .map(|item| Task::new(collection_id, item.item_id.clone(), folder.clone()))
            .collect();

        let scheduled = self.engine.submit(tasks);
        let batch = self.engine.run_to_completion().await;

        Ok(SyncReport {
            added,
            removed,
            scheduled,
            completed: batch.completed,
            failed: batch.failed,
        })
    }

    /// Sync every playlist collection in turn.
    pub async fn sync_all(&self) -> Vec<(String, Result<SyncReport>)> {
        let mut results = Vec::new();
        for collection_id in self.store.collection_ids() {
            if self.syncable_id(&collection_id).is_err() {
                tracing::debug!(target: "syncy::sync", collection = %collection_id, "Skipping non-syncable collection");
                continue;
            }
            if !self.engine.is_accepting() {
                break;
            }
            let result = self.sync_collection(&collection_id).await;
            if let Err(e) = &result {
                tracing::warn!(target: "syncy::sync", collection = %collection_id, error = %e, "Collection sync failed");
            }
            results.push((collection_id, result));
        }
        results
    }

    /// Find completed items whose files are gone and repair the cover cache.
    pub async fn check_availability(&self) -> Result<AvailabilityReport> {
        AvailabilityChecker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.collaborators.tagger),
            Arc::clone(&self.collaborators.covers),
            self.settings.download_root.clone(),
            self.settings.cache_dir.clone(),
        )
        .run()
        .await
    }

    /// Reset items with missing media so the next sync fetches them.
    pub fn requeue_missing(&self, report: &AvailabilityReport) -> Result<usize> {
        requeue_missing(&self.store, report)
    }

    fn syncable_id(&self, collection_id: &str) -> Result<CatalogId> {
        let id: CatalogId = collection_id.parse()?;
        if id.kind != IdKind::Playlist {
            return Err(Error::validation(format!("{collection_id} is not a playlist")));
        }
        if id.service != self.collaborators.source.service() {
            return Err(Error::validation(format!(
                "{collection_id} belongs to service '{}', not '{}'",
                id.service,
                self.collaborators.source.service()
            )));
        }
        Ok(id)
    }

    async fn ensure_reachable(&self) -> Result<()> {
        if self.collaborators.source.check_reachability().await {
            Ok(())
        } else {
            Err(Error::network(format!(
                "{} is not reachable, check the network connection",
                self.collaborators.source.service()
            )))
        }
    }

    /// Handle items that disappeared remotely. Returns how many were removed.
    async fn apply_removals(
        &self,
        collection_id: &str,
        folder_name: &str,
        gone: &BTreeSet<String>,
    ) -> Result<usize> {
        let policy = self.settings.removal_policy;
        if gone.is_empty() || policy == RemovalPolicy::Keep {
            return Ok(0);
        }

        let (records, kept): (Vec<ItemRecord>, Vec<ItemRecord>) = self
            .store
            .items(collection_id)?
            .into_iter()
            .partition(|item| gone.contains(&item.item_id));
        // Identical content may be recorded under a surviving item too
        let kept_digests: HashSet<String> = kept
            .into_iter()
            .filter_map(|item| item.file_info.map(|info| info.media_hash))
            .collect();

        let key = collection_id.to_string();
        let folder = self.settings.download_root.join(folder_name);
        let cache = CoverCache::new(self.settings.cache_dir.clone());

        self.with_store(move |store| {
            let media_index = if policy == RemovalPolicy::Delete {
                build_index(&folder)?
            } else {
                DigestIndex::new()
            };
            remove_gone_items(store, &key, policy, &records, &media_index, &kept_digests, &cache)
        })
        .await
    }

    async fn with_store<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&CatalogStore) -> Result<R> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}

/// Drop `records` from the catalog according to `policy`.
///
/// Under `Delete` a record whose media file cannot be removed is kept, so
/// the next sync tries again. Returns how many records were dropped.
fn remove_gone_items(
    store: &CatalogStore,
    collection_id: &str,
    policy: RemovalPolicy,
    records: &[ItemRecord],
    media_index: &DigestIndex,
    kept_digests: &HashSet<String>,
    cache: &CoverCache,
) -> Result<usize> {
    let mut removed = 0;
    for item in records {
        if policy == RemovalPolicy::Delete && !delete_media(media_index, item, kept_digests) {
            continue;
        }

        match store.delete_item(collection_id, &item.item_id) {
            Ok(()) => removed += 1,
            Err(Error::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }

        match policy {
            RemovalPolicy::Blacklist => {
                if let Err(e) = store.add_to_blacklist(collection_id, &item.item_id) {
                    tracing::debug!(target: "syncy::sync", item = %item.item_id, error = %e, "Already blacklisted");
                }
            }
            RemovalPolicy::Delete => remove_cached_cover(cache, &item.item_id),
            RemovalPolicy::Keep => {}
        }
    }
    Ok(removed)
}

/// Delete the media file of a removed item.
///
/// Returns `false` only when the file exists and could not be deleted.
fn delete_media(media_index: &DigestIndex, item: &ItemRecord, kept_digests: &HashSet<String>) -> bool {
    let Some(info) = &item.file_info else {
        return true;
    };
    if kept_digests.contains(&info.media_hash) {
        tracing::info!(target: "syncy::sync", item = %item.item_id, "Media shared with a kept item, leaving it on disk");
        return true;
    }
    let Some(path) = media_index.get(&info.media_hash) else {
        return true;
    };

    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(target: "syncy::sync", path = %path.display(), "Deleted media file");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(
                target: "syncy::sync",
                path = %path.display(),
                error = %e,
                "Could not delete media file, keeping the record for the next sync"
            );
            false
        }
    }
}

fn remove_cached_cover(cache: &CoverCache, item_id: &str) {
    let path = cache.path_for(item_id);
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(target: "syncy::sync", path = %path.display(), error = %e, "Could not delete cached cover");
        }
    }
}

/// Placeholder metadata for a remote item, filling required fields.
fn placeholder(item: RemoteItem) -> NewItem {
    let artists = if item.artists.iter().all(|a| a.trim().is_empty()) {
        Artists::from_vec(vec!["Unknown Artist".to_string()])
    } else {
        item.artists
    };
    NewItem {
        title: non_empty(item.title, "Unknown Title"),
        album: non_empty(item.album, "Unknown Album"),
        artists,
        release_year: None,
    }
}

fn non_empty(value: String, fallback: &str) -> String {
    if value.trim().is_empty() { fallback.to_string() } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{IssueFlags, hash_file};
    use crate::jobs::JobState;
    use crate::media::mocks::{MockTagger, MockTranscoder};
    use crate::remote::mocks::{MockCovers, MockSource};
    use crate::test_utils::{file_info, new_item};
    use std::sync::atomic::Ordering;

    const PLAYLIST: &str = "svc:playlist:X";

    struct Harness {
        dir: tempfile::TempDir,
        source: Arc<MockSource>,
        covers: Arc<MockCovers>,
        transcoder: Arc<MockTranscoder>,
        service: SyncService,
    }

    fn harness(remote: &[&str], policy: RemovalPolicy) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        std::fs::create_dir_all(&root).unwrap();
        let store = Arc::new(CatalogStore::open(&root).unwrap());

        let source = Arc::new(MockSource::with_items(remote));
        let covers = Arc::new(MockCovers::default());
        let transcoder = Arc::new(MockTranscoder::default());
        let collaborators = Collaborators {
            source: source.clone(),
            covers: covers.clone(),
            transcoder: transcoder.clone(),
            tagger: Arc::new(MockTagger::default()),
        };
        let settings = SyncSettings {
            download_root: root,
            temp_dir: dir.path().join("tmp"),
            cache_dir: dir.path().join("covers"),
            filename_template: "$title$ - $artist$".to_string(),
            cover_mode: CoverMode::Crop,
            codec: Codec::Mp3,
            quality: 10,
            removal_policy: policy,
            max_parallel: 3,
        };

        Harness {
            dir,
            source,
            covers,
            transcoder,
            service: SyncService::new(store, collaborators, settings),
        }
    }

    fn store(h: &Harness) -> &CatalogStore {
        h.service.store()
    }

    #[tokio::test]
    async fn test_add_collection() {
        let h = harness(&[], RemovalPolicy::Keep);
        let id = h.service.add_collection("svc:playlist:X").await.unwrap();
        assert_eq!(id, PLAYLIST);

        let collection = store(&h).collection(PLAYLIST).unwrap();
        assert_eq!(collection.title, "Mock Mix");
        assert_eq!(collection.author, "mock");
        assert!(collection.items.is_empty());

        let again = h.service.add_collection("svc:playlist:X").await;
        assert!(matches!(again, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_add_collection_errors() {
        let h = harness(&[], RemovalPolicy::Keep);
        assert!(matches!(
            h.service.add_collection("svc:track:abc").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            h.service.add_collection("svc:playlist:private").await,
            Err(Error::Unreachable(_))
        ));

        h.source.reachable.store(false, Ordering::SeqCst);
        assert!(matches!(
            h.service.add_collection("svc:playlist:X").await,
            Err(Error::Network(_))
        ));
        assert!(store(&h).collection_ids().is_empty());
    }

    #[tokio::test]
    async fn test_sync_schedules_only_new_items() {
        let h = harness(&["1", "2", "3"], RemovalPolicy::Keep);
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
        for id in ["svc:track:1", "svc:track:2"] {
            store(&h).add_item(PLAYLIST, id, new_item("Old")).unwrap();
            store(&h).complete_item(PLAYLIST, id, None, file_info("m", "c")).unwrap();
        }
        let before_1 = store(&h).item(PLAYLIST, "svc:track:1").unwrap();
        let before_2 = store(&h).item(PLAYLIST, "svc:track:2").unwrap();

        let report = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.completed, 1);
        assert!(report.failed.is_empty());
        assert_eq!(h.source.fetches(), 1);

        assert_eq!(store(&h).item(PLAYLIST, "svc:track:1").unwrap(), before_1);
        assert_eq!(store(&h).item(PLAYLIST, "svc:track:2").unwrap(), before_2);

        let new = store(&h).item(PLAYLIST, "svc:track:3").unwrap();
        assert!(new.success);
        assert_eq!(new.release_year, Some(2021));
        let info = new.file_info.unwrap();
        assert_eq!(info.media_bitrate, 320);
        assert_eq!(info.source_url, "https://covers.test/3.png");

        let media = h.dir.path().join("music/Mix/Song 3 - Mock Artist.mp3");
        assert_eq!(hash_file(&media).unwrap(), info.media_hash);
        let cover = h.dir.path().join("covers/svc_track_3.png");
        assert_eq!(hash_file(&cover).unwrap(), info.cover_hash);

        // Scratch space is cleaned up
        let leftovers = std::fs::read_dir(h.dir.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_second_sync_is_a_no_op() {
        let h = harness(&["1", "2"], RemovalPolicy::Keep);
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();

        let first = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(first.completed, 2);

        let second = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(second, SyncReport::default());
        assert_eq!(h.source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_failed_items_stay_placeholders() {
        let h = harness(&["1", "2", "3", "4"], RemovalPolicy::Keep);
        h.source.fail("2");
        h.source.panic_on("4");
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();

        let report = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed.len(), 2);

        let failed = store(&h).item(PLAYLIST, "svc:track:2").unwrap();
        assert!(!failed.success);
        assert!(failed.file_info.is_none());
        assert!(failed.last_error.unwrap().contains("mock download of 2 failed"));
        assert!(!store(&h).item(PLAYLIST, "svc:track:4").unwrap().success);
        assert!(store(&h).item(PLAYLIST, "svc:track:1").unwrap().success);

        // The failed ones are retried on the next sync
        h.source.failing.lock().clear();
        h.source.panicking.lock().clear();
        let retry = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(retry.scheduled, 2);
        assert_eq!(retry.completed, 2);
        assert_eq!(store(&h).item(PLAYLIST, "svc:track:2").unwrap().last_error, None);
    }

    #[tokio::test]
    async fn test_transcode_failure_leaves_no_partial_state() {
        let h = harness(&["1"], RemovalPolicy::Keep);
        h.transcoder.failing.lock().push("1.webm".to_string());
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();

        let report = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(!store(&h).item(PLAYLIST, "svc:track:1").unwrap().success);
        assert_eq!(h.transcoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let h = harness(&["1"], RemovalPolicy::Keep);
        let mut rx = h.service.progress().unwrap();
        assert!(h.service.progress().is_none());
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();

        h.service.sync_collection(PLAYLIST).await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.key.item_id, "svc:track:1");
            states.push(event.state);
        }
        assert_eq!(states.first(), Some(&JobState::Queued));
        assert!(states.contains(&JobState::Fetching { percent: Some(0.5) }));
        assert!(states.contains(&JobState::PostProcessing));
        assert_eq!(states.last(), Some(&JobState::Done));
    }

    #[tokio::test]
    async fn test_sync_errors() {
        let h = harness(&["1"], RemovalPolicy::Keep);
        assert!(matches!(
            h.service.sync_collection(PLAYLIST).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            h.service.sync_collection("svc:track:1").await,
            Err(Error::Validation(_))
        ));

        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
        h.source.reachable.store(false, Ordering::SeqCst);
        assert!(matches!(
            h.service.sync_collection(PLAYLIST).await,
            Err(Error::Network(_))
        ));
        assert_eq!(h.source.fetches(), 0);
    }

    #[tokio::test]
    async fn test_blacklisted_remote_items_are_skipped() {
        let h = harness(&["1", "2"], RemovalPolicy::Keep);
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
        store(&h).add_to_blacklist(PLAYLIST, "svc:track:2").unwrap();

        let report = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(report.added, 1);
        assert!(!store(&h).verify_path(PLAYLIST, Some("svc:track:2")));
    }

    #[tokio::test]
    async fn test_removal_policies() {
        for policy in [RemovalPolicy::Keep, RemovalPolicy::Blacklist, RemovalPolicy::Delete] {
            let h = harness(&["1", "2"], policy);
            store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
            h.service.sync_collection(PLAYLIST).await.unwrap();
            let media = h.dir.path().join("music/Mix/Song 2 - Mock Artist.mp3");
            assert!(media.exists());

            h.source.set_items(&["1"]);
            let report = h.service.sync_collection(PLAYLIST).await.unwrap();
            let still_there = store(&h).verify_path(PLAYLIST, Some("svc:track:2"));
            let blacklist = store(&h).blacklist(PLAYLIST).unwrap();

            match policy {
                RemovalPolicy::Keep => {
                    assert_eq!(report.removed, 0);
                    assert!(still_there);
                    assert!(media.exists());
                }
                RemovalPolicy::Blacklist => {
                    assert_eq!(report.removed, 1);
                    assert!(!still_there);
                    assert_eq!(blacklist, vec!["svc:track:2"]);
                    assert!(media.exists());
                }
                RemovalPolicy::Delete => {
                    assert_eq!(report.removed, 1);
                    assert!(!still_there);
                    assert!(blacklist.is_empty());
                    assert!(!media.exists());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_keep_policy_does_not_refetch_removed_placeholders() {
        let h = harness(&["1", "2"], RemovalPolicy::Keep);
        h.source.fail("2");
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
        let first = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(first.failed.len(), 1);
        let fetches = h.source.fetches();

        h.source.failing.lock().clear();
        h.source.set_items(&["1"]);
        let report = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.scheduled, 0);
        assert_eq!(h.source.fetches(), fetches);

        let kept = store(&h).item(PLAYLIST, "svc:track:2").unwrap();
        assert!(!kept.success);
        assert!(kept.file_info.is_none());
    }

    #[tokio::test]
    async fn test_same_title_items_get_distinct_files() {
        let h = harness(&["1", "2"], RemovalPolicy::Keep);
        h.source.retitle(&["1", "2"], "Intro");
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();

        let report = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(report.completed, 2);
        assert!(report.failed.is_empty());

        let folder = h.dir.path().join("music/Mix");
        let first = folder.join("Intro - Mock Artist.mp3");
        let second = folder.join("Intro - Mock Artist (2).mp3");
        let mut contents = vec![
            std::fs::read_to_string(&first).unwrap(),
            std::fs::read_to_string(&second).unwrap(),
        ];
        contents.sort();
        assert_eq!(contents, vec!["audio:1", "audio:2"]);

        let one = store(&h).item(PLAYLIST, "svc:track:1").unwrap().file_info.unwrap();
        let two = store(&h).item(PLAYLIST, "svc:track:2").unwrap().file_info.unwrap();
        assert_ne!(one.media_hash, two.media_hash);
        assert!(h.service.check_availability().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_delete_policy_spares_media_shared_with_kept_item() {
        let h = harness(&["1"], RemovalPolicy::Delete);
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
        let folder = h.dir.path().join("music/Mix");
        std::fs::create_dir_all(&folder).unwrap();
        let media = folder.join("Shared - Mock Artist.mp3");
        std::fs::write(&media, "audio:shared").unwrap();
        let digest = hash_file(&media).unwrap();
        for id in ["svc:track:1", "svc:track:2"] {
            store(&h).add_item(PLAYLIST, id, new_item("Shared")).unwrap();
            store(&h).complete_item(PLAYLIST, id, None, file_info(&digest, "c")).unwrap();
        }

        let report = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(!store(&h).verify_path(PLAYLIST, Some("svc:track:2")));
        assert!(store(&h).item(PLAYLIST, "svc:track:1").unwrap().success);
        assert!(media.exists());
    }

    #[test]
    fn test_undeletable_media_keeps_its_record() {
        let (store, _dir) = crate::test_utils::temp_store();
        store.add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
        let music = tempfile::tempdir().unwrap();

        // A non-empty directory where the file should be cannot be unlinked
        let stuck = music.path().join("Stuck.mp3");
        std::fs::create_dir_all(stuck.join("inner")).unwrap();
        let gone = music.path().join("Gone.mp3");
        std::fs::write(&gone, "audio:3").unwrap();

        let mut index = DigestIndex::new();
        index.insert("stuck".to_string(), stuck.clone());
        index.insert("gone".to_string(), gone.clone());
        store.add_item(PLAYLIST, "svc:track:2", new_item("Stuck")).unwrap();
        store.complete_item(PLAYLIST, "svc:track:2", None, file_info("stuck", "c")).unwrap();
        store.add_item(PLAYLIST, "svc:track:3", new_item("Gone")).unwrap();
        store.complete_item(PLAYLIST, "svc:track:3", None, file_info("gone", "c")).unwrap();
        let records = store.items(PLAYLIST).unwrap();

        let cache = CoverCache::new(music.path().join("covers"));
        let removed = remove_gone_items(
            &store,
            PLAYLIST,
            RemovalPolicy::Delete,
            &records,
            &index,
            &HashSet::new(),
            &cache,
        )
        .unwrap();

        assert_eq!(removed, 1);
        assert!(stuck.exists());
        assert!(store.verify_path(PLAYLIST, Some("svc:track:2")));
        assert!(!gone.exists());
        assert!(!store.verify_path(PLAYLIST, Some("svc:track:3")));
    }

    #[tokio::test]
    async fn test_check_and_requeue_refetches_missing_media() {
        let h = harness(&["1"], RemovalPolicy::Keep);
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
        h.service.sync_collection(PLAYLIST).await.unwrap();
        let covers_before = h.covers.calls();

        let media = h.dir.path().join("music/Mix/Song 1 - Mock Artist.mp3");
        std::fs::remove_file(&media).unwrap();

        let report = h.service.check_availability().await.unwrap();
        assert_eq!(report.flagged.len(), 1);
        assert_eq!(report.flagged[0].flags, IssueFlags::MEDIA_MISSING);
        assert_eq!(h.covers.calls(), covers_before);

        assert_eq!(h.service.requeue_missing(&report).unwrap(), 1);
        let resync = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(resync.completed, 1);
        assert!(media.exists());
        assert!(h.service.check_availability().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_sync_all_and_shutdown() {
        let h = harness(&["1"], RemovalPolicy::Keep);
        store(&h).add_collection(PLAYLIST, NewCollection::titled("Mix")).unwrap();
        store(&h).add_collection("svc:track:solo", NewCollection::titled("Solo")).unwrap();

        let results = h.service.sync_all().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, PLAYLIST);
        assert_eq!(results[0].1.as_ref().unwrap().completed, 1);

        h.service.shutdown();
        h.source.set_items(&["1", "2"]);
        let report = h.service.sync_collection(PLAYLIST).await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.scheduled, 0);
        assert!(h.service.sync_all().await.is_empty());
    }
}

//! The per-item job: fetch, post-process and record one track.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::SyncSettings;
use crate::catalog::CatalogStore;
use crate::error::{Error, Result};
use crate::health::hash_file;
use crate::jobs::{JobHandler, ProgressReporter, Task};
use crate::media::cover::CoverCache;
use crate::media::{TagData, Tagger, TranscodeRequest, Transcoder};
use crate::model::{CatalogId, Codec, FileInfo};
use crate::organizer::{TemplateFields, render_template, reserve_path, sanitize_filename};
use crate::remote::{CoverFetcher, FetchedItem, RemoteSource};

/// Per-item scratch directory.
///
/// Removed by [`ScratchDir::remove`]; if the job unwinds first, `Drop` hands
/// the removal to the blocking pool.
struct ScratchDir(Option<PathBuf>);

impl ScratchDir {
    fn create(parent: &Path, item_id: &str) -> Result<Self> {
        let dir = parent.join(sanitize_filename(&item_id.replace(':', "_")));
        std::fs::create_dir_all(&dir)?;
        Ok(Self(Some(dir)))
    }

    fn path(&self) -> &Path {
        self.0.as_deref().unwrap_or(Path::new(""))
    }

    async fn remove(mut self) {
        if let Some(dir) = self.0.take() {
            let _ = tokio::task::spawn_blocking(move || remove_scratch(&dir)).await;
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let Some(dir) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_scratch(&dir));
            }
            Err(_) => remove_scratch(&dir),
        }
    }
}

fn remove_scratch(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::debug!(target: "syncy::sync", dir = %dir.display(), error = %e, "Scratch dir not removed");
    }
}

/// [`JobHandler`] materializing one catalog item.
pub struct ItemJob {
    pub(super) store: Arc<CatalogStore>,
    pub(super) source: Arc<dyn RemoteSource>,
    pub(super) covers: Arc<dyn CoverFetcher>,
    pub(super) transcoder: Arc<dyn Transcoder>,
    pub(super) tagger: Arc<dyn Tagger>,
    pub(super) cache: Arc<CoverCache>,
    pub(super) settings: Arc<SyncSettings>,
}

#[async_trait]
impl JobHandler for ItemJob {
    async fn run(&self, task: Task, progress: ProgressReporter) -> Result<()> {
        let key = task.key.clone();
        match self.materialize(&task, &progress).await {
            Ok(()) => {
                tracing::info!(target: "syncy::sync", item = %key.item_id, "Item synced");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                let store = Arc::clone(&self.store);
                let (collection_id, item_id) = (key.collection_id.clone(), key.item_id.clone());
                let recorded = tokio::task::spawn_blocking(move || {
                    store.record_failure(&collection_id, &item_id, &reason)
                })
                .await;
                if let Ok(Err(rec)) | Err(rec) = recorded.map_err(Error::from) {
                    tracing::warn!(target: "syncy::sync", item = %key.item_id, error = %rec, "Could not record failure");
                }
                Err(Error::job(key.item_id, e))
            }
        }
    }
}

impl ItemJob {
    async fn materialize(&self, task: &Task, progress: &ProgressReporter) -> Result<()> {
        let collection_id = task.key.collection_id.clone();
        let item_id = task.key.item_id.clone();
        let remote: CatalogId = item_id.parse()?;

        let store = Arc::clone(&self.store);
        let temp_dir = self.settings.temp_dir.clone();
        let (c, i) = (collection_id.clone(), item_id.clone());
        let scratch = tokio::task::spawn_blocking(move || {
            // The item may have been removed since the task was queued
            if !store.verify_path(&c, Some(&i)) {
                return Err(Error::not_found(format!("item {i} in {c}")));
            }
            std::fs::create_dir_all(&temp_dir)?;
            ScratchDir::create(&temp_dir, &i)
        })
        .await??;

        let result = self
            .process(task, progress, &remote, &scratch, collection_id, item_id)
            .await;
        scratch.remove().await;
        result
    }

    async fn process(
        &self,
        task: &Task,
        progress: &ProgressReporter,
        remote: &CatalogId,
        scratch: &ScratchDir,
        collection_id: String,
        item_id: String,
    ) -> Result<()> {
        progress.fetching(None);
        let on_progress = |fraction: f32| progress.fetching(Some(fraction));
        let fetched = self
            .source
            .fetch_item(&remote.remote_id, scratch.path(), &on_progress)
            .await?;

        progress.post_processing();

        if fetched.cover_url.is_empty() {
            return Err(Error::validation(format!("no cover available for {item_id}")));
        }
        let cover_bytes = self.covers.fetch(&fetched.cover_url).await?;

        let cache = Arc::clone(&self.cache);
        let mode = self.settings.cover_mode;
        let cover_key = item_id.clone();
        let (cover_path, cover_hash) =
            tokio::task::spawn_blocking(move || cache.store(&cover_key, &cover_bytes, mode)).await??;

        let filename = {
            let fields = TemplateFields {
                title: &fetched.title,
                artists: &fetched.artists,
                album: &fetched.album,
                release_year: fetched.release_year,
                id: &remote.remote_id,
            };
            render_template(&self.settings.filename_template, &fields)
        };

        let transcoder = Arc::clone(&self.transcoder);
        let tagger = Arc::clone(&self.tagger);
        let settings = Arc::clone(&self.settings);
        let output_dir = task.output_dir.clone();
        let media = fetched.clone();
        let (output, bitrate, media_hash) = tokio::task::spawn_blocking(move || {
            post_process(
                transcoder.as_ref(),
                tagger.as_ref(),
                &settings,
                &media,
                &output_dir,
                &filename,
                &cover_path,
            )
        })
        .await??;

        let info = FileInfo {
            source_url: fetched.cover_url.clone(),
            cover_mode: self.settings.cover_mode,
            cover_hash,
            media_container: self.settings.codec,
            media_bitrate: bitrate,
            media_hash,
            length_seconds: fetched.duration_seconds,
        };

        let store = Arc::clone(&self.store);
        let release_year = fetched.release_year;
        let completed = tokio::task::spawn_blocking(move || {
            store.complete_item(&collection_id, &item_id, release_year, info)
        })
        .await?;

        if let Err(e) = completed {
            // Without a record the file would only collide with the retry
            let _ = tokio::task::spawn_blocking(move || std::fs::remove_file(output)).await;
            return Err(e);
        }
        Ok(())
    }
}

/// Transcode, tag, embed the cover, and hash the result.
///
/// On failure the reserved output is removed.
fn post_process(
    transcoder: &dyn Transcoder,
    tagger: &dyn Tagger,
    settings: &SyncSettings,
    fetched: &FetchedItem,
    output_dir: &Path,
    filename: &str,
    cover_path: &Path,
) -> Result<(PathBuf, u32, String)> {
    // The reserved file belongs to this job; concurrent jobs rendering the
    // same name get "(2)", "(3)", ...
    let reserved = reserve_path(output_dir, filename, settings.codec.container())?;
    let stem = reserved
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());

    let request = TranscodeRequest {
        input: fetched.media_path.clone(),
        output_dir: output_dir.to_path_buf(),
        filename: stem,
        codec: settings.codec,
        quality: settings.quality,
        overwrite: true,
    };
    let (output, bitrate) = match transcoder.transcode(&request) {
        Ok(done) => done,
        Err(e) => {
            let _ = std::fs::remove_file(&reserved);
            return Err(e);
        }
    };

    let finish = || -> Result<String> {
        let tags = TagData {
            title: fetched.title.clone(),
            artists: fetched.artists.clone(),
            album: fetched.album.clone(),
            release_year: fetched.release_year,
        };
        tagger.write_tags(&output, &tags)?;
        if settings.codec != Codec::Wav {
            tagger.embed_cover(&output, cover_path)?;
        }
        hash_file(&output)
    };

    match finish() {
        Ok(digest) => Ok((output, bitrate, digest)),
        Err(e) => {
            let _ = std::fs::remove_file(&output);
            Err(e)
        }
    }
}

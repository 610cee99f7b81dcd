//! Remote collaborators: playlist/track retrieval and cover downloads.
//!
//! The sync core only talks to these traits. Production code uses
//! [`YtDlpSource`] and [`HttpCoverFetcher`]; tests substitute the mocks in
//! [`mocks`].
//!
//! # Example
//!
//! ```ignore
//! use syncy::remote::{RemoteSource, YtDlpSource};
//!
//! let source = YtDlpSource::new(reachability_url);
//! let id = source.resolve_collection("https://www.youtube.com/playlist?list=PL123")?;
//! let remote = source.fetch_collection(&id.remote_id).await?;
//! ```

mod http;
mod ytdlp;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{Artists, CatalogId};

pub use http::{HttpCoverFetcher, check_url_reachable};
pub use ytdlp::YtDlpSource;

/// Callback receiving fractional download progress in `[0, 1]`.
pub type ProgressFn<'a> = &'a (dyn Fn(f32) + Send + Sync);

/// One entry of a remote playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    /// Service-local id (without the `<service>:track:` prefix)
    pub remote_id: String,
    pub title: String,
    pub artists: Artists,
    pub album: String,
    pub duration_seconds: u64,
    pub thumbnail: Option<String>,
}

/// Metadata and track list of a remote playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCollection {
    pub title: String,
    pub author: String,
    pub items: Vec<RemoteItem>,
}

/// Result of downloading one item into a temp directory.
#[derive(Debug, Clone)]
pub struct FetchedItem {
    pub title: String,
    pub artists: Artists,
    pub album: String,
    pub release_year: Option<i32>,
    pub duration_seconds: u64,
    pub cover_url: String,
    /// Downloaded, not yet transcoded media
    pub media_path: PathBuf,
}

/// Source of playlists and tracks for one service.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Service prefix used in catalog ids.
    fn service(&self) -> &str;

    /// Turn a user-supplied reference into a playlist id.
    ///
    /// The default accepts composite ids of this service only.
    fn resolve_collection(&self, remote_ref: &str) -> Result<CatalogId> {
        let id: CatalogId = remote_ref.trim().parse()?;
        if id.service != self.service() {
            return Err(Error::validation(format!(
                "'{remote_ref}' belongs to service '{}', not '{}'",
                id.service,
                self.service()
            )));
        }
        Ok(id)
    }

    /// Whether the service can be reached at all.
    async fn check_reachability(&self) -> bool;

    /// Fetch playlist metadata and its current track list.
    async fn fetch_collection(&self, remote_id: &str) -> Result<RemoteCollection>;

    /// Download one track into `temp_dir`.
    async fn fetch_item(
        &self,
        remote_item_id: &str,
        temp_dir: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<FetchedItem>;
}

/// Downloads cover images.
#[async_trait]
pub trait CoverFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

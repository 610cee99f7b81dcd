//! Core data models for the sync catalog.
//!
//! Defines the persisted entities: [`Catalog`], [`Collection`], [`ItemRecord`]
//! and [`FileInfo`], plus the composite identifier [`CatalogId`].
//!
//! # Document Shape
//!
//! The catalog serializes to one JSON object per managed root:
//! - `created_at` - when the catalog was first written
//! - `collections` - collection id -> collection
//! - `collections.<id>.items` - item id -> item record

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Ordered artist names; nearly every track has one or two.
pub type Artists = SmallVec<[String; 2]>;

/// What a [`CatalogId`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    /// A remote playlist, synced as a collection
    Playlist,
    /// A single remote track, stored as an item
    Track,
}

impl IdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playlist => "playlist",
            Self::Track => "track",
        }
    }
}

/// Composite identifier `<service>:<kind>:<remote-id>`.
///
/// The remote id is everything after the second `:`, so remote ids that
/// themselves contain colons survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogId {
    pub service: String,
    pub kind: IdKind,
    pub remote_id: String,
}

impl CatalogId {
    pub fn new(service: impl Into<String>, kind: IdKind, remote_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            kind,
            remote_id: remote_id.into(),
        }
    }

    pub fn playlist(service: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self::new(service, IdKind::Playlist, remote_id)
    }

    pub fn track(service: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self::new(service, IdKind::Track, remote_id)
    }

    /// Whether this id names something that can be synced as a collection.
    pub fn is_syncable(&self) -> bool {
        self.kind == IdKind::Playlist
    }

    /// Id of a track from the same service.
    pub fn child_track(&self, remote_item_id: &str) -> CatalogId {
        Self::track(self.service.clone(), remote_item_id)
    }
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.kind.as_str(), self.remote_id)
    }
}

impl FromStr for CatalogId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(service), Some(kind), Some(remote_id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::validation(format!(
                "'{s}' is not of the form <service>:<kind>:<remote-id>"
            )));
        };

        if service.is_empty() || remote_id.is_empty() {
            return Err(Error::validation(format!("'{s}' has an empty component")));
        }

        let kind = match kind {
            "playlist" => IdKind::Playlist,
            "track" => IdKind::Track,
            other => {
                return Err(Error::validation(format!("unknown id kind '{other}' in '{s}'")));
            }
        };

        Ok(Self::new(service, kind, remote_id))
    }
}

/// How cover art is made square before caching and embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverMode {
    /// Centre crop to the shorter side
    #[default]
    Crop,
    /// Pad to the longer side with the most vibrant colour of the image
    Extend,
    /// Resize without keeping the aspect ratio
    Stretch,
}

impl CoverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crop => "crop",
            Self::Extend => "extend",
            Self::Stretch => "stretch",
        }
    }
}

/// Target audio codec of the transcode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Mp3,
    Aac,
    Opus,
    Wav,
}

impl Codec {
    /// ffmpeg encoder name.
    pub fn encoder(&self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::Aac => "aac",
            Self::Opus => "libopus",
            Self::Wav => "pcm_s16le",
        }
    }

    /// File extension of the output container.
    pub fn container(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "m4a",
            Self::Opus => "ogg",
            Self::Wav => "wav",
        }
    }

    /// Highest bitrate the encoder is driven at, in kbit/s (`None` for PCM).
    pub fn max_bitrate(&self) -> Option<u32> {
        match self {
            Self::Mp3 => Some(320),
            Self::Aac | Self::Opus => Some(256),
            Self::Wav => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Opus => "opus",
            Self::Wav => "wav",
        }
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "aac" | "m4a" => Ok(Self::Aac),
            "opus" | "ogg" => Ok(Self::Opus),
            "wav" => Ok(Self::Wav),
            other => Err(Error::validation(format!("codec '{other}' is not supported"))),
        }
    }
}

/// Root document of one managed directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub collections: BTreeMap<String, Collection>,
}

impl Catalog {
    /// Empty catalog stamped with the current time.
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            collections: BTreeMap::new(),
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// A tracked remote playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub title: String,
    /// Filesystem-safe folder name under the download root
    pub folder_name: String,
    #[serde(default)]
    pub author: String,
    pub added_at: DateTime<Utc>,
    /// Item ids excluded from sync
    #[serde(default)]
    pub blacklist: BTreeSet<String>,
    #[serde(default)]
    pub items: BTreeMap<String, ItemRecord>,
}

/// Per-track state: identity, metadata and materialization status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub title: String,
    pub artists: Artists,
    pub album: String,
    pub release_year: Option<i32>,
    pub item_id: String,
    pub collection_id: String,
    /// True only once the artifact is transcoded, tagged and hashed
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    /// Reason of the most recent failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ItemRecord {
    /// Artists joined for display and tags.
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// Description of a materialized artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Where the cover was downloaded from
    pub source_url: String,
    pub cover_mode: CoverMode,
    /// SHA-256 of the cached cover image
    pub cover_hash: String,
    pub media_container: Codec,
    /// kbit/s
    pub media_bitrate: u32,
    /// SHA-256 of the transcoded media file
    pub media_hash: String,
    pub length_seconds: u64,
}

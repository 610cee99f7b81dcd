//! Local media processing: transcoding, tagging and cover normalization.
//!
//! Transcoding and tag writing sit behind the blocking [`Transcoder`] and
//! [`Tagger`] traits so tests can run without ffmpeg or real audio files.
//! Cover normalization in [`cover`] is plain image processing and has no
//! trait.

pub mod cover;
mod tags;
mod transcode;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::{Artists, Codec};

pub use tags::LoftyTagger;
pub use transcode::FfmpegTranscoder;

/// Lowest bitrate ever requested from an encoder (kbit/s).
pub const MIN_BITRATE: u32 = 32;

/// Bitrate for `codec` at `quality` (clamped to 1..=10).
///
/// `max(32, quality * max / 10)`; PCM codecs report 0.
pub fn bitrate_for(codec: Codec, quality: u8) -> u32 {
    let quality = u32::from(quality.clamp(1, 10));
    match codec.max_bitrate() {
        Some(max) => (quality * max / 10).max(MIN_BITRATE),
        None => 0,
    }
}

/// One transcode job.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Output file name without extension
    pub filename: String,
    pub codec: Codec,
    /// 1..=10
    pub quality: u8,
    pub overwrite: bool,
}

impl TranscodeRequest {
    /// Where the output will be written.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.filename, self.codec.container()))
    }
}

/// Converts downloaded media into the configured codec.
pub trait Transcoder: Send + Sync {
    /// Returns the output path and the bitrate actually used (kbit/s).
    fn transcode(&self, request: &TranscodeRequest) -> Result<(PathBuf, u32)>;
}

/// Metadata written into a finished file.
#[derive(Debug, Clone, PartialEq)]
pub struct TagData {
    pub title: String,
    pub artists: Artists,
    pub album: String,
    pub release_year: Option<i32>,
}

/// Reads and writes embedded metadata.
pub trait Tagger: Send + Sync {
    fn write_tags(&self, path: &Path, tags: &TagData) -> Result<()>;

    /// Replace the front cover with the image at `cover`.
    fn embed_cover(&self, path: &Path, cover: &Path) -> Result<()>;

    /// Front cover bytes, if the file carries one.
    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>>;
}

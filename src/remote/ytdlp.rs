//! `yt-dlp` backed remote source for YouTube (Music) playlists.
//!
//! Runs the `yt-dlp` executable, reads its JSON output and forwards its
//! progress lines to the caller. Only the process plumbing lives here; the
//! downloader itself is an external tool.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::http::check_url_reachable;
use super::{FetchedItem, ProgressFn, RemoteCollection, RemoteItem, RemoteSource};
use crate::error::{Error, Result};
use crate::model::{Artists, CatalogId};

const SERVICE: &str = "youtube";
const PROGRESS_PREFIX: &str = "[progress]";
const PROGRESS_TEMPLATE: &str = "download:[progress] %(progress.downloaded_bytes)s/%(progress.total_bytes,progress.total_bytes_estimate)s";

/// Remote source driving the `yt-dlp` command line tool.
pub struct YtDlpSource {
    program: PathBuf,
    reachability_url: String,
    http_client: reqwest::Client,
}

impl YtDlpSource {
    pub fn new(reachability_url: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            reachability_url: reachability_url.into(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Use a specific `yt-dlp` binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl RemoteSource for YtDlpSource {
    fn service(&self) -> &str {
        SERVICE
    }

    fn resolve_collection(&self, remote_ref: &str) -> Result<CatalogId> {
        let remote_ref = remote_ref.trim();
        if remote_ref.starts_with("http://") || remote_ref.starts_with("https://") {
            let list = playlist_id_from_url(remote_ref).ok_or_else(|| {
                Error::validation(format!("'{remote_ref}' does not name a playlist"))
            })?;
            return Ok(CatalogId::playlist(SERVICE, list));
        }

        let id: CatalogId = remote_ref.parse()?;
        if id.service != SERVICE {
            return Err(Error::validation(format!(
                "'{remote_ref}' is not a {SERVICE} id"
            )));
        }
        Ok(id)
    }

    async fn check_reachability(&self) -> bool {
        check_url_reachable(&self.http_client, &self.reachability_url).await
    }

    async fn fetch_collection(&self, remote_id: &str) -> Result<RemoteCollection> {
        let url = format!("https://music.youtube.com/playlist?list={remote_id}");
        let args = vec!["--flat-playlist".to_string(), "-J".to_string(), url];
        let program = self.program.clone();

        tracing::debug!(target: "syncy::remote", playlist = remote_id, "Fetching playlist");
        let stdout = tokio::task::spawn_blocking(move || run_to_string(&program, &args)).await??;
        parse_playlist(&stdout)
    }

    async fn fetch_item(
        &self,
        remote_item_id: &str,
        temp_dir: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<FetchedItem> {
        if !temp_dir.is_dir() {
            return Err(Error::missing_file(temp_dir));
        }

        let output = temp_dir.join("%(id)s.%(ext)s");
        let args = vec![
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "-O".to_string(),
            "after_move:%()j".to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            format!("https://music.youtube.com/watch?v={remote_item_id}"),
        ];
        let program = self.program.clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_blocking(move || run_with_progress(&program, &args, tx));

        // Ends once the blocking side drops its sender
        while let Some(fraction) = rx.recv().await {
            on_progress(fraction);
        }
        let info_line = handle.await??;

        let info: VideoInfo = serde_json::from_str(&info_line)
            .map_err(|e| Error::validation(format!("unexpected yt-dlp output: {e}")))?;
        let media_path = info
            .media_path()
            .ok_or_else(|| Error::not_found(format!("downloaded file for {remote_item_id}")))?;
        Ok(info.into_fetched(media_path))
    }
}

/// Extract the `list=` parameter of a playlist URL.
fn playlist_id_from_url(url: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "list")
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Parse one `[progress] downloaded/total` line into a fraction.
fn parse_progress_line(line: &str) -> Option<f32> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?.trim();
    let (done, total) = rest.split_once('/')?;
    let done: f64 = done.trim().parse().ok()?;
    let total: f64 = total.trim().parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some((done / total).clamp(0.0, 1.0) as f32)
}

/// Map yt-dlp's error text to the error taxonomy.
fn classify_failure(stderr: &str) -> Error {
    let lower = stderr.to_lowercase();
    let message = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .unwrap_or(stderr)
        .trim()
        .to_string();

    if lower.contains("private") || lower.contains("sign in") || lower.contains("members-only") {
        Error::unreachable(message)
    } else if lower.contains("does not exist") || lower.contains("video unavailable") {
        Error::not_found(message)
    } else {
        Error::network(message)
    }
}

fn spawn(program: &Path, args: &[String]) -> Result<std::process::Child> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found(format!(
                "{} executable (is it installed and on PATH?)",
                program.display()
            )),
            _ => Error::Io(e),
        })
}

fn run_to_string(program: &Path, args: &[String]) -> Result<String> {
    let output = spawn(program, args)?.wait_with_output()?;
    if !output.status.success() {
        return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run yt-dlp, forwarding progress lines and returning the final JSON line.
fn run_with_progress(
    program: &Path,
    args: &[String],
    progress: mpsc::UnboundedSender<f32>,
) -> Result<String> {
    let mut child = spawn(program, args)?;
    let mut info_line = None;

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            let line = line?;
            if let Some(fraction) = parse_progress_line(&line) {
                let _ = progress.send(fraction);
            } else if line.trim_start().starts_with('{') {
                info_line = Some(line);
            }
        }
    }

    let mut stderr = String::new();
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }

    let status = child.wait()?;
    if !status.success() {
        return Err(classify_failure(&stderr));
    }
    info_line.ok_or_else(|| Error::validation("yt-dlp finished without printing track info"))
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RequestedDownload {
    filepath: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: String,
    title: Option<String>,
    artists: Option<Vec<String>>,
    artist: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    album: Option<String>,
    release_year: Option<i32>,
    upload_date: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
    filepath: Option<PathBuf>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
}

impl VideoInfo {
    fn media_path(&self) -> Option<PathBuf> {
        self.filepath.clone().or_else(|| {
            self.requested_downloads
                .iter()
                .find_map(|d| d.filepath.clone())
        })
    }

    fn artists(&self) -> Artists {
        if let Some(list) = self.artists.as_ref().filter(|l| !l.is_empty()) {
            return list.iter().cloned().collect();
        }
        let single = self
            .artist
            .clone()
            .or_else(|| self.uploader.clone())
            .or_else(|| self.channel.clone())
            .unwrap_or_else(|| "Unknown Artist".to_string());
        Artists::from_vec(vec![single])
    }

    fn release_year(&self) -> Option<i32> {
        self.release_year.or_else(|| {
            self.upload_date
                .as_deref()
                .and_then(|d| d.get(..4))
                .and_then(|y| y.parse().ok())
        })
    }

    /// Largest square thumbnail, else the default one.
    fn cover_url(&self) -> Option<String> {
        self.thumbnails
            .iter()
            .filter(|t| t.width.is_some() && t.width == t.height)
            .max_by_key(|t| t.width)
            .map(|t| t.url.clone())
            .or_else(|| self.thumbnail.clone())
            .or_else(|| self.thumbnails.last().map(|t| t.url.clone()))
    }

    fn into_fetched(self, media_path: PathBuf) -> FetchedItem {
        FetchedItem {
            artists: self.artists(),
            release_year: self.release_year(),
            cover_url: self.cover_url().unwrap_or_default(),
            duration_seconds: self.duration.map(|d| d.round() as u64).unwrap_or(200),
            title: self.title.unwrap_or_else(|| "Unknown Title".to_string()),
            album: self.album.unwrap_or_else(|| "Unknown Album".to_string()),
            media_path,
        }
    }

    fn into_remote_item(self) -> RemoteItem {
        RemoteItem {
            artists: self.artists(),
            thumbnail: self.cover_url(),
            duration_seconds: self.duration.map(|d| d.round() as u64).unwrap_or(0),
            title: self.title.unwrap_or_else(|| "Unknown Title".to_string()),
            album: self.album.unwrap_or_else(|| "Unknown Album".to_string()),
            remote_id: self.id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistInfo {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    #[serde(default)]
    entries: Vec<Option<VideoInfo>>,
}

fn parse_playlist(json: &str) -> Result<RemoteCollection> {
    let info: PlaylistInfo = serde_json::from_str(json)
        .map_err(|e| Error::validation(format!("unexpected yt-dlp playlist output: {e}")))?;

    Ok(RemoteCollection {
        title: info.title.unwrap_or_else(|| "Unknown Title".to_string()),
        author: info.uploader.or(info.channel).unwrap_or_default(),
        // Deleted videos show up as null entries
        items: info
            .entries
            .into_iter()
            .flatten()
            .map(VideoInfo::into_remote_item)
            .collect(),
    })
}

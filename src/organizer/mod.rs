//! File naming and collection folder layout.
//!
//! Turns item metadata into a filename with a `$field$` template like
//! `$title$ - $artist$`, keeps names filesystem-safe, and manages the
//! per-collection folder with its hidden identity marker.
//!
//! # Features
//! - Template rendering with unknown fields rendering empty
//! - Sanitizing that strips characters invalid on common filesystems
//! - Collision-free output names inside a collection folder
//! - Identity marker so moved/renamed folders are still recognized

use crate::error::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Hidden file inside every collection folder naming the collection it holds.
pub const MARKER_FILE: &str = ".syncy-collection";

/// Contents of the identity marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMarker {
    pub collection_id: String,
}

/// Values available to a filename template.
#[derive(Debug, Clone, Default)]
pub struct TemplateFields<'a> {
    pub title: &'a str,
    pub artists: &'a [String],
    pub album: &'a str,
    pub release_year: Option<i32>,
    /// Remote item id, also the fallback name
    pub id: &'a str,
}

impl TemplateFields<'_> {
    fn lookup(&self, field: &str) -> String {
        match field {
            "title" => self.title.to_string(),
            "artist" => self.artists.first().cloned().unwrap_or_default(),
            "artists" => self.artists.join(", "),
            "album" => self.album.to_string(),
            "release" | "release_year" => {
                self.release_year.map(|y| y.to_string()).unwrap_or_default()
            }
            "id" => self.id.to_string(),
            _ => String::new(),
        }
    }
}

/// Render `template`, replacing each `$field$` with its value.
///
/// A `$` without a closing partner is kept literally. The result is
/// sanitized and trimmed; if nothing is left the remote id is used.
pub fn render_template(template: &str, fields: &TemplateFields<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('$') {
            Some(end) => {
                out.push_str(&fields.lookup(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    let name = sanitize_filename(&out);
    if name.is_empty() {
        sanitize_filename(fields.id)
    } else {
        name
    }
}

/// Strip characters that are invalid in filenames, then trim whitespace.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '\''))
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Claim the first free `<stem>.<ext>` (then `<stem> (2).<ext>`, ...) in `dir`.
///
/// The name is taken by creating an empty file with `create_new`, so two
/// callers racing for the same stem always end up with different paths. The
/// caller owns the returned file and must remove it if it gives up.
pub fn reserve_path(dir: &Path, stem: &str, ext: &str) -> Result<PathBuf> {
    let candidates = std::iter::once(format!("{stem}.{ext}"))
        .chain((2u32..).map(|n| format!("{stem} ({n}).{ext}")));

    for name in candidates {
        let path = dir.join(name);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::Io(e).context(format!("reserving {}", path.display()))),
        }
    }
    Err(Error::already_exists(format!("{stem}.{ext} in {}", dir.display())))
}

/// Create `<root>/<folder_name>` and make sure its marker names `collection_id`.
pub fn ensure_collection_folder(root: &Path, folder_name: &str, collection_id: &str) -> Result<PathBuf> {
    let folder = sanitize_filename(folder_name);
    if folder.is_empty() {
        return Err(Error::validation(format!(
            "collection {collection_id} has no usable folder name"
        )));
    }

    let dir = root.join(folder);
    fs::create_dir_all(&dir).with_context(format!("creating {}", dir.display()))?;

    if read_marker(&dir).as_deref() != Some(collection_id) {
        write_marker(&dir, collection_id)?;
    }
    Ok(dir)
}

/// Write the identity marker into `dir`.
pub fn write_marker(dir: &Path, collection_id: &str) -> Result<()> {
    let marker = CollectionMarker {
        collection_id: collection_id.to_string(),
    };
    let json = serde_json::to_string_pretty(&marker)?;
    fs::write(dir.join(MARKER_FILE), json)
        .with_context(format!("writing marker in {}", dir.display()))
}

/// Collection id declared by the marker in `dir`, if any.
pub fn read_marker(dir: &Path) -> Option<String> {
    let text = fs::read_to_string(dir.join(MARKER_FILE)).ok()?;
    match serde_json::from_str::<CollectionMarker>(&text) {
        Ok(marker) => Some(marker.collection_id),
        Err(e) => {
            tracing::warn!(
                target: "syncy::organizer",
                dir = %dir.display(),
                error = %e,
                "Ignoring unreadable collection marker"
            );
            None
        }
    }
}

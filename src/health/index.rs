//! Digest indexes over artifact directories.
//!
//! An index maps content digest to the path currently holding that content.
//! Lookups by digest instead of by path make availability checks immune to
//! renames and moves within the indexed scope.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use walkdir::WalkDir;

use super::hash::hash_file;
use crate::error::Result;
use crate::organizer::{MARKER_FILE, read_marker};

/// Digest -> path.
pub type DigestIndex = HashMap<String, PathBuf>;

/// Collection id -> digest index of the media files in its folder(s).
pub type LibraryIndex = HashMap<String, DigestIndex>;

/// Index the regular files directly inside `dir` (not recursive).
///
/// A missing directory yields an empty index.
pub fn build_index(dir: &Path) -> Result<DigestIndex> {
    if !dir.is_dir() {
        tracing::debug!(target: "syncy::health", dir = %dir.display(), "Index directory missing");
        return Ok(DigestIndex::new());
    }

    let files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();

    Ok(hash_all(files).collect())
}

/// Index every collection folder under `root` that carries an identity marker.
///
/// Keys are the collection ids declared by the markers, so a renamed folder
/// still indexes under its collection. Two folders declaring the same id are
/// merged.
pub fn build_library_index(root: &Path) -> Result<LibraryIndex> {
    let mut index = LibraryIndex::new();
    if !root.is_dir() {
        return Ok(index);
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(root)?.filter_map(|e| e.ok()) {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(collection_id) = read_marker(&dir) else {
            continue;
        };

        index.entry(collection_id.clone()).or_default();
        files.extend(
            WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && e.file_name() != MARKER_FILE)
                .map(|e| (collection_id.clone(), e.into_path())),
        );
    }

    let hashed: Vec<(String, String, PathBuf)> = files
        .into_par_iter()
        .filter_map(|(collection_id, path)| match hash_file(&path) {
            Ok(digest) => Some((collection_id, digest, path)),
            Err(e) => {
                tracing::warn!(target: "syncy::health", path = %path.display(), error = %e, "Skipping unreadable file");
                None
            }
        })
        .collect();

    for (collection_id, digest, path) in hashed {
        index.entry(collection_id).or_default().insert(digest, path);
    }

    tracing::debug!(target: "syncy::health", collections = index.len(), "Built library index");
    Ok(index)
}

fn hash_all(files: Vec<PathBuf>) -> impl Iterator<Item = (String, PathBuf)> {
    files
        .into_par_iter()
        .filter_map(|path| match hash_file(&path) {
            Ok(digest) => Some((digest, path)),
            Err(e) => {
                tracing::warn!(target: "syncy::health", path = %path.display(), error = %e, "Skipping unreadable file");
                None
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
}

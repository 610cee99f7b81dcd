//! Test utilities and fixtures for syncy tests.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{temp_store, new_item};
//!
//! #[test]
//! fn test_something() {
//!     let (store, _dir) = temp_store();
//!     store.add_item("svc:playlist:X", "svc:track:1", new_item("One")).unwrap();
//! }
//! ```

use tempfile::TempDir;

use crate::catalog::{CatalogStore, NewItem};
use crate::model::{Artists, Codec, CoverMode, FileInfo};

/// Creates a catalog store rooted in a fresh temporary directory.
///
/// Keep the `TempDir` alive for the duration of your test; the catalog and
/// everything next to it are deleted when it is dropped.
pub fn temp_store() -> (CatalogStore, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = CatalogStore::open(dir.path()).expect("Failed to open catalog");
    (store, dir)
}

/// Placeholder metadata with sensible defaults.
pub fn new_item(title: &str) -> NewItem {
    NewItem {
        title: title.to_string(),
        artists: Artists::from_vec(vec!["Test Artist".to_string()]),
        album: "Test Album".to_string(),
        release_year: None,
    }
}

/// Completed-item details carrying the given digests.
pub fn file_info(media_hash: &str, cover_hash: &str) -> FileInfo {
    FileInfo {
        source_url: "https://covers.test/cover.png".to_string(),
        cover_mode: CoverMode::Crop,
        cover_hash: cover_hash.to_string(),
        media_container: Codec::Mp3,
        media_bitrate: 320,
        media_hash: media_hash.to_string(),
        length_seconds: 180,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_store_starts_empty() {
        let (store, dir) = temp_store();
        assert!(store.is_initialized());
        assert!(store.collection_ids().is_empty());
        assert!(store.path().starts_with(dir.path()));
    }

    #[test]
    fn test_new_item_defaults() {
        let item = new_item("One");
        assert_eq!(item.title, "One");
        assert_eq!(item.artists.as_slice(), ["Test Artist".to_string()]);
        assert_eq!(item.release_year, None);
    }
}

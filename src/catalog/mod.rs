//! Persistent catalog store.
//!
//! One JSON document per managed root (`<root>/library.json`) records every
//! collection and item the sync has seen. The store keeps the typed
//! [`Catalog`] in memory behind a single [`RwLock`] and rewrites the whole
//! document atomically after every mutation.
//!
//! # Guarantees
//!
//! - Mutations hold the write lock across read-modify-write *and* the file
//!   rewrite, so concurrent workers never lose an update.
//! - A mutation is applied to a copy first; if saving fails, neither memory nor
//!   disk changes.
//! - A corrupted document is never overwritten: the store opens from the
//!   `.backup` sibling, or opens uninitialized and refuses to save.
//! - Every successful load mirrors the document to `library.json.backup`.
//!
//! # Example
//!
//! ```ignore
//! let store = CatalogStore::open(&download_root)?;
//! store.add_collection("youtube:playlist:PL1", NewCollection::titled("Road trip"))?;
//! store.add_item("youtube:playlist:PL1", "youtube:track:abc", new_item)?;
//! ```

pub mod migrate;
pub mod path;
pub mod persist;

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{Artists, Catalog, Collection, FileInfo, ItemRecord};
use crate::organizer::sanitize_filename;

/// File name of the catalog inside a managed root.
pub const CATALOG_FILE: &str = "library.json";

/// Data for a new collection.
#[derive(Debug, Clone, Default)]
pub struct NewCollection {
    pub title: String,
    pub author: String,
}

impl NewCollection {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: String::new(),
        }
    }
}

/// Editable collection fields. `items` and `blacklist` have their own operations.
#[derive(Debug, Clone, Default)]
pub struct CollectionUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub folder_name: Option<String>,
}

/// Metadata of a placeholder item.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub title: String,
    pub artists: Artists,
    pub album: String,
    pub release_year: Option<i32>,
}

/// How the document was obtained when the store opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No document existed; a fresh one was written
    Created,
    /// The primary document loaded cleanly
    Loaded,
    /// The primary was corrupted; the backup was used instead
    RecoveredFromBackup(String),
    /// Neither primary nor backup could be read; saving is refused
    Failed(String),
}

/// Thread-safe handle to the catalog document of one managed root.
pub struct CatalogStore {
    path: PathBuf,
    backup_path: PathBuf,
    doc: RwLock<Option<Catalog>>,
    outcome: LoadOutcome,
}

impl CatalogStore {
    /// Open (or create) the catalog inside `root`.
    ///
    /// `root` must already exist. A corrupted document does not fail the
    /// open; inspect [`CatalogStore::load_outcome`] to see what happened.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::missing_file(root));
        }

        let path = root.join(CATALOG_FILE);
        let backup_path = persist::backup_path_for(&path);

        if !path.exists() {
            let catalog = Catalog::new();
            persist::write_document(&path, &serde_json::to_value(&catalog)?)?;
            mirror_backup(&backup_path, &catalog);
            tracing::info!(target: "syncy::catalog", path = %path.display(), "Created new catalog");
            return Ok(Self {
                path,
                backup_path,
                doc: RwLock::new(Some(catalog)),
                outcome: LoadOutcome::Created,
            });
        }

        let (doc, outcome) = match load_document(&path) {
            Ok(catalog) => {
                mirror_backup(&backup_path, &catalog);
                tracing::info!(
                    target: "syncy::catalog",
                    path = %path.display(),
                    collections = catalog.collections.len(),
                    "Loaded catalog"
                );
                (Some(catalog), LoadOutcome::Loaded)
            }
            Err(primary) => {
                tracing::warn!(
                    target: "syncy::catalog",
                    error = %primary,
                    "Catalog corrupted, attempting fallback to backup"
                );
                match load_document(&backup_path) {
                    Ok(catalog) => {
                        tracing::warn!(
                            target: "syncy::catalog",
                            backup = %backup_path.display(),
                            "Opened catalog from backup; changes since the backup are lost"
                        );
                        (Some(catalog), LoadOutcome::RecoveredFromBackup(primary.to_string()))
                    }
                    Err(backup) => {
                        tracing::error!(
                            target: "syncy::catalog",
                            error = %backup,
                            "Backup unusable too; catalog opened read-only"
                        );
                        (None, LoadOutcome::Failed(primary.to_string()))
                    }
                }
            }
        };

        Ok(Self {
            path,
            backup_path,
            doc: RwLock::new(doc),
            outcome,
        })
    }

    /// Path of the primary document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the backup document.
    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.outcome
    }

    /// Whether an in-memory document exists (and saving is allowed).
    pub fn is_initialized(&self) -> bool {
        self.doc.read().is_some()
    }

    /// Re-read the document from disk, replacing the in-memory copy.
    ///
    /// On failure the previous in-memory state is kept and the error returned.
    pub fn reload(&self) -> Result<()> {
        let mut guard = self.doc.write();
        match load_document(&self.path) {
            Ok(catalog) => {
                mirror_backup(&self.backup_path, &catalog);
                *guard = Some(catalog);
                tracing::debug!(target: "syncy::catalog", "Reloaded catalog");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(target: "syncy::catalog", error = %e, "Reload failed, keeping previous state");
                Err(e)
            }
        }
    }

    /// Rewrite the document on disk from memory.
    pub fn save(&self) -> Result<()> {
        let guard = self.doc.write();
        match guard.as_ref() {
            Some(catalog) => self.persist(catalog),
            None => Err(self.refuse_save()),
        }
    }

    /// Snapshot of the whole document.
    pub fn snapshot(&self) -> Catalog {
        self.read(|catalog| Ok(catalog.clone()))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Path-addressed access
    // ------------------------------------------------------------------

    /// Value at `path`, or `default` when any level is missing.
    pub fn get_path(&self, path: &[&str], default: Value) -> Value {
        self.read(|catalog| {
            let doc = serde_json::to_value(catalog)?;
            Ok(path::get_or(&doc, path, default.clone()))
        })
        .unwrap_or(default)
    }

    /// Store `value` at `path`, creating intermediate objects.
    ///
    /// The result must still be a valid catalog; otherwise the write is
    /// rejected with [`Error::Validation`] and nothing changes.
    pub fn set_path(&self, path: &[&str], value: Value) -> Result<()> {
        self.mutate(|catalog| {
            let mut doc = serde_json::to_value(&*catalog)?;
            path::set(&mut doc, path, value)?;
            *catalog = revalidate(doc, path)?;
            Ok(())
        })
    }

    /// Remove the value at `path`. Missing paths are a no-op.
    pub fn delete_path(&self, path: &[&str]) -> Result<()> {
        let present = self.read(|catalog| {
            let doc = serde_json::to_value(catalog)?;
            Ok(path::get(&doc, path).is_some())
        })?;
        if !present {
            return Ok(());
        }

        self.mutate(|catalog| {
            let mut doc = serde_json::to_value(&*catalog)?;
            path::delete(&mut doc, path);
            *catalog = revalidate(doc, path)?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Existence checks
    // ------------------------------------------------------------------

    /// Whether the collection (and, if given, the item inside it) exists.
    pub fn verify_path(&self, collection_id: &str, item_id: Option<&str>) -> bool {
        let guard = self.doc.read();
        let Some(collection) = guard.as_ref().and_then(|c| c.collections.get(collection_id))
        else {
            return false;
        };
        item_id.is_none_or(|item| collection.items.contains_key(item))
    }

    fn require(&self, collection_id: &str, item_id: Option<&str>) -> Result<()> {
        if self.verify_path(collection_id, item_id) {
            return Ok(());
        }
        Err(match item_id {
            Some(item) => Error::not_found(format!("item {item} in collection {collection_id}")),
            None => Error::not_found(format!("collection {collection_id}")),
        })
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    pub fn collection_ids(&self) -> Vec<String> {
        self.read(|catalog| Ok(catalog.collections.keys().cloned().collect()))
            .unwrap_or_default()
    }

    pub fn collection(&self, collection_id: &str) -> Result<Collection> {
        self.read(|catalog| collection_ref(catalog, collection_id).cloned())
    }

    /// Register a new, empty collection.
    pub fn add_collection(&self, collection_id: &str, data: NewCollection) -> Result<Collection> {
        if self.verify_path(collection_id, None) {
            return Err(Error::already_exists(format!("collection {collection_id}")));
        }
        if data.title.trim().is_empty() {
            return Err(Error::validation("collection title is required"));
        }

        let collection = Collection {
            folder_name: sanitize_filename(&data.title),
            title: data.title,
            author: data.author,
            added_at: Utc::now(),
            blacklist: Default::default(),
            items: Default::default(),
        };

        self.mutate(|catalog| {
            // Re-checked under the write lock
            if catalog.collections.contains_key(collection_id) {
                return Err(Error::already_exists(format!("collection {collection_id}")));
            }
            catalog
                .collections
                .insert(collection_id.to_string(), collection.clone());
            Ok(())
        })?;

        tracing::info!(target: "syncy::catalog", collection = collection_id, "Added collection");
        Ok(collection)
    }

    pub fn update_collection(&self, collection_id: &str, update: CollectionUpdate) -> Result<()> {
        self.require(collection_id, None)?;
        self.mutate(|catalog| {
            let collection = collection_mut(catalog, collection_id)?;
            if let Some(title) = update.title {
                collection.title = title;
            }
            if let Some(author) = update.author {
                collection.author = author;
            }
            if let Some(folder) = update.folder_name {
                collection.folder_name = sanitize_filename(&folder);
            }
            Ok(())
        })
    }

    pub fn delete_collection(&self, collection_id: &str) -> Result<()> {
        self.require(collection_id, None)?;
        self.mutate(|catalog| {
            catalog.collections.remove(collection_id);
            Ok(())
        })?;
        tracing::info!(target: "syncy::catalog", collection = collection_id, "Deleted collection");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    pub fn item_ids(&self, collection_id: &str) -> Result<Vec<String>> {
        self.read(|catalog| Ok(collection_ref(catalog, collection_id)?.items.keys().cloned().collect()))
    }

    pub fn items(&self, collection_id: &str) -> Result<Vec<ItemRecord>> {
        self.read(|catalog| {
            Ok(collection_ref(catalog, collection_id)?
                .items
                .values()
                .cloned()
                .collect())
        })
    }

    pub fn item(&self, collection_id: &str, item_id: &str) -> Result<ItemRecord> {
        self.read(|catalog| {
            collection_ref(catalog, collection_id)?
                .items
                .get(item_id)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("item {item_id} in collection {collection_id}")))
        })
    }

    /// Register a placeholder (`success=false`) item.
    pub fn add_item(&self, collection_id: &str, item_id: &str, data: NewItem) -> Result<()> {
        self.require(collection_id, None)?;
        if data.title.trim().is_empty() || data.album.trim().is_empty() || data.artists.is_empty()
        {
            return Err(Error::validation(format!(
                "item {item_id} needs a title, album and at least one artist"
            )));
        }

        self.mutate(|catalog| {
            let collection = collection_mut(catalog, collection_id)?;
            if collection.items.contains_key(item_id) {
                return Err(Error::already_exists(format!("item {item_id} in {collection_id}")));
            }
            if collection.blacklist.contains(item_id) {
                return Err(Error::validation(format!("item {item_id} is blacklisted")));
            }
            collection.items.insert(
                item_id.to_string(),
                ItemRecord {
                    title: data.title,
                    artists: data.artists,
                    album: data.album,
                    release_year: data.release_year,
                    item_id: item_id.to_string(),
                    collection_id: collection_id.to_string(),
                    success: false,
                    file_info: None,
                    last_error: None,
                },
            );
            Ok(())
        })
    }

    /// Mark an item as fully materialized.
    pub fn complete_item(
        &self,
        collection_id: &str,
        item_id: &str,
        release_year: Option<i32>,
        file_info: FileInfo,
    ) -> Result<()> {
        self.require(collection_id, Some(item_id))?;
        if file_info.media_hash.is_empty() || file_info.cover_hash.is_empty() {
            return Err(Error::validation(format!(
                "item {item_id} cannot complete without media and cover digests"
            )));
        }

        self.mutate(|catalog| {
            let item = item_mut(catalog, collection_id, item_id)?;
            if release_year.is_some() {
                item.release_year = release_year;
            }
            item.success = true;
            item.file_info = Some(file_info);
            item.last_error = None;
            Ok(())
        })
    }

    /// Remember why the last attempt for an item failed.
    pub fn record_failure(&self, collection_id: &str, item_id: &str, reason: &str) -> Result<()> {
        self.require(collection_id, Some(item_id))?;
        self.mutate(|catalog| {
            let item = item_mut(catalog, collection_id, item_id)?;
            item.last_error = Some(reason.to_string());
            Ok(())
        })
    }

    /// Return an item to placeholder state so the next sync fetches it again.
    pub fn reset_item(&self, collection_id: &str, item_id: &str) -> Result<()> {
        self.require(collection_id, Some(item_id))?;
        self.mutate(|catalog| {
            let item = item_mut(catalog, collection_id, item_id)?;
            item.success = false;
            item.file_info = None;
            Ok(())
        })
    }

    /// Point a completed item at a freshly cached cover.
    pub fn set_cover_hash(&self, collection_id: &str, item_id: &str, digest: &str) -> Result<()> {
        self.require(collection_id, Some(item_id))?;
        if digest.is_empty() {
            return Err(Error::validation("cover digest is empty"));
        }
        self.mutate(|catalog| {
            let item = item_mut(catalog, collection_id, item_id)?;
            let info = item.file_info.as_mut().ok_or_else(|| {
                Error::validation(format!("item {item_id} has not been materialized"))
            })?;
            info.cover_hash = digest.to_string();
            Ok(())
        })
    }

    pub fn delete_item(&self, collection_id: &str, item_id: &str) -> Result<()> {
        self.require(collection_id, Some(item_id))?;
        self.mutate(|catalog| {
            collection_mut(catalog, collection_id)?.items.remove(item_id);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Blacklist
    // ------------------------------------------------------------------

    pub fn blacklist(&self, collection_id: &str) -> Result<Vec<String>> {
        self.read(|catalog| {
            Ok(collection_ref(catalog, collection_id)?
                .blacklist
                .iter()
                .cloned()
                .collect())
        })
    }

    pub fn add_to_blacklist(&self, collection_id: &str, item_id: &str) -> Result<()> {
        self.require(collection_id, None)?;
        self.mutate(|catalog| {
            if !collection_mut(catalog, collection_id)?
                .blacklist
                .insert(item_id.to_string())
            {
                return Err(Error::already_exists(format!("{item_id} in blacklist")));
            }
            Ok(())
        })
    }

    pub fn remove_from_blacklist(&self, collection_id: &str, item_id: &str) -> Result<()> {
        self.require(collection_id, None)?;
        self.mutate(|catalog| {
            if !collection_mut(catalog, collection_id)?.blacklist.remove(item_id) {
                return Err(Error::not_found(format!("{item_id} in blacklist")));
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn read<R>(&self, f: impl FnOnce(&Catalog) -> Result<R>) -> Result<R> {
        let guard = self.doc.read();
        match guard.as_ref() {
            Some(catalog) => f(catalog),
            None => f(&Catalog::new()),
        }
    }

    /// Apply `f` to a copy, persist it, then commit it in memory.
    fn mutate<R>(&self, f: impl FnOnce(&mut Catalog) -> Result<R>) -> Result<R> {
        let mut guard = self.doc.write();
        let Some(current) = guard.as_ref() else {
            return Err(self.refuse_save());
        };

        let mut next = current.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *guard = Some(next);
        Ok(out)
    }

    fn persist(&self, catalog: &Catalog) -> Result<()> {
        let doc = serde_json::to_value(catalog)?;
        persist::write_document(&self.path, &doc)
    }

    fn refuse_save(&self) -> Error {
        Error::corrupted(
            &self.path,
            "document could not be loaded; refusing to overwrite it (move it aside to start fresh)",
        )
    }
}

fn collection_ref<'a>(catalog: &'a Catalog, collection_id: &str) -> Result<&'a Collection> {
    catalog
        .collections
        .get(collection_id)
        .ok_or_else(|| Error::not_found(format!("collection {collection_id}")))
}

fn collection_mut<'a>(catalog: &'a mut Catalog, collection_id: &str) -> Result<&'a mut Collection> {
    catalog
        .collections
        .get_mut(collection_id)
        .ok_or_else(|| Error::not_found(format!("collection {collection_id}")))
}

fn item_mut<'a>(
    catalog: &'a mut Catalog,
    collection_id: &str,
    item_id: &str,
) -> Result<&'a mut ItemRecord> {
    collection_mut(catalog, collection_id)?
        .items
        .get_mut(item_id)
        .ok_or_else(|| Error::not_found(format!("item {item_id} in collection {collection_id}")))
}

/// Read, migrate and type-check the document at `path`.
fn load_document(path: &Path) -> Result<Catalog> {
    let mut doc = persist::read_document(path)?;
    if migrate::migrate_legacy(&mut doc) {
        tracing::info!(target: "syncy::catalog", path = %path.display(), "Migrated legacy catalog layout");
    }
    serde_json::from_value(doc).map_err(|e| Error::corrupted(path, e.to_string()))
}

fn revalidate(doc: Value, path: &[&str]) -> Result<Catalog> {
    serde_json::from_value(doc).map_err(|e| {
        Error::validation(format!("writing '{}' breaks the catalog schema: {e}", path.join("/")))
    })
}

/// Best-effort copy of a known-good document for forensic recovery.
fn mirror_backup(backup_path: &Path, catalog: &Catalog) {
    let written = serde_json::to_value(catalog)
        .map_err(Error::from)
        .and_then(|doc| persist::write_document(backup_path, &doc));
    if let Err(e) = written {
        tracing::warn!(target: "syncy::catalog", error = %e, "Failed to write catalog backup");
    }
}

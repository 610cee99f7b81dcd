//! Catalog inspection and editing commands.

use super::BlacklistAction;
use crate::catalog::CatalogStore;
use crate::error::Error;

/// List collections, or the items of one
pub fn cmd_list(store: &CatalogStore, collection: Option<&str>) -> anyhow::Result<()> {
    let Some(collection_id) = collection else {
        let ids = store.collection_ids();
        if ids.is_empty() {
            println!("No collections yet. Add one with `syncy add <url>`.");
            return Ok(());
        }
        println!("{:<40} {:>7} {:>7}  Title", "Collection", "Synced", "Items");
        for id in ids {
            let c = store.collection(&id)?;
            let synced = c.items.values().filter(|i| i.success).count();
            println!("{:<40} {:>7} {:>7}  {}", id, synced, c.items.len(), c.title);
        }
        return Ok(());
    };

    let c = store.collection(collection_id)?;
    println!("{} by {}", c.title, c.author);
    println!("Folder: {}", c.folder_name);
    println!("Added:  {}", c.added_at.format("%Y-%m-%d %H:%M"));
    println!();
    for item in c.items.values() {
        let mark = if item.success { "ok     " } else { "pending" };
        println!("  {mark} {} - {} [{}]", item.title, item.artist_line(), item.item_id);
        if let Some(err) = &item.last_error {
            println!("      last error: {err}");
        }
    }
    if !c.blacklist.is_empty() {
        println!();
        println!("{} blacklisted item(s)", c.blacklist.len());
    }
    Ok(())
}

/// Remove a collection from the catalog
pub fn cmd_remove(store: &CatalogStore, collection_id: &str) -> anyhow::Result<()> {
    let c = store.collection(collection_id)?;
    store.delete_collection(collection_id)?;
    println!("Removed {} ({} items). Files on disk were kept.", c.title, c.items.len());
    Ok(())
}

pub fn cmd_blacklist(store: &CatalogStore, action: &BlacklistAction) -> anyhow::Result<()> {
    match action {
        BlacklistAction::Add { collection, item } => {
            store.add_to_blacklist(collection, item)?;
            match store.delete_item(collection, item) {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            println!("{item} will no longer be synced into {collection}");
        }
        BlacklistAction::Remove { collection, item } => {
            store.remove_from_blacklist(collection, item)?;
            println!("{item} will be synced into {collection} again");
        }
        BlacklistAction::List { collection } => {
            let items = store.blacklist(collection)?;
            if items.is_empty() {
                println!("Nothing blacklisted in {collection}");
            }
            for item in items {
                println!("{item}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewCollection;
    use crate::test_utils::{new_item, temp_store};

    #[test]
    fn test_blacklist_add_drops_item() {
        let (store, _dir) = temp_store();
        store.add_collection("svc:playlist:X", NewCollection::titled("Mix")).unwrap();
        store.add_item("svc:playlist:X", "svc:track:1", new_item("One")).unwrap();

        let action = BlacklistAction::Add {
            collection: "svc:playlist:X".into(),
            item: "svc:track:1".into(),
        };
        cmd_blacklist(&store, &action).unwrap();

        assert!(!store.verify_path("svc:playlist:X", Some("svc:track:1")));
        assert_eq!(store.blacklist("svc:playlist:X").unwrap(), vec!["svc:track:1"]);

        // Twice is an error, the item is already excluded
        assert!(cmd_blacklist(&store, &action).is_err());
    }

    #[test]
    fn test_remove_unknown_collection_fails() {
        let (store, _dir) = temp_store();
        assert!(cmd_remove(&store, "svc:playlist:nope").is_err());
    }
}

//! Upgrade of documents written by the earlier camelCase schema.
//!
//! Old catalogs used `createdOn`/`playlists`/`addedOn` keys with float epoch
//! timestamps, a single `artist` list, `release`, `track_id`/`playlist_id`,
//! and an empty `{}` for `file_info` on placeholders. Everything here works on
//! the raw JSON value before typed deserialization.

use chrono::DateTime;
use serde_json::{Value, json};

use super::path;
use crate::organizer::sanitize_filename;

/// Rewrite legacy keys in place. Returns whether the document changed.
pub fn migrate_legacy(doc: &mut Value) -> bool {
    let mut changed = false;

    changed |= path::rename(doc, &[], "createdOn", "created_at");
    changed |= path::rename(doc, &[], "playlists", "collections");
    changed |= epoch_to_timestamp(doc, &["created_at"]);

    for collection_id in keys(doc, &["collections"]) {
        changed |= migrate_collection(doc, &collection_id);
    }

    changed
}

fn migrate_collection(doc: &mut Value, collection_id: &str) -> bool {
    let base = ["collections", collection_id];
    let mut changed = path::rename(doc, &base, "addedOn", "added_at");
    changed |= epoch_to_timestamp(doc, &["collections", collection_id, "added_at"]);

    if path::get(doc, &["collections", collection_id, "folder_name"]).is_none() {
        let title = path::get(doc, &["collections", collection_id, "title"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        changed |= path::set(
            doc,
            &["collections", collection_id, "folder_name"],
            json!(sanitize_filename(&title)),
        )
        .is_ok();
    }

    for item_id in keys(doc, &["collections", collection_id, "items"]) {
        changed |= migrate_item(doc, collection_id, &item_id);
    }

    changed
}

fn migrate_item(doc: &mut Value, collection_id: &str, item_id: &str) -> bool {
    let item = ["collections", collection_id, "items", item_id];
    let mut changed = false;

    changed |= path::rename(doc, &item, "artist", "artists");
    changed |= path::rename(doc, &item, "release", "release_year");
    changed |= path::rename(doc, &item, "track_id", "item_id");
    changed |= path::rename(doc, &item, "playlist_id", "collection_id");

    let Some(record) = path::get_mut(doc, &item).and_then(Value::as_object_mut) else {
        return changed;
    };

    if let Some(Value::String(artist)) = record.get("artists") {
        let artists = json!([artist]);
        record.insert("artists".to_string(), artists);
        changed = true;
    }

    // Years were sometimes stored as strings or floats
    let year = record.get("release_year").cloned();
    let normalized = match &year {
        Some(Value::String(s)) => s.trim().get(..4).and_then(|y| y.parse::<i32>().ok()).map(Value::from),
        Some(Value::Number(n)) if n.as_i64().is_none() => n.as_f64().map(|f| Value::from(f as i32)),
        Some(other) => Some(other.clone()),
        None => None,
    };
    if normalized != year {
        record.insert("release_year".to_string(), normalized.unwrap_or(Value::Null));
        changed = true;
    }

    for (key, default) in [
        ("item_id", json!(item_id)),
        ("collection_id", json!(collection_id)),
        ("album", json!("Unknown album")),
        ("artists", json!(["Unknown artist"])),
        ("release_year", Value::Null),
        ("success", json!(false)),
    ] {
        if !record.contains_key(key) {
            record.insert(key.to_string(), default);
            changed = true;
        }
    }

    let success = record.get("success").and_then(Value::as_bool).unwrap_or(false);
    let empty_info = match record.get("file_info") {
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Null) => true,
        Some(_) => false,
        None => false,
    };
    if empty_info || (!success && record.contains_key("file_info")) {
        record.remove("file_info");
        changed = true;
    }

    if let Some(Value::Object(info)) = record.get_mut("file_info") {
        for (from, to) in [("cover_url", "source_url"), ("length", "length_seconds")] {
            if !info.contains_key(to)
                && let Some(value) = info.remove(from)
            {
                info.insert(to.to_string(), value);
                changed = true;
            }
        }

        // "256k" style bitrates
        if let Some(Value::String(rate)) = info.get("media_bitrate") {
            let kbps = rate.trim_end_matches(['k', 'K']).parse::<u32>().unwrap_or(0);
            info.insert("media_bitrate".to_string(), json!(kbps));
            changed = true;
        }

        if let Some(Value::Number(n)) = info.get("length_seconds")
            && n.as_u64().is_none()
        {
            let secs = n.as_f64().unwrap_or(0.0).max(0.0).round() as u64;
            info.insert("length_seconds".to_string(), json!(secs));
            changed = true;
        }
    }

    changed
}

fn keys(doc: &Value, at: &[&str]) -> Vec<String> {
    path::get(doc, at)
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

/// Replace a float epoch at `at` with an RFC 3339 string.
fn epoch_to_timestamp(doc: &mut Value, at: &[&str]) -> bool {
    let Some(Value::Number(n)) = path::get(doc, at) else {
        return false;
    };
    let secs = n.as_f64().unwrap_or(0.0);
    let whole = secs.trunc() as i64;
    let nanos = (secs.fract() * 1e9) as u32;
    let Some(stamp) = DateTime::from_timestamp(whole, nanos) else {
        return false;
    };
    path::set(doc, at, json!(stamp.to_rfc3339())).is_ok()
}

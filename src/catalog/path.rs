//! Key-path access into the raw JSON document.
//!
//! A path is a sequence of object keys, e.g.
//! `["collections", "svc:playlist:X", "items", "svc:track:1", "title"]`.
//! Keys are never split on any separator, so identifiers containing `:` or
//! `.` are addressed verbatim.
//!
//! These helpers are used at the storage boundary only: for legacy document
//! migration and for the store's raw `get_path`/`set_path`/`delete_path`.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Resolve `path` under `root`, or `None` if any level is missing.
pub fn get<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, key| node.as_object()?.get(*key))
}

/// Resolve `path` under `root`, falling back to `default`.
pub fn get_or(root: &Value, path: &[&str], default: Value) -> Value {
    get(root, path).cloned().unwrap_or(default)
}

/// Store `value` at `path`, creating missing intermediate objects.
///
/// Fails if the path is empty or an existing intermediate is not an object.
pub fn set(root: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        return Err(Error::validation("cannot set an empty path"));
    };

    let mut node = root;
    for (depth, key) in parents.iter().enumerate() {
        let map = as_object_mut(node, &path[..depth])?;
        node = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    as_object_mut(node, parents)?.insert(last.to_string(), value);
    Ok(())
}

/// Remove the value at `path`, returning it. Missing paths are a no-op.
pub fn delete(root: &mut Value, path: &[&str]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut node = root;
    for key in parents {
        node = node.as_object_mut()?.get_mut(*key)?;
    }
    node.as_object_mut()?.remove(*last)
}

/// Move the value at `parent/from` to `parent/to` unless `to` is already set.
///
/// Returns whether anything moved.
pub fn rename(root: &mut Value, parent: &[&str], from: &str, to: &str) -> bool {
    let Some(map) = get_mut(root, parent).and_then(Value::as_object_mut) else {
        return false;
    };
    if map.contains_key(to) {
        return false;
    }
    match map.remove(from) {
        Some(value) => {
            map.insert(to.to_string(), value);
            true
        }
        None => false,
    }
}

/// Mutable variant of [`get`].
pub fn get_mut<'a>(root: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    path.iter()
        .try_fold(root, |node, key| node.as_object_mut()?.get_mut(*key))
}

fn as_object_mut<'a>(node: &'a mut Value, at: &[&str]) -> Result<&'a mut Map<String, Value>> {
    node.as_object_mut().ok_or_else(|| {
        Error::validation(format!("'{}' is not an object", at.join("/")))
    })
}

//! On-disk persistence of the catalog document.
//!
//! Writes go to a hidden temp file in the target's own directory and are then
//! renamed over the target, so readers only ever see a complete document.
//! A rename that crosses devices falls back to copy + remove with a warning.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result, ResultExt};

/// Temp file used while writing `target`.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.tmp"))
}

/// Backup sibling of `target`.
pub fn backup_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{name}.backup"))
}

/// Write `bytes` to the temp file next to `target` and flush it to disk.
///
/// The target itself is not touched until [`commit`].
pub fn stage(target: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let temp = temp_path_for(target);
    let written = File::create(&temp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });

    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(Error::Io(e).context(format!("writing {}", temp.display())));
    }
    Ok(temp)
}

/// Move a staged temp file over `target`.
pub fn commit(temp: &Path, target: &Path) -> Result<()> {
    match fs::rename(temp, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::warn!(
                target: "syncy::catalog",
                temp = %temp.display(),
                dest = %target.display(),
                "Rename crosses devices, falling back to non-atomic copy"
            );
            let copied = fs::copy(temp, target).map(|_| ());
            let _ = fs::remove_file(temp);
            copied.with_context(format!("copying catalog to {}", target.display()))
        }
        Err(e) => {
            let _ = fs::remove_file(temp);
            Err(Error::Io(e).context(format!("replacing {}", target.display())))
        }
    }
}

/// Atomically replace `target` with the pretty-printed `doc`.
pub fn write_document(target: &Path, doc: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    let temp = stage(target, &bytes)?;
    commit(&temp, target)
}

/// Read and parse the JSON document at `path`.
///
/// Both unreadable and unparsable files are reported as [`Error::Corrupted`];
/// a missing file is [`Error::NotFound`].
pub fn read_document(path: &Path) -> Result<Value> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::missing_file(path)),
        Err(e) => return Err(Error::corrupted(path, e.to_string())),
    };

    let doc: Value =
        serde_json::from_slice(&bytes).map_err(|e| Error::corrupted(path, e.to_string()))?;
    if !doc.is_object() {
        return Err(Error::corrupted(path, "document root is not an object"));
    }
    Ok(doc)
}

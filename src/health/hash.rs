//! Content hashing for artifact identity.
//!
//! Files are identified by the SHA-256 of their full contents, so a track
//! that was renamed or moved is still recognized. Files are streamed through
//! a fixed buffer and never loaded whole.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::error::{Error, Result, ResultExt};

/// Read buffer size for streamed hashing.
const BUFFER_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 digest of a file as lowercase hex (64 characters).
///
/// # Errors
///
/// [`Error::NotFound`] if `path` does not exist, [`Error::Io`] for other
/// read failures.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::missing_file(path)),
        Err(e) => return Err(Error::Io(e).context(format!("opening {}", path.display()))),
    };

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(format!("reading {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, same format as [`hash_file`].
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

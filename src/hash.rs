//! Content hashing for change detection
//!
//! Files are hashed with SHA-256 in bounded reads so large documents never
//! have to fit in memory. The digest is the change-detection key stored in
//! the tracking database.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Read buffer size for file hashing (64 KiB)
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Hash a file's contents, returning its modification time and hex digest.
///
/// The digest depends only on the file bytes, never on the read buffer
/// size. I/O errors (missing file, permission denied) propagate to the
/// caller, which decides whether the file should be treated as gone.
pub fn hash_file(path: &Path) -> io::Result<(DateTime<Utc>, String)> {
    let file = File::open(path)?;
    let modified = file.metadata()?.modified()?;

    let mut reader = file;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok((DateTime::<Utc>::from(modified), hex::encode(hasher.finalize())))
}

/// Hash a string, for deterministic identifier derivation.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

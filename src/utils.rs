//! Utility functions for savekeep
//!
//! ## Categories of Utilities
//!
//! ### File Operations
//! - File content hashing (SHA-256) for mirror verification
//! - Atomic file writing for the manifest and settings
//!
//! ### Path Manipulation
//! - Mapping a path under one root onto another root
//!
//! ## Thread Safety
//!
//! All utility functions are thread-safe and can be called concurrently from
//! multiple threads without synchronization.

use crate::error::{Result, SaveError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Hash a file's content efficiently using SHA-256
///
/// Reads the file in 8KB chunks and returns the digest as a 64-character
/// lowercase hex string.
///
/// # Errors
///
/// - [`SaveError::Io`] if the file cannot be opened or read
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192]; // 8KB buffer

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first so symlinked components keep their spelling,
/// and falls back to comparing canonical paths.
///
/// # Errors
///
/// - [`SaveError::Internal`] if the path is not under the base path
/// - [`SaveError::Io`] if canonicalization fails (fallback case only)
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| SaveError::internal(format!(
            "Path {:?} is not relative to {:?}",
            path_canon, base_canon
        )))
}

/// Map `path` under `from_root` to the same relative location under `to_root`
pub fn rebase(path: &Path, from_root: &Path, to_root: &Path) -> Result<PathBuf> {
    let relative = make_relative(path, from_root)?;
    if relative.as_os_str().is_empty() {
        Ok(to_root.to_path_buf())
    } else {
        Ok(to_root.join(relative))
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The temp file is created next to `path` so the final rename never crosses
/// filesystems. Readers see either the old content or the new content, never
/// a truncated file. The temp file is removed if any step fails.
///
/// # Errors
///
/// - [`SaveError::Io`] if the parent directory is missing, the write fails,
///   or the rename fails
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".savekeep-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| SaveError::Io(e.error))?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

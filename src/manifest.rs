//! Durable manifest of tracked entries
//!
//! The manifest is a pretty-printed JSON array of [`SaveEntry`] records at
//! `<backup_root>/savemanifest.json`. It is the single source of truth on
//! restart: the in-memory registry is always rebuilt from it.
//!
//! ## Loading
//!
//! A missing, unreadable or unparseable manifest is not fatal. [`ManifestStore::load`]
//! reports it as [`ManifestLoad::RecoverableEmpty`] with a diagnostic, and the
//! caller starts from an empty registry. An unparseable file should be moved
//! aside with [`ManifestStore::quarantine`] before a fresh one is written, so
//! entries recorded in it can still be recovered by hand.
//!
//! A zero-length file (left behind by tools that created the file without
//! writing to it) and the JSON literal `null` both load as an empty manifest.
//!
//! ## Writing
//!
//! [`ManifestStore::persist`] replaces the whole file atomically.

use crate::error::{Result, SaveError};
use crate::types::SaveEntry;
use crate::utils;
use chrono::Utc;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Fixed manifest file name under the backup root
pub const MANIFEST_FILE_NAME: &str = "savemanifest.json";

const EMPTY_MANIFEST: &[u8] = b"[]\n";

/// Why a manifest could not be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// No file at the manifest path
    Missing,
    /// The file exists but could not be read
    Unreadable,
    /// The file was read but is not a valid manifest
    Corrupt,
}

/// Details of a [`ManifestLoad::RecoverableEmpty`] condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDiagnostic {
    /// Manifest path
    pub path: PathBuf,
    /// Failure class
    pub kind: DiagnosticKind,
    /// Underlying error text
    pub message: String,
    /// Where the unreadable file was moved, if it was
    pub quarantined_to: Option<PathBuf>,
}

impl fmt::Display for ManifestDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            DiagnosticKind::Missing => "is missing",
            DiagnosticKind::Unreadable => "could not be read",
            DiagnosticKind::Corrupt => "is not a valid manifest",
        };
        write!(f, "Manifest {:?} {}: {}", self.path, what, self.message)?;
        if let Some(moved) = &self.quarantined_to {
            write!(f, " (moved to {:?})", moved)?;
        }
        write!(f, ". A new manifest will be created.")
    }
}

/// Result of [`ManifestStore::load`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLoad {
    /// Entries in manifest order
    Loaded(Vec<SaveEntry>),
    /// Nothing usable on disk; start empty and surface the diagnostic
    RecoverableEmpty(ManifestDiagnostic),
}

impl ManifestLoad {
    /// Entries to seed the registry with
    pub fn into_entries(self) -> Vec<SaveEntry> {
        match self {
            ManifestLoad::Loaded(entries) => entries,
            ManifestLoad::RecoverableEmpty(_) => Vec::new(),
        }
    }
}

/// Reads and writes the manifest file of one backup root
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    /// Store for the manifest of `backup_root`
    pub fn new(backup_root: &Path) -> Self {
        Self {
            path: backup_root.join(MANIFEST_FILE_NAME),
        }
    }

    /// Manifest file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the manifest
    pub fn load(&self) -> ManifestLoad {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                let kind = if e.kind() == ErrorKind::NotFound {
                    DiagnosticKind::Missing
                } else {
                    DiagnosticKind::Unreadable
                };
                return self.recoverable(kind, e.to_string());
            }
        };

        let content = content.trim_start_matches('\u{feff}');
        if content.trim().is_empty() {
            debug!("Manifest {:?} is empty, treating as no entries", self.path);
            return ManifestLoad::Loaded(Vec::new());
        }

        match serde_json::from_str::<Option<Vec<SaveEntry>>>(content) {
            Ok(entries) => {
                let entries = entries.unwrap_or_default();
                debug!("Loaded {} entries from {:?}", entries.len(), self.path);
                ManifestLoad::Loaded(entries)
            }
            Err(e) => self.recoverable(DiagnosticKind::Corrupt, e.to_string()),
        }
    }

    /// Make sure a manifest file exists, writing `[]` if it does not
    ///
    /// An existing non-empty file is never touched. A zero-length file is
    /// rewritten as `[]`. Returns `true` if anything was written.
    pub fn ensure_exists(&self) -> Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_dir() => Err(SaveError::internal(format!(
                "Manifest path {:?} is a directory",
                self.path
            ))),
            Ok(meta) if meta.len() > 0 => Ok(false),
            Ok(_) => {
                utils::atomic_write(&self.path, EMPTY_MANIFEST)?;
                info!("Repaired zero-length manifest {:?}", self.path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)?;
                }
                utils::atomic_write(&self.path, EMPTY_MANIFEST)?;
                info!("Created manifest {:?}", self.path);
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the manifest with `entries`, in order
    pub fn persist(&self, entries: &[SaveEntry]) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(entries)?;
        json.push(b'\n');
        utils::atomic_write(&self.path, &json)?;
        debug!("Persisted {} entries to {:?}", entries.len(), self.path);
        Ok(())
    }

    /// Move the current manifest file aside
    ///
    /// Renames it to `savemanifest.json.corrupt-<UTC time>` in the same
    /// directory. Returns the new path, or `None` if there was no file.
    pub fn quarantine(&self) -> Result<Option<PathBuf>> {
        if fs::symlink_metadata(&self.path).is_err() {
            return Ok(None);
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let moved = self
            .path
            .with_file_name(format!("{}.corrupt-{}", MANIFEST_FILE_NAME, stamp));
        fs::rename(&self.path, &moved)?;
        warn!("Moved unreadable manifest {:?} to {:?}", self.path, moved);
        Ok(Some(moved))
    }

    fn recoverable(&self, kind: DiagnosticKind, message: String) -> ManifestLoad {
        let diagnostic = ManifestDiagnostic {
            path: self.path.clone(),
            kind,
            message,
            quarantined_to: None,
        };
        if kind == DiagnosticKind::Missing {
            info!("{}", diagnostic);
        } else {
            warn!("{}", diagnostic);
        }
        ManifestLoad::RecoverableEmpty(diagnostic)
    }
}

//! Error types for savekeep
//!
//! Per-file and per-entry problems during a backup run are not errors: they
//! are folded into [`SyncOutcome`](crate::types::SyncOutcome) and
//! [`RunReport`](crate::types::RunReport) data. The variants here cover what
//! a caller actually has to react to: invalid registry mutations, a run that
//! is already in progress, and a manifest that could not be written.

use crate::types::{EntryId, RunReport};
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in savekeep
pub type Result<T> = std::result::Result<T, SaveError>;

/// Main error type for all savekeep operations
#[derive(Debug, Error)]
pub enum SaveError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tracked source directory is absent or not a directory
    #[error("Source missing: {path:?}")]
    SourceMissing {
        /// Resolved source path
        path: PathBuf,
    },

    /// Entry fields failed validation
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Another entry already uses this title
    #[error("An entry titled '{0}' is already tracked")]
    DuplicateTitle(String),

    /// Another entry already mirrors into the same backup subdirectory
    #[error("Entry '{title}' already mirrors into backup folder '{folder}'")]
    MirrorCollision {
        /// Title of the entry that owns the folder
        title: String,
        /// Mirror folder name under the backup root
        folder: String,
    },

    /// No entry with this id in the registry
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// No entry with this title in the registry
    #[error("No entry titled '{0}'")]
    TitleNotFound(String),

    /// A backup run holds the run guard
    #[error("A backup run is already in progress")]
    RunInProgress,

    /// The manifest could not be written at the end of a run
    #[error("Failed to persist manifest {path:?}: {reason}")]
    PersistFailed {
        /// Manifest path
        path: PathBuf,
        /// Underlying failure
        reason: String,
        /// What the run copied before the write failed
        report: Box<RunReport>,
    },

    /// Exclude pattern could not be compiled
    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(String),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<globset::Error> for SaveError {
    fn from(err: globset::Error) -> Self {
        SaveError::InvalidPattern(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for SaveError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        SaveError::ThreadPool(err.to_string())
    }
}

impl SaveError {
    /// Create an invalid-entry error with a custom message
    pub fn invalid_entry(msg: impl Into<String>) -> Self {
        SaveError::InvalidEntry(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SaveError::Internal(msg.into())
    }

    /// Check if retrying the same call later can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SaveError::RunInProgress | SaveError::PersistFailed { .. } | SaveError::SourceMissing { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SaveError::SourceMissing { path } => {
                format!("Save folder {:?} no longer exists. Reconnect the drive or remove the entry.", path)
            }
            SaveError::DuplicateTitle(title) => {
                format!("'{}' is already tracked. Pick another title or remove the existing entry first.", title)
            }
            SaveError::MirrorCollision { title, folder } => {
                format!(
                    "'{}' already backs up into the folder '{}'. Two save folders with the same name \
                     cannot share one backup root.",
                    title, folder
                )
            }
            SaveError::RunInProgress => {
                "A backup is already running. Wait for it to finish and try again.".to_string()
            }
            SaveError::PersistFailed { path, .. } => {
                format!(
                    "Files were copied but the manifest {:?} could not be saved. \
                     Check free space and permissions, then run the backup again.",
                    path
                )
            }
            _ => self.to_string(),
        }
    }
}

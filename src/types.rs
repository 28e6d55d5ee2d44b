//! Core data types used throughout savekeep
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Tracked state**: [`SaveEntry`], [`TrackedEntry`], [`EntryId`]: what the
//!   registry holds and the manifest persists
//! - **Plans**: [`SyncPlan`], [`SyncAction`]: the filesystem work needed to
//!   mirror one source tree
//! - **Outcomes**: [`SyncOutcome`], [`FailedPath`], [`RunReport`]: what a
//!   plan or a whole run actually did
//! - **Configuration**: [`ManagerConfig`]
//! - **Progress**: [`ProgressInfo`], [`ProgressCallback`]
//!
//! ## Examples
//!
//! ```rust
//! use savekeep::types::SaveEntry;
//!
//! let entry = SaveEntry::new("Game1", "/src/game1", "PC");
//! assert!(entry.last_backup.is_none());
//! assert_eq!(entry.last_backup_display(), "Not Backed Up");
//! ```

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry-scoped identifier of a tracked entry
///
/// Ids are allocated by a [`SaveEntryRegistry`](crate::registry::SaveEntryRegistry)
/// in increasing order and never reused by that registry. They are not
/// persisted; loading a manifest assigns fresh ids in manifest order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    /// Wrap a raw id value
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One tracked save location
///
/// Serialized as one object of the manifest array:
///
/// ```json
/// {
///   "title": "Game1",
///   "originalPath": "/src/game1",
///   "platform": "PC",
///   "lastBackupDate": "0001-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEntry {
    /// Display name, unique within a registry
    pub title: String,
    /// Live source directory
    pub original_path: PathBuf,
    /// Free-form platform tag (console or PC name)
    pub platform: String,
    /// Start time of the last run that fully mirrored this entry
    #[serde(rename = "lastBackupDate", with = "backup_date", default)]
    pub last_backup: Option<DateTime<Utc>>,
}

impl SaveEntry {
    /// Create an entry that has never been backed up
    pub fn new(
        title: impl Into<String>,
        original_path: impl Into<PathBuf>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            original_path: original_path.into(),
            platform: platform.into(),
            last_backup: None,
        }
    }

    /// Source path made absolute against the working directory
    ///
    /// Symlinks and `..` components are left as written; only relative
    /// paths are anchored.
    pub fn resolved_source(&self) -> std::io::Result<PathBuf> {
        std::path::absolute(&self.original_path)
    }

    /// Name of this entry's mirror folder under the backup root
    ///
    /// This is the final component of the resolved source path, or `None`
    /// when the path has no usable final component (`/`, `..`).
    pub fn mirror_name(&self) -> Option<OsString> {
        self.resolved_source()
            .ok()
            .and_then(|path| path.file_name().map(|name| name.to_os_string()))
    }

    /// Mirror directory of this entry under `backup_root`
    pub fn mirror_path(&self, backup_root: &Path) -> Option<PathBuf> {
        self.mirror_name().map(|name| backup_root.join(name))
    }

    /// Human-readable last backup time for listings
    pub fn last_backup_display(&self) -> String {
        match self.last_backup {
            Some(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "Not Backed Up".to_string(),
        }
    }
}

/// An entry together with the id its registry assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntry {
    /// Registry-assigned id
    pub id: EntryId,
    /// Persisted entry data
    pub entry: SaveEntry,
}

/// A single filesystem operation of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Create a directory (and missing parents); no-op if present
    CreateDir {
        /// Directory to create under the mirror
        target: PathBuf,
    },
    /// Copy file bytes, replacing whatever regular file is at `target`
    CopyFile {
        /// File in the source tree
        source: PathBuf,
        /// Destination in the mirror
        target: PathBuf,
        /// Size observed while planning
        size: u64,
    },
}

/// A source path the planner deliberately did not mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPath {
    /// Path in the source tree
    pub path: PathBuf,
    /// Why it was left out
    pub reason: String,
}

/// A path whose operation failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPath {
    /// Path the failed operation was about
    pub path: PathBuf,
    /// Error text
    pub reason: String,
}

impl FailedPath {
    /// Record a failure for `path`
    pub fn new(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// The operations needed to mirror one source tree onto one target tree
///
/// Actions are in pre-order: every `CreateDir` comes before any action that
/// writes inside that directory. The first action always creates the target
/// root itself.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Root of the source tree
    pub source_root: PathBuf,
    /// Root of the mirror
    pub target_root: PathBuf,
    /// Ordered directory and copy actions
    pub actions: Vec<SyncAction>,
    /// Source paths left out on purpose (special files, unfollowed links)
    pub skipped: Vec<SkippedPath>,
    /// Source paths that could not be traversed; the entry cannot succeed
    pub unreadable: Vec<FailedPath>,
}

impl SyncPlan {
    /// Number of planned directory creations, including the target root
    pub fn directory_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| matches!(action, SyncAction::CreateDir { .. }))
            .count()
    }

    /// Number of planned file copies
    pub fn file_count(&self) -> usize {
        self.actions.len() - self.directory_count()
    }

    /// Bytes the plan expects to copy
    pub fn total_bytes(&self) -> u64 {
        self.actions
            .iter()
            .map(|action| match action {
                SyncAction::CopyFile { size, .. } => *size,
                SyncAction::CreateDir { .. } => 0,
            })
            .sum()
    }
}

/// Result of executing one plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Every path whose operation failed, plus untraversable source paths
    pub failed_paths: Vec<FailedPath>,
    /// Paths the plan left out on purpose
    pub skipped: Vec<SkippedPath>,
    /// Directory actions that completed
    pub directories_created: usize,
    /// Files copied
    pub files_copied: usize,
    /// Bytes written by the copies
    pub bytes_copied: u64,
}

impl SyncOutcome {
    /// True only if every planned action completed
    pub fn succeeded(&self) -> bool {
        self.failed_paths.is_empty()
    }
}

/// An entry that reached the failed state in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    /// Entry title
    pub title: String,
    /// Short reason, e.g. `source missing: "/src/game1"`
    pub reason: String,
    /// Per-path failures, empty when the whole entry was rejected up front
    pub failed_paths: Vec<FailedPath>,
}

/// Summary of one `backup_all` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run start; the timestamp given to every entry that succeeded
    pub started_at: DateTime<Utc>,
    /// Titles mirrored completely, in registry order
    pub succeeded: Vec<String>,
    /// Titles that failed, with reasons
    pub failed: Vec<FailedEntry>,
    /// Titles never started because the run was cancelled
    pub cancelled: Vec<String>,
    /// Files copied across all entries
    pub files_copied: usize,
    /// Bytes copied across all entries
    pub bytes_copied: u64,
    /// Wall time of the run
    pub duration_ms: u64,
}

impl RunReport {
    /// True if every entry succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    /// Multi-line summary for display
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if self.succeeded.is_empty() {
            out.push_str("No save files were backed up.\n");
        } else {
            out.push_str("Successfully backed up save files:\n");
            for title in &self.succeeded {
                out.push_str(&format!("  - {}\n", title));
            }
        }
        if !self.failed.is_empty() {
            out.push_str("Failed:\n");
            for failed in &self.failed {
                out.push_str(&format!("  - {}: {}\n", failed.title, failed.reason));
            }
        }
        if !self.cancelled.is_empty() {
            out.push_str("Cancelled:\n");
            for title in &self.cancelled {
                out.push_str(&format!("  - {}\n", title));
            }
        }
        out
    }
}

/// Type alias for progress callbacks
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Entry that just finished, if any
    pub current_item: Option<String>,
    /// Entries finished so far
    pub processed: usize,
    /// Entries in the run
    pub total: usize,
    /// Bytes copied so far
    pub bytes_processed: u64,
}

/// Configuration of a [`SaveManager`](crate::SaveManager)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Directory holding the manifest and the mirrors
    pub backup_root: PathBuf,
    /// Worker threads for entries and copies
    pub parallel_workers: usize,
    /// Traverse directories behind symlinks
    pub follow_symlinks: bool,
    /// Glob patterns, relative to each source root, that are never mirrored
    pub exclude_patterns: Vec<String>,
    /// Crate version that built this config
    pub version: String,
}

/// Serde adapter for `lastBackupDate`
///
/// `None` is written as the sentinel [`NEVER`](backup_date::NEVER). Reading
/// accepts RFC 3339 timestamps, offset-less timestamps (taken as UTC), and
/// maps the sentinel, the Unix epoch, anything before it, and `null` to
/// `None`.
pub mod backup_date {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// On-disk value meaning "never backed up"
    pub const NEVER: &str = "0001-01-01T00:00:00Z";

    /// Serialize an optional backup time
    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(at) => serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_str(NEVER),
        }
    }

    /// Deserialize an optional backup time
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw).map_err(de::Error::custom),
            None => Ok(None),
        }
    }

    /// Parse one on-disk value
    pub fn parse(raw: &str) -> Result<Option<DateTime<Utc>>, String> {
        let raw = raw.trim();
        let parsed = match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => at.with_timezone(&Utc),
            Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map_err(|e| format!("invalid lastBackupDate '{}': {}", raw, e))?
                .and_utc(),
        };

        if parsed.timestamp() <= 0 {
            Ok(None)
        } else {
            Ok(Some(parsed))
        }
    }
}

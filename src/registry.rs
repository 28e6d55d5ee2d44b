//! In-memory registry of tracked entries
//!
//! The registry is the authoritative list the engine reconciles and the front
//! end displays. It allocates [`EntryId`]s itself, starting at 1, and never
//! hands out the same id twice.
//!
//! `add_entry` enforces the policies a new entry must satisfy: a non-empty
//! title that no other entry uses, and a mirror folder name that no other
//! entry mirrors into. Entries loaded from a manifest are taken as they are,
//! even if they break those policies, so nothing recorded is ever dropped on
//! load.

use crate::error::{Result, SaveError};
use crate::manifest::MANIFEST_FILE_NAME;
use crate::types::{EntryId, SaveEntry, TrackedEntry};
use chrono::{DateTime, Duration, Utc};
use std::ffi::OsStr;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Ordered collection of tracked entries
#[derive(Debug, Clone)]
pub struct SaveEntryRegistry {
    entries: Vec<TrackedEntry>,
    next_id: u64,
}

impl SaveEntryRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Registry seeded from manifest entries, in order
    pub fn from_entries(entries: Vec<SaveEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            if let Some(existing) = registry.find_by_title(&entry.title) {
                warn!("Manifest lists title '{}' more than once (first is {})", entry.title, existing);
            }
            if let Some(owner) = registry.mirror_owner(entry.mirror_name().as_deref()) {
                warn!(
                    "Entries '{}' and '{}' mirror into the same backup folder",
                    owner.entry.title, entry.title
                );
            }
            let id = registry.allocate_id();
            registry.entries.push(TrackedEntry { id, entry });
        }
        registry
    }

    /// Register a new save location
    ///
    /// # Errors
    ///
    /// - [`SaveError::InvalidEntry`] for an empty title or a path without a
    ///   usable final component
    /// - [`SaveError::DuplicateTitle`] if the title is taken
    /// - [`SaveError::MirrorCollision`] if another entry mirrors into the
    ///   same backup folder (compared case-insensitively)
    pub fn add_entry(
        &mut self,
        title: impl Into<String>,
        original_path: impl Into<PathBuf>,
        platform: impl Into<String>,
    ) -> Result<EntryId> {
        let title = title.into().trim().to_string();
        let original_path = original_path.into();
        if title.is_empty() {
            return Err(SaveError::invalid_entry("title must not be empty"));
        }
        if original_path.as_os_str().is_empty() {
            return Err(SaveError::invalid_entry("save folder path must not be empty"));
        }
        if self.find_by_title(&title).is_some() {
            return Err(SaveError::DuplicateTitle(title));
        }

        let entry = SaveEntry::new(title, original_path, platform.into().trim());
        let mirror = entry.mirror_name().ok_or_else(|| {
            SaveError::invalid_entry(format!(
                "{:?} has no folder name to mirror into",
                entry.original_path
            ))
        })?;
        if mirror.eq_ignore_ascii_case(MANIFEST_FILE_NAME) {
            return Err(SaveError::invalid_entry(format!(
                "a folder named '{}' would overwrite the manifest",
                MANIFEST_FILE_NAME
            )));
        }
        if let Some(owner) = self.mirror_owner(Some(mirror.as_os_str())) {
            return Err(SaveError::MirrorCollision {
                title: owner.entry.title.clone(),
                folder: mirror.to_string_lossy().into_owned(),
            });
        }

        let id = self.allocate_id();
        debug!("Tracking '{}' as {}", entry.title, id);
        self.entries.push(TrackedEntry { id, entry });
        Ok(id)
    }

    /// Stop tracking an entry; its backup files stay on disk
    pub fn remove_entry(&mut self, id: EntryId) -> Result<SaveEntry> {
        let index = self
            .entries
            .iter()
            .position(|tracked| tracked.id == id)
            .ok_or(SaveError::EntryNotFound(id))?;
        let removed = self.entries.remove(index);
        debug!("Stopped tracking '{}' ({})", removed.entry.title, id);
        Ok(removed.entry)
    }

    /// Look up an entry by id
    pub fn get(&self, id: EntryId) -> Option<&TrackedEntry> {
        self.entries.iter().find(|tracked| tracked.id == id)
    }

    /// Id of the first entry with exactly this title
    pub fn find_by_title(&self, title: &str) -> Option<EntryId> {
        self.entries
            .iter()
            .find(|tracked| tracked.entry.title == title)
            .map(|tracked| tracked.id)
    }

    /// Snapshot of all entries for display or planning
    pub fn list_entries(&self) -> Vec<TrackedEntry> {
        self.entries.clone()
    }

    /// Entries as they are written to the manifest
    pub fn to_manifest(&self) -> Vec<SaveEntry> {
        self.entries.iter().map(|tracked| tracked.entry.clone()).collect()
    }

    /// Record a complete backup of `id` taken at `run_started`
    ///
    /// The stored time always moves forward: if `run_started` is not after
    /// the previous backup (clock moved back), the previous time plus one
    /// microsecond is stored instead. Returns the stored time.
    pub fn record_backup(&mut self, id: EntryId, run_started: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let tracked = self
            .entries
            .iter_mut()
            .find(|tracked| tracked.id == id)
            .ok_or(SaveError::EntryNotFound(id))?;

        let stamp = match tracked.entry.last_backup {
            Some(previous) if previous >= run_started => {
                warn!(
                    "Clock is behind the last backup of '{}' ({} >= {}), nudging forward",
                    tracked.entry.title, previous, run_started
                );
                previous + Duration::microseconds(1)
            }
            _ => run_started,
        };
        tracked.entry.last_backup = Some(stamp);
        Ok(stamp)
    }

    /// Number of tracked entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn allocate_id(&mut self) -> EntryId {
        let id = EntryId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn mirror_owner(&self, mirror: Option<&OsStr>) -> Option<&TrackedEntry> {
        let mirror = mirror?;
        self.entries.iter().find(|tracked| {
            tracked
                .entry
                .mirror_name()
                .is_some_and(|existing| existing.eq_ignore_ascii_case(mirror))
        })
    }
}

impl Default for SaveEntryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

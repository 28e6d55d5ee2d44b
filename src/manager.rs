//! Backup reconciliation engine
//!
//! [`SaveManager`] owns a backup root: the manifest inside it, the registry
//! loaded from that manifest, and the worker pool that mirrors entries into
//! it. Front ends call its synchronous methods and never touch the pieces
//! directly.
//!
//! ## Runs
//!
//! [`SaveManager::backup_all`] reconciles every tracked entry:
//!
//! 1. The run start time is read once and shared by all entries.
//! 2. Entries are planned and executed in parallel. Each one ends
//!    succeeded, failed, or cancelled, and a failure never affects siblings.
//! 3. Succeeded entries get the run start as their last backup time in a
//!    staged copy of the registry. Failed and cancelled entries keep theirs.
//! 4. The staged registry is written to the manifest, once.
//! 5. Only if that write succeeds does the staged registry replace the one
//!    in memory.
//!
//! Registry changes and runs are serialized by one guard: a second run
//! fails fast with [`SaveError::RunInProgress`], while `add_entry`,
//! `remove_entry` and `persist` wait for the active run to finish.

use crate::error::{Result, SaveError};
use crate::executor::SyncExecutor;
use crate::manifest::{DiagnosticKind, ManifestDiagnostic, ManifestLoad, ManifestStore};
use crate::planner::SyncPlanner;
use crate::registry::SaveEntryRegistry;
use crate::types::{
    EntryId, FailedEntry, ManagerConfig, ProgressCallback, ProgressInfo, RunReport, SaveEntry,
    SyncOutcome, TrackedEntry,
};
use crate::verification::{MirrorVerifier, VerificationReport};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, instrument, warn};

/// Cooperative cancellation of a running backup
///
/// Cloning shares the flag. Entries check it before they start; an entry
/// that already started always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Fresh, not cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the current run to stop starting entries
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Terminal state of one entry in a run
enum EntryState {
    Succeeded(SyncOutcome),
    Failed(FailedEntry, Option<SyncOutcome>),
    Cancelled,
}

/// Main entry point for tracking and backing up save folders
///
/// # Examples
///
/// ```rust,no_run
/// use savekeep::{SaveManager, SaveManagerBuilder};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Defaults
/// let manager = SaveManager::open("./Backups")?;
///
/// // Custom configuration
/// let manager = SaveManagerBuilder::new()
///     .parallel_workers(2)
///     .exclude_patterns(vec!["*.lock".to_string()])
///     .build("./Backups")?;
///
/// manager.add_entry("Game1", "/home/me/.local/share/game1", "PC")?;
/// manager.persist()?;
/// let report = manager.backup_all()?;
/// print!("{}", report.summary());
/// # Ok(())
/// # }
/// ```
pub struct SaveManager {
    config: ManagerConfig,
    manifest: ManifestStore,
    registry: RwLock<SaveEntryRegistry>,
    planner: SyncPlanner,
    executor: SyncExecutor,
    pool: Arc<ThreadPool>,
    run_guard: Mutex<()>,
    cancel: CancellationToken,
    diagnostic: Option<ManifestDiagnostic>,
}

impl std::fmt::Debug for SaveManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveManager")
            .field("config", &self.config)
            .field("manifest", &self.manifest)
            .field("entries", &self.registry.read().len())
            .field("running", &self.is_running())
            .field("diagnostic", &self.diagnostic)
            .finish()
    }
}

impl SaveManager {
    /// Open a backup root with default settings
    ///
    /// Creates the root and an empty manifest if needed. A manifest that
    /// cannot be parsed is moved aside and replaced by an empty one; the
    /// reason is available from [`SaveManager::load_diagnostic`].
    ///
    /// # Errors
    ///
    /// - [`SaveError::Io`] if the root or manifest cannot be created, or a
    ///   corrupt manifest cannot be moved aside
    pub fn open(backup_root: impl AsRef<Path>) -> Result<Self> {
        SaveManagerBuilder::new().build(backup_root)
    }

    #[instrument(skip(config, planner, pool))]
    fn init(config: ManagerConfig, planner: SyncPlanner, pool: Arc<ThreadPool>) -> Result<Self> {
        info!("Opening backup root {:?}", config.backup_root);
        fs::create_dir_all(&config.backup_root)?;

        let manifest = ManifestStore::new(&config.backup_root);
        let (entries, diagnostic) = match manifest.load() {
            ManifestLoad::Loaded(entries) => (entries, None),
            ManifestLoad::RecoverableEmpty(mut diagnostic) => {
                if diagnostic.kind != DiagnosticKind::Missing {
                    diagnostic.quarantined_to = manifest.quarantine()?;
                }
                (Vec::new(), Some(diagnostic))
            }
        };
        manifest.ensure_exists()?;

        let registry = SaveEntryRegistry::from_entries(entries);
        info!("Tracking {} entries", registry.len());

        Ok(Self {
            executor: SyncExecutor::new(Arc::clone(&pool)),
            config,
            manifest,
            registry: RwLock::new(registry),
            planner,
            pool,
            run_guard: Mutex::new(()),
            cancel: CancellationToken::new(),
            diagnostic,
        })
    }

    /// Directory holding the manifest and mirrors
    pub fn backup_root(&self) -> &Path {
        &self.config.backup_root
    }

    /// Manifest file path
    pub fn manifest_path(&self) -> &Path {
        self.manifest.path()
    }

    /// Active configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Why the manifest could not be loaded at open, if it could not
    pub fn load_diagnostic(&self) -> Option<&ManifestDiagnostic> {
        self.diagnostic.as_ref()
    }

    /// Track a new save folder
    ///
    /// Changes the in-memory registry only; call [`SaveManager::persist`] to
    /// write it. Waits for an active run to finish.
    ///
    /// # Errors
    ///
    /// See [`SaveEntryRegistry::add_entry`].
    pub fn add_entry(
        &self,
        title: impl Into<String>,
        original_path: impl Into<PathBuf>,
        platform: impl Into<String>,
    ) -> Result<EntryId> {
        let _guard = self.run_guard.lock();
        let id = self.registry.write().add_entry(title, original_path, platform)?;
        info!("Added entry {}", id);
        Ok(id)
    }

    /// Stop tracking an entry
    ///
    /// Its mirror stays on disk. Waits for an active run to finish.
    pub fn remove_entry(&self, id: EntryId) -> Result<SaveEntry> {
        let _guard = self.run_guard.lock();
        let removed = self.registry.write().remove_entry(id)?;
        info!("Removed entry '{}' ({})", removed.title, id);
        Ok(removed)
    }

    /// Stop tracking the entry with `title`
    pub fn remove_by_title(&self, title: &str) -> Result<SaveEntry> {
        let id = self
            .find_by_title(title)
            .ok_or_else(|| SaveError::TitleNotFound(title.to_string()))?;
        self.remove_entry(id)
    }

    /// Snapshot of tracked entries in registry order
    pub fn list_entries(&self) -> Vec<TrackedEntry> {
        self.registry.read().list_entries()
    }

    /// Id of the entry with `title`
    pub fn find_by_title(&self, title: &str) -> Option<EntryId> {
        self.registry.read().find_by_title(title)
    }

    /// Look up one entry
    pub fn get_entry(&self, id: EntryId) -> Option<TrackedEntry> {
        self.registry.read().get(id).cloned()
    }

    /// Write the registry to the manifest
    ///
    /// Waits for an active run to finish.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.run_guard.lock();
        let entries = self.registry.read().to_manifest();
        self.write_manifest(&entries)
    }

    /// Token that cancels the current (or next) run's remaining entries
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether a run is active
    pub fn is_running(&self) -> bool {
        self.run_guard.is_locked()
    }

    /// Back up every tracked entry
    ///
    /// Entry failures are reported in the [`RunReport`], never as an error.
    ///
    /// # Errors
    ///
    /// - [`SaveError::RunInProgress`] if another run is active
    /// - [`SaveError::PersistFailed`] if the manifest could not be written;
    ///   it carries the report of what was copied, and the in-memory
    ///   registry keeps its previous timestamps
    pub fn backup_all(&self) -> Result<RunReport> {
        self.run(None)
    }

    /// [`SaveManager::backup_all`], reporting each finished entry to `callback`
    pub fn backup_all_with_progress(&self, callback: ProgressCallback) -> Result<RunReport> {
        self.run(Some(callback))
    }

    #[instrument(skip(self, progress), fields(root = ?self.config.backup_root))]
    fn run(&self, progress: Option<ProgressCallback>) -> Result<RunReport> {
        let _guard = self.run_guard.try_lock().ok_or(SaveError::RunInProgress)?;
        self.cancel.reset();

        let started_at = Utc::now();
        let clock = Instant::now();
        let snapshot = self.registry.read().list_entries();
        info!("Backing up {} entries", snapshot.len());

        let processed = AtomicUsize::new(0);
        let bytes = AtomicU64::new(0);
        let states: Vec<EntryState> = self.pool.install(|| {
            snapshot
                .par_iter()
                .map(|tracked| {
                    if self.cancel.is_cancelled() {
                        debug!("Not starting '{}', run was cancelled", tracked.entry.title);
                        return EntryState::Cancelled;
                    }

                    let state = self.reconcile_entry(tracked);
                    if let Some(callback) = &progress {
                        let copied = match &state {
                            EntryState::Succeeded(outcome) | EntryState::Failed(_, Some(outcome)) => {
                                outcome.bytes_copied
                            }
                            _ => 0,
                        };
                        callback(ProgressInfo {
                            operation: "Backing up".to_string(),
                            current_item: Some(tracked.entry.title.clone()),
                            processed: processed.fetch_add(1, Ordering::Relaxed) + 1,
                            total: snapshot.len(),
                            bytes_processed: bytes.fetch_add(copied, Ordering::Relaxed) + copied,
                        });
                    }
                    state
                })
                .collect()
        });

        let mut staged = self.registry.read().clone();
        let mut report = RunReport {
            started_at,
            ..Default::default()
        };
        for (tracked, state) in snapshot.iter().zip(states) {
            match state {
                EntryState::Succeeded(outcome) => {
                    staged.record_backup(tracked.id, started_at)?;
                    report.files_copied += outcome.files_copied;
                    report.bytes_copied += outcome.bytes_copied;
                    report.succeeded.push(tracked.entry.title.clone());
                }
                EntryState::Failed(failed, outcome) => {
                    if let Some(outcome) = outcome {
                        report.files_copied += outcome.files_copied;
                        report.bytes_copied += outcome.bytes_copied;
                    }
                    report.failed.push(failed);
                }
                EntryState::Cancelled => report.cancelled.push(tracked.entry.title.clone()),
            }
        }
        report.duration_ms = clock.elapsed().as_millis() as u64;

        if let Err(e) = self.write_manifest(&staged.to_manifest()) {
            error!("Backup finished but the manifest could not be written: {}", e);
            return Err(SaveError::PersistFailed {
                path: self.manifest.path().to_path_buf(),
                reason: e.to_string(),
                report: Box::new(report),
            });
        }
        *self.registry.write() = staged;

        info!(
            "Backup finished in {}ms: {} succeeded, {} failed, {} cancelled",
            report.duration_ms,
            report.succeeded.len(),
            report.failed.len(),
            report.cancelled.len()
        );
        Ok(report)
    }

    fn reconcile_entry(&self, tracked: &TrackedEntry) -> EntryState {
        let entry = &tracked.entry;
        let span = info_span!("entry", id = %tracked.id, title = %entry.title);
        let _enter = span.enter();

        let failed = |reason: String| {
            warn!("'{}' failed: {}", entry.title, reason);
            EntryState::Failed(
                FailedEntry {
                    title: entry.title.clone(),
                    reason,
                    failed_paths: Vec::new(),
                },
                None,
            )
        };

        let (source, mirror) = match self.resolve(entry) {
            Ok(paths) => paths,
            Err(e) => return failed(e.to_string()),
        };

        let plan = match self.planner.plan(&source, &mirror) {
            Ok(plan) => plan,
            Err(SaveError::SourceMissing { path }) => return failed(format!("source missing: {:?}", path)),
            Err(e) => return failed(e.to_string()),
        };

        let outcome = self.executor.execute(&plan);
        if outcome.succeeded() {
            debug!("'{}' mirrored to {:?}", entry.title, mirror);
            EntryState::Succeeded(outcome)
        } else {
            let reason = format!(
                "{} of {} paths failed",
                outcome.failed_paths.len(),
                plan.actions.len() + plan.unreadable.len()
            );
            warn!("'{}' failed: {}", entry.title, reason);
            EntryState::Failed(
                FailedEntry {
                    title: entry.title.clone(),
                    reason,
                    failed_paths: outcome.failed_paths.clone(),
                },
                Some(outcome),
            )
        }
    }

    /// Compare an entry's mirror with its source
    ///
    /// # Errors
    ///
    /// - [`SaveError::EntryNotFound`] for an unknown id
    /// - [`SaveError::SourceMissing`] if the source folder is gone
    pub fn verify_entry(&self, id: EntryId) -> Result<VerificationReport> {
        let tracked = self.get_entry(id).ok_or(SaveError::EntryNotFound(id))?;
        let (source, mirror) = self.resolve(&tracked.entry)?;
        self.pool
            .install(|| MirrorVerifier::new(&self.planner).verify(&tracked.entry.title, &source, &mirror))
    }

    fn resolve(&self, entry: &SaveEntry) -> Result<(PathBuf, PathBuf)> {
        let source = entry.resolved_source()?;
        let mirror = source
            .file_name()
            .map(|name| self.config.backup_root.join(name))
            .ok_or_else(|| SaveError::invalid_entry(format!("{:?} has no folder name to mirror into", source)))?;
        Ok((source, mirror))
    }

    fn write_manifest(&self, entries: &[SaveEntry]) -> Result<()> {
        fs::create_dir_all(&self.config.backup_root)?;
        self.manifest.persist(entries)
    }
}

/// Builder for configuring a [`SaveManager`]
///
/// # Default Values
///
/// - `parallel_workers`: Number of CPU cores
/// - `follow_symlinks`: false
/// - `exclude_patterns`: Empty
#[derive(Debug)]
pub struct SaveManagerBuilder {
    parallel_workers: usize,
    follow_symlinks: bool,
    exclude_patterns: Vec<String>,
}

impl SaveManagerBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            parallel_workers: num_cpus::get(),
            follow_symlinks: false,
            exclude_patterns: Vec::new(),
        }
    }

    /// Set number of worker threads
    ///
    /// Used both for entries and for the copies inside an entry. Values
    /// below 1 are raised to 1.
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.parallel_workers = count.max(1);
        self
    }

    /// Mirror the contents of symlinked directories
    ///
    /// When false, symlinked directories are skipped and listed in the
    /// outcome. Symlinked files are copied by content either way.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Glob patterns, relative to each source folder, that are never copied
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Open `backup_root` with this configuration
    ///
    /// # Errors
    ///
    /// - [`SaveError::InvalidPattern`] if an exclude pattern does not compile
    /// - [`SaveError::ThreadPool`] if the worker pool cannot start
    /// - anything [`SaveManager::open`] returns
    pub fn build(self, backup_root: impl AsRef<Path>) -> Result<SaveManager> {
        let backup_root = std::path::absolute(backup_root.as_ref())?;

        let planner = SyncPlanner::new()
            .with_follow_symlinks(self.follow_symlinks)
            .with_exclude_patterns(&self.exclude_patterns)?
            .with_protected_root(backup_root.clone());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallel_workers)
            .thread_name(|index| format!("savekeep-worker-{}", index))
            .build()?;

        let config = ManagerConfig {
            backup_root,
            parallel_workers: self.parallel_workers,
            follow_symlinks: self.follow_symlinks,
            exclude_patterns: self.exclude_patterns,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        SaveManager::init(config, planner, Arc::new(pool))
    }
}

impl Default for SaveManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Applying a [`SyncPlan`] to disk
//!
//! Directory actions run first and in plan order, so every copy finds its
//! parent directory in place. Copies then run in parallel on the executor's
//! thread pool. A failed action is recorded in the [`SyncOutcome`] and the
//! remaining actions still run.
//!
//! The executor only creates and overwrites. It never deletes anything in
//! the mirror, and it refuses to write through a directory or a symlink
//! sitting where a file copy should land.

use crate::types::{FailedPath, SyncAction, SyncOutcome, SyncPlan};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Executes plans on a shared thread pool
#[derive(Debug, Clone)]
pub struct SyncExecutor {
    pool: Arc<ThreadPool>,
}

impl SyncExecutor {
    /// Executor running copies on `pool`
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self { pool }
    }

    /// Apply `plan` and report what happened
    pub fn execute(&self, plan: &SyncPlan) -> SyncOutcome {
        let mut outcome = SyncOutcome {
            failed_paths: plan.unreadable.clone(),
            skipped: plan.skipped.clone(),
            ..Default::default()
        };

        let mut copies = Vec::new();
        for action in &plan.actions {
            match action {
                SyncAction::CreateDir { target } => match fs::create_dir_all(target) {
                    Ok(()) => outcome.directories_created += 1,
                    Err(e) => {
                        warn!("Failed to create {:?}: {}", target, e);
                        outcome.failed_paths.push(FailedPath::new(target, e));
                    }
                },
                SyncAction::CopyFile { source, target, .. } => copies.push((source, target)),
            }
        }

        let results: Vec<Result<u64, FailedPath>> = self.pool.install(|| {
            copies
                .par_iter()
                .map(|(source, target)| copy_file(source, target))
                .collect()
        });

        for result in results {
            match result {
                Ok(bytes) => {
                    outcome.files_copied += 1;
                    outcome.bytes_copied += bytes;
                }
                Err(failed) => outcome.failed_paths.push(failed),
            }
        }

        debug!(
            "Mirrored {:?}: {} files ({} bytes), {} failures",
            plan.target_root,
            outcome.files_copied,
            outcome.bytes_copied,
            outcome.failed_paths.len()
        );
        outcome
    }
}

fn copy_file(source: &Path, target: &Path) -> Result<u64, FailedPath> {
    if let Ok(existing) = fs::symlink_metadata(target) {
        if existing.is_dir() {
            return Err(FailedPath::new(target, "a directory is in the way of the copy"));
        }
        if existing.file_type().is_symlink() {
            return Err(FailedPath::new(target, "a symlink is in the way of the copy"));
        }
    }

    match fs::copy(source, target) {
        Ok(bytes) => {
            trace!("Copied {:?} -> {:?} ({} bytes)", source, target, bytes);
            Ok(bytes)
        }
        Err(e) => {
            warn!("Failed to copy {:?} -> {:?}: {}", source, target, e);
            Err(FailedPath::new(target, e))
        }
    }
}

//! Mirror verification
//!
//! Checks that an entry's mirror holds the same bytes as its source. The
//! source is planned exactly as a backup would plan it, so exclusions and
//! symlink handling match, and every planned file is then hashed on both
//! sides with SHA-256.
//!
//! Verification only reads. Files present in the mirror but not in the
//! source are not reported, since backups never delete them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use savekeep::SaveManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SaveManager::open("./Backups")?;
//! if let Some(id) = manager.find_by_title("Game1") {
//!     let report = manager.verify_entry(id)?;
//!     println!("{}", report.summary());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::planner::SyncPlanner;
use crate::types::{FailedPath, SyncAction};
use crate::utils;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Verifies mirrors against their sources
#[derive(Debug)]
pub struct MirrorVerifier<'a> {
    planner: &'a SyncPlanner,
}

impl<'a> MirrorVerifier<'a> {
    /// Verifier planning sources with `planner`
    pub fn new(planner: &'a SyncPlanner) -> Self {
        Self { planner }
    }

    /// Compare `source_root` with `mirror_root`
    ///
    /// # Errors
    ///
    /// Returns an error only if the source cannot be planned (for example
    /// [`SaveError::SourceMissing`](crate::SaveError::SourceMissing)).
    /// Differences are reported in the result, not as errors.
    pub fn verify(&self, title: &str, source_root: &Path, mirror_root: &Path) -> Result<VerificationReport> {
        let start = Instant::now();
        let plan = self.planner.plan(source_root, mirror_root)?;
        let mut report = VerificationReport::new(title, source_root, mirror_root);
        report.unreadable = plan.unreadable.clone();

        for action in &plan.actions {
            if let SyncAction::CreateDir { target } = action {
                if !target.is_dir() {
                    report.missing.push(target.clone());
                }
            }
        }

        debug!("Hashing {} files of '{}'", plan.file_count(), title);
        let checks: Vec<FileCheck> = plan
            .actions
            .par_iter()
            .filter_map(|action| match action {
                SyncAction::CopyFile { source, target, .. } => Some(check_file(source, target)),
                SyncAction::CreateDir { .. } => None,
            })
            .collect();

        for check in checks {
            report.files_checked += 1;
            match check {
                FileCheck::Verified => report.verified += 1,
                FileCheck::Missing(path) => report.missing.push(path),
                FileCheck::Mismatched(path) => report.mismatched.push(path),
                FileCheck::Unreadable(failed) => report.unreadable.push(failed),
            }
        }

        report.verification_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Verified '{}' in {}ms: {} / {} files match",
            title, report.verification_time_ms, report.verified, report.files_checked
        );
        Ok(report)
    }
}

enum FileCheck {
    Verified,
    Missing(PathBuf),
    Mismatched(PathBuf),
    Unreadable(FailedPath),
}

fn check_file(source: &Path, target: &Path) -> FileCheck {
    if !target.is_file() {
        return FileCheck::Missing(target.to_path_buf());
    }
    let source_hash = match utils::hash_file_content(source) {
        Ok(hash) => hash,
        Err(e) => return FileCheck::Unreadable(FailedPath::new(source, e)),
    };
    match utils::hash_file_content(target) {
        Ok(hash) if hash == source_hash => FileCheck::Verified,
        Ok(_) => FileCheck::Mismatched(target.to_path_buf()),
        Err(e) => FileCheck::Unreadable(FailedPath::new(target, e)),
    }
}

/// Result of verifying one mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Entry title
    pub title: String,
    /// Source directory
    pub source_root: PathBuf,
    /// Mirror directory
    pub mirror_root: PathBuf,
    /// Source files compared
    pub files_checked: usize,
    /// Files whose mirror matches byte for byte
    pub verified: usize,
    /// Mirror paths that should exist but do not
    pub missing: Vec<PathBuf>,
    /// Mirror files whose content differs from the source
    pub mismatched: Vec<PathBuf>,
    /// Paths that could not be read on either side
    pub unreadable: Vec<FailedPath>,
    /// Time taken for verification in milliseconds
    pub verification_time_ms: u64,
}

impl VerificationReport {
    fn new(title: &str, source_root: &Path, mirror_root: &Path) -> Self {
        Self {
            title: title.to_string(),
            source_root: source_root.to_path_buf(),
            mirror_root: mirror_root.to_path_buf(),
            files_checked: 0,
            verified: 0,
            missing: Vec::new(),
            mismatched: Vec::new(),
            unreadable: Vec::new(),
            verification_time_ms: 0,
        }
    }

    /// True if the mirror holds every source file unchanged
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty() && self.unreadable.is_empty()
    }

    /// Get a summary of the verification
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!(
                "'{}' is up to date ({} files verified in {}ms)",
                self.title, self.files_checked, self.verification_time_ms
            )
        } else {
            let issues = [
                (!self.missing.is_empty()).then(|| format!("{} missing", self.missing.len())),
                (!self.mismatched.is_empty()).then(|| format!("{} changed", self.mismatched.len())),
                (!self.unreadable.is_empty()).then(|| format!("{} unreadable", self.unreadable.len())),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");

            format!(
                "'{}' differs from its source: {} ({}/{} files match)",
                self.title, issues, self.verified, self.files_checked
            )
        }
    }
}

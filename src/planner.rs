//! Planning the mirror of one source tree
//!
//! [`SyncPlanner::plan`] walks a source directory and produces a
//! [`SyncPlan`]: the target root, one directory creation per source
//! directory, and one copy per regular file, each mapped onto the target by
//! swapping the root prefix.
//!
//! ## Ordering
//!
//! The walk is pre-order, so a directory's `CreateDir` always precedes the
//! actions that write into it. Siblings carry no ordering.
//!
//! ## What is left out
//!
//! - Paths matching an exclude pattern (relative to the source root) are not
//!   planned at all, and excluded directories are not descended.
//! - Symlinked directories are listed in [`SyncPlan::skipped`] unless
//!   symlinks are followed. Symlinked files are always copied by content.
//! - Sockets, FIFOs and devices are listed in `skipped`.
//! - Anything the walk cannot read goes to [`SyncPlan::unreadable`], which
//!   makes the entry fail without stopping the rest of the plan.
//! - The backup root and the target itself are never walked when they sit
//!   inside the source tree.

use crate::error::{Result, SaveError};
use crate::types::{FailedPath, SkippedPath, SyncAction, SyncPlan};
use crate::utils;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::{DirEntry, WalkDir};

/// Computes [`SyncPlan`]s
#[derive(Debug, Clone)]
pub struct SyncPlanner {
    follow_symlinks: bool,
    excludes: GlobSet,
    protected_roots: Vec<PathBuf>,
}

impl SyncPlanner {
    /// Planner that does not follow symlinked directories and excludes nothing
    pub fn new() -> Self {
        Self {
            follow_symlinks: false,
            excludes: GlobSet::empty(),
            protected_roots: Vec::new(),
        }
    }

    /// Traverse directories behind symlinks
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Never mirror paths matching these globs
    ///
    /// # Errors
    ///
    /// - [`SaveError::InvalidPattern`] if a pattern does not compile
    pub fn with_exclude_patterns(mut self, patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        self.excludes = builder.build()?;
        Ok(self)
    }

    /// Never walk into `root`, even when it lies inside a source tree
    pub fn with_protected_root(mut self, root: PathBuf) -> Self {
        self.protected_roots.push(root);
        self
    }

    /// Plan the mirror of `source_root` onto `target_root`
    ///
    /// # Errors
    ///
    /// - [`SaveError::SourceMissing`] if `source_root` is absent or not a
    ///   directory
    /// - [`SaveError::InvalidEntry`] if the source lies inside its own mirror,
    ///   where copying would overwrite the files being read
    pub fn plan(&self, source_root: &Path, target_root: &Path) -> Result<SyncPlan> {
        match fs::metadata(source_root) {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(SaveError::SourceMissing {
                    path: source_root.to_path_buf(),
                })
            }
        }
        self.check_overlap(source_root, target_root)?;

        let mut plan = SyncPlan {
            source_root: source_root.to_path_buf(),
            target_root: target_root.to_path_buf(),
            actions: vec![SyncAction::CreateDir {
                target: target_root.to_path_buf(),
            }],
            ..Default::default()
        };

        // A protected root that holds the whole source cannot be inside it
        let guarded: Vec<&Path> = self
            .protected_roots
            .iter()
            .map(PathBuf::as_path)
            .filter(|root| !contains(root, source_root))
            .collect();

        let walker = WalkDir::new(source_root)
            .min_depth(1)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry, source_root, target_root, &guarded));

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| source_root.to_path_buf());
                    warn!("Cannot read {:?}: {}", path, e);
                    plan.unreadable.push(FailedPath::new(path, e));
                    continue;
                }
            };

            let target = utils::rebase(entry.path(), source_root, target_root)?;
            let file_type = entry.file_type();

            if file_type.is_dir() {
                plan.actions.push(SyncAction::CreateDir { target });
            } else if file_type.is_file() {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                plan.actions.push(SyncAction::CopyFile {
                    source: entry.path().to_path_buf(),
                    target,
                    size,
                });
            } else if file_type.is_symlink() {
                self.plan_symlink(&mut plan, &entry, target);
            } else {
                plan.skipped.push(SkippedPath {
                    path: entry.path().to_path_buf(),
                    reason: "not a regular file or directory".to_string(),
                });
            }
        }

        debug!(
            "Planned {:?} -> {:?}: {} directories, {} files, {} skipped, {} unreadable",
            source_root,
            target_root,
            plan.directory_count(),
            plan.file_count(),
            plan.skipped.len(),
            plan.unreadable.len()
        );
        Ok(plan)
    }

    fn plan_symlink(&self, plan: &mut SyncPlan, entry: &DirEntry, target: PathBuf) {
        let path = entry.path();
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                trace!("Copying content behind symlink {:?}", path);
                plan.actions.push(SyncAction::CopyFile {
                    source: path.to_path_buf(),
                    target,
                    size: meta.len(),
                });
            }
            Ok(meta) if meta.is_dir() => {
                plan.skipped.push(SkippedPath {
                    path: path.to_path_buf(),
                    reason: "symlinked directory (enable follow_symlinks to mirror it)".to_string(),
                });
            }
            Ok(_) => {
                plan.skipped.push(SkippedPath {
                    path: path.to_path_buf(),
                    reason: "symlink to a special file".to_string(),
                });
            }
            Err(e) => {
                warn!("Dangling symlink {:?}: {}", path, e);
                plan.unreadable.push(FailedPath::new(path, format!("dangling symlink: {}", e)));
            }
        }
    }

    fn is_excluded(&self, entry: &DirEntry, source_root: &Path, target_root: &Path, guarded: &[&Path]) -> bool {
        let path = entry.path();
        if path.starts_with(target_root) || guarded.iter().any(|root| path.starts_with(root)) {
            debug!("Not walking into backup location {:?}", path);
            return true;
        }
        path.strip_prefix(source_root)
            .map(|relative| self.excludes.is_match(relative))
            .unwrap_or(false)
    }

    fn check_overlap(&self, source_root: &Path, target_root: &Path) -> Result<()> {
        if contains(target_root, source_root) {
            return Err(SaveError::invalid_entry(format!(
                "source {:?} lies inside its own backup folder {:?}",
                source_root, target_root
            )));
        }
        Ok(())
    }
}

/// Whether `path` is `root` or lies under it, as written or after resolving links
fn contains(root: &Path, path: &Path) -> bool {
    if path.starts_with(root) {
        return true;
    }
    match (fs::canonicalize(root), fs::canonicalize(path)) {
        (Ok(root), Ok(path)) => path.starts_with(root),
        _ => false,
    }
}

impl Default for SyncPlanner {
    fn default() -> Self {
        Self::new()
    }
}

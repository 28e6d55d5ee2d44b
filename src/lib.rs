//! # savekeep - mirrored backups of save-game folders
//!
//! Tracks a set of named source directories, mirrors each one into a backup
//! root, and keeps a JSON manifest next to the mirrors recording where every
//! entry came from and when it was last backed up in full.
//!
//! ## Overview
//!
//! The copy itself is simple. What the crate takes care of is keeping the
//! manifest and the mirrors consistent across repeated runs:
//! - A run records a backup time only for entries whose every file copied
//! - The manifest is written once per run, atomically, after all copying
//! - A missing, empty or corrupt manifest never stops the program; a corrupt
//!   one is moved aside so its entries can be recovered
//! - Nothing in the backup root is ever deleted
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use savekeep::SaveManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SaveManager::open("./Backups")?;
//! manager.add_entry("Game1", "/home/me/.local/share/game1", "PC")?;
//! manager.persist()?;
//!
//! let report = manager.backup_all()?;
//! print!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout of a backup root
//!
//! ```text
//! Backups/
//! ├── savemanifest.json
//! ├── game1/          mirror of /home/me/.local/share/game1
//! └── Saves/          mirror of C:\Games\Other\Saves
//! ```
//!
//! Each mirror is named after the final component of its source path.
//! Two entries may not share a mirror name.
//!
//! ## Module Organization
//!
//! - [`manager`]: the reconciliation engine and its builder
//! - [`registry`]: in-memory list of tracked entries
//! - [`manifest`]: loading, repairing and writing the manifest
//! - [`planner`] and [`executor`]: mirroring one source tree
//! - [`verification`]: comparing mirrors with their sources
//! - [`settings`]: per-user settings for front ends
//! - [`types`]: common types and data structures
//! - [`error`]: error types and handling

// Public API modules
pub mod error;
pub mod executor;
pub mod manager;
pub mod manifest;
pub mod planner;
pub mod registry;
pub mod settings;
pub mod types;
pub mod verification;

// Internal modules (not part of public API)
mod utils;

// Re-export main types for convenience
pub use error::{Result, SaveError};
pub use manager::{CancellationToken, SaveManager, SaveManagerBuilder};
pub use manifest::{ManifestDiagnostic, ManifestLoad, ManifestStore, MANIFEST_FILE_NAME};
pub use registry::SaveEntryRegistry;
pub use settings::AppSettings;
pub use types::*;
pub use verification::{MirrorVerifier, VerificationReport};

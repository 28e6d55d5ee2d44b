//! Per-user settings
//!
//! Remembers the backup root chosen by the user across runs, along with the
//! engine options a front end should apply when it opens that root. Stored
//! as pretty JSON at `<config dir>/savekeep/settings.json`.
//!
//! Settings are a convenience: a missing or broken settings file never stops
//! the program, it just means defaults.

use crate::error::Result;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Folder under the working directory used when no backup root is configured
pub const DEFAULT_BACKUP_DIR: &str = "Backups";

const SETTINGS_FILE_NAME: &str = "settings.json";

/// Persisted user settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Last chosen backup root
    pub backup_root: Option<PathBuf>,
    /// Glob patterns never mirrored
    pub exclude_patterns: Vec<String>,
    /// Mirror symlinked directories
    pub follow_symlinks: bool,
    /// Worker threads; number of CPU cores when unset
    pub parallel_workers: Option<usize>,
}

impl AppSettings {
    /// Default settings file, if the platform has a config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("savekeep").join(SETTINGS_FILE_NAME))
    }

    /// Load settings from `path`
    ///
    /// Returns defaults if the file does not exist or cannot be parsed.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => {
                    debug!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    warn!("Ignoring unparseable settings {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {:?}, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("Cannot read settings {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Write settings to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        utils::atomic_write(path, &json)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Backup root to use
    ///
    /// An explicit override wins, then the stored root, then
    /// `<working dir>/Backups`.
    pub fn resolve_backup_root(&self, cli_override: Option<&Path>) -> Result<PathBuf> {
        let chosen = match (cli_override, &self.backup_root) {
            (Some(root), _) => root.to_path_buf(),
            (None, Some(root)) => root.clone(),
            (None, None) => PathBuf::from(DEFAULT_BACKUP_DIR),
        };
        Ok(std::path::absolute(chosen)?)
    }
}

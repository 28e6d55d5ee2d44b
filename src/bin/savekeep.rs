//! # savekeep CLI - keep mirrored copies of your save folders
//!
//! Command-line front end for the savekeep library.
//!
//! ## Features
//! - Track save folders by title and platform
//! - Mirror every tracked folder into one backup root
//! - Check mirrors against their sources
//! - Remember the chosen backup root between runs
//!
//! ## Usage
//! ```bash
//! # Choose where backups go (remembered)
//! savekeep set-root /mnt/usb/Backups
//!
//! # Track a save folder
//! savekeep add ~/.local/share/Game1 --title "Game1" --platform PC
//!
//! # Back everything up
//! savekeep backup --progress
//!
//! # Compare mirrors with their sources
//! savekeep verify
//! ```
//!
//! Exit status is 0 on success, 1 on error, and 2 when a backup or a
//! verification finished but found failing entries.

use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use savekeep::manifest::DiagnosticKind;
use savekeep::{AppSettings, ProgressInfo, Result, RunReport, SaveError, SaveManager, SaveManagerBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// savekeep CLI - mirrored backups of save-game folders
#[derive(Parser)]
#[command(name = "savekeep")]
#[command(version)]
#[command(about = "Mirror tracked save folders into a backup root")]
#[command(long_about = None)]
struct Cli {
    /// Backup root (defaults to the stored setting, then ./Backups)
    #[arg(short, long, global = true, env = "SAVEKEEP_ROOT")]
    root: Option<PathBuf>,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remember a backup root for later runs
    SetRoot {
        /// Directory holding the manifest and mirrors
        dir: PathBuf,
    },

    /// Track a save folder
    Add {
        /// Save folder to back up
        path: PathBuf,

        /// Display title (defaults to the folder name)
        #[arg(short, long)]
        title: Option<String>,

        /// Platform tag
        #[arg(short, long, default_value = "")]
        platform: String,
    },

    /// Stop tracking a save folder (its backup stays on disk)
    #[command(alias = "rm")]
    Remove {
        /// Title of the entry
        title: String,
    },

    /// List tracked save folders
    #[command(alias = "ls")]
    List {
        /// Show source and mirror paths
        #[arg(short, long)]
        detailed: bool,
    },

    /// Back up every tracked save folder
    Backup {
        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// Compare mirrors with their sources
    Verify {
        /// Only this entry
        title: Option<String>,
    },

    /// Show backup root status
    Status,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e.user_message());
            std::process::exit(1);
        }
    }
}

/// Main command runner; `Ok(false)` means some entries failed
fn run(cli: Cli) -> Result<bool> {
    let settings_path = cli.settings.or_else(AppSettings::default_path);
    let settings = settings_path
        .as_deref()
        .map(AppSettings::load_from)
        .unwrap_or_default();
    let root = settings.resolve_backup_root(cli.root.as_deref())?;

    match cli.command {
        Commands::SetRoot { dir } => cmd_set_root(settings, settings_path, dir).map(|_| true),
        Commands::Add { path, title, platform } => {
            cmd_add(&settings, &root, path, title, platform).map(|_| true)
        }
        Commands::Remove { title } => cmd_remove(&settings, &root, &title).map(|_| true),
        Commands::List { detailed } => cmd_list(&settings, &root, detailed).map(|_| true),
        Commands::Backup { progress } => cmd_backup(&settings, &root, progress),
        Commands::Verify { title } => cmd_verify(&settings, &root, title),
        Commands::Status => cmd_status(&settings, &root).map(|_| true),
    }
}

/// Store the backup root in the settings file
fn cmd_set_root(mut settings: AppSettings, settings_path: Option<PathBuf>, dir: PathBuf) -> Result<()> {
    let settings_path = settings_path
        .ok_or_else(|| SaveError::internal("No config directory on this system. Pass --settings <file>."))?;
    let dir = std::path::absolute(dir)?;
    if dir.exists() && !dir.is_dir() {
        return Err(SaveError::internal(format!("{} is not a directory", dir.display())));
    }

    settings.backup_root = Some(dir.clone());
    settings.save_to(&settings_path)?;

    println!("{} Backup root set to {}", "✓".green().bold(), dir.display().to_string().cyan());
    println!("  Settings: {}", settings_path.display());
    Ok(())
}

/// Register a new save folder
fn cmd_add(
    settings: &AppSettings,
    root: &Path,
    path: PathBuf,
    title: Option<String>,
    platform: String,
) -> Result<()> {
    let manager = open_manager(settings, root)?;

    let path = std::path::absolute(path)?;
    if !path.is_dir() {
        println!(
            "{} {} does not exist yet; backups of it will fail until it does",
            "⚠".yellow().bold(),
            path.display()
        );
    }
    let title = title.unwrap_or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let id = manager.add_entry(title, &path, platform)?;
    manager.persist()?;

    let tracked = manager
        .get_entry(id)
        .ok_or(SaveError::EntryNotFound(id))?;
    println!("{} Tracking {}", "✓".green().bold(), tracked.entry.title.yellow().bold());
    println!("  Source: {}", path.display().to_string().cyan());
    if let Some(mirror) = tracked.entry.mirror_path(manager.backup_root()) {
        println!("  Mirror: {}", mirror.display().to_string().cyan());
    }
    Ok(())
}

/// Stop tracking a save folder
fn cmd_remove(settings: &AppSettings, root: &Path, title: &str) -> Result<()> {
    let manager = open_manager(settings, root)?;
    let removed = manager.remove_by_title(title)?;
    manager.persist()?;

    println!("{} No longer tracking {}", "✓".green().bold(), removed.title.yellow());
    if let Some(mirror) = removed.mirror_path(manager.backup_root()) {
        if mirror.exists() {
            println!("  Backup kept at {}", mirror.display().to_string().dimmed());
        }
    }
    Ok(())
}

/// List tracked entries
fn cmd_list(settings: &AppSettings, root: &Path, detailed: bool) -> Result<()> {
    let manager = open_manager(settings, root)?;
    let entries = manager.list_entries();

    if entries.is_empty() {
        println!("{}", "No save folders tracked".yellow());
        println!("  Add one with: {}", "savekeep add <path> --title <name>".yellow());
        return Ok(());
    }

    println!("{}", format!("{} tracked save folders:", entries.len()).bold());
    for tracked in &entries {
        let entry = &tracked.entry;
        let last_backup = match entry.last_backup {
            Some(_) => entry.last_backup_display().green(),
            None => entry.last_backup_display().red(),
        };
        let platform = if entry.platform.is_empty() {
            String::new()
        } else {
            format!(" [{}]", entry.platform)
        };

        println!("  {}{}  {}", entry.title.yellow().bold(), platform.dimmed(), last_backup);
        if detailed {
            println!("    Source: {}", entry.original_path.display());
            if let Some(mirror) = entry.mirror_path(manager.backup_root()) {
                println!("    Mirror: {}", mirror.display());
            }
        }
    }
    Ok(())
}

/// Back up every tracked entry
fn cmd_backup(settings: &AppSettings, root: &Path, show_progress: bool) -> Result<bool> {
    let manager = open_manager(settings, root)?;
    let total = manager.list_entries().len();
    if total == 0 {
        println!("{}", "No save folders tracked".yellow());
        return Ok(true);
    }

    println!("{} {} save folders into {}", "Backing up".blue().bold(), total, root.display().to_string().cyan());

    let start = Instant::now();
    let result = if show_progress {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("=> "),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        let bar = pb.clone();
        let result = manager.backup_all_with_progress(Arc::new(move |info: ProgressInfo| {
            bar.set_position(info.processed as u64);
            if let Some(item) = info.current_item {
                bar.set_message(item);
            }
        }));
        pb.finish_and_clear();
        result
    } else {
        manager.backup_all()
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let SaveError::PersistFailed { report, .. } = &e {
                print_report(report, start.elapsed());
            }
            return Err(e);
        }
    };

    print_report(&report, start.elapsed());
    Ok(report.failed.is_empty())
}

fn print_report(report: &RunReport, elapsed: Duration) {
    if report.succeeded.is_empty() {
        println!("{}", "No save folders were backed up".yellow());
    } else {
        println!("{} Backed up:", "✓".green().bold());
        for title in &report.succeeded {
            println!("  - {}", title.green());
        }
    }

    if !report.failed.is_empty() {
        println!("{} Failed:", "✗".red().bold());
        for failed in &report.failed {
            println!("  - {}: {}", failed.title.red(), failed.reason);
            for path in failed.failed_paths.iter().take(5) {
                println!("      {} ({})", path.path.display().to_string().dimmed(), path.reason);
            }
            if failed.failed_paths.len() > 5 {
                println!("      ... and {} more", failed.failed_paths.len() - 5);
            }
        }
    }

    if !report.cancelled.is_empty() {
        println!("{} Not started:", "⚠".yellow().bold());
        for title in &report.cancelled {
            println!("  - {}", title.yellow());
        }
    }

    println!(
        "  Copied: {} files ({})",
        report.files_copied.to_string().cyan(),
        format_bytes(report.bytes_copied).cyan()
    );
    println!("  Time: {}", format_duration(truncate_millis(elapsed)).to_string().cyan());
}

/// Compare mirrors with their sources
fn cmd_verify(settings: &AppSettings, root: &Path, title: Option<String>) -> Result<bool> {
    let manager = open_manager(settings, root)?;
    let ids = match title {
        Some(title) => vec![manager
            .find_by_title(&title)
            .ok_or(SaveError::TitleNotFound(title))?],
        None => manager.list_entries().into_iter().map(|tracked| tracked.id).collect(),
    };

    println!("{}", "Verifying mirrors...".blue().bold());
    let mut all_valid = true;
    for id in ids {
        match manager.verify_entry(id) {
            Ok(report) if report.is_valid() => {
                println!("  {} {}", "✓".green().bold(), report.summary());
            }
            Ok(report) => {
                all_valid = false;
                println!("  {} {}", "✗".red().bold(), report.summary());
                for path in report.missing.iter().take(5) {
                    println!("      missing {}", path.display().to_string().dimmed());
                }
                for path in report.mismatched.iter().take(5) {
                    println!("      changed {}", path.display().to_string().dimmed());
                }
            }
            Err(e) => {
                all_valid = false;
                let title = manager
                    .get_entry(id)
                    .map(|tracked| tracked.entry.title)
                    .unwrap_or_else(|| id.to_string());
                println!("  {} {}: {}", "✗".red().bold(), title, e.user_message());
            }
        }
    }
    Ok(all_valid)
}

/// Show backup root status
fn cmd_status(settings: &AppSettings, root: &Path) -> Result<()> {
    let manager = open_manager(settings, root)?;
    let entries = manager.list_entries();

    println!("{}", "savekeep Status:".blue().bold());
    println!();
    println!("{}", "Backup root:".bold());
    println!("  Location: {}", manager.backup_root().display());
    println!("  Manifest: {}", manager.manifest_path().display());
    let (size, unreadable) = directory_size(manager.backup_root());
    if unreadable > 0 {
        println!("  Size: {} ({} paths unreadable)", format_bytes(size), unreadable.to_string().yellow());
    } else {
        println!("  Size: {}", format_bytes(size));
    }

    let never: Vec<_> = entries.iter().filter(|t| t.entry.last_backup.is_none()).collect();
    let oldest = entries.iter().filter_map(|t| t.entry.last_backup).min();

    println!("\n{}", "Entries:".bold());
    println!("  Tracked: {}", entries.len());
    println!("  Never backed up: {}", never.len());
    if let Some(oldest) = oldest {
        let age = (chrono::Utc::now() - oldest).to_std().unwrap_or_default();
        println!(
            "  Oldest backup: {} ago",
            format_duration(Duration::from_secs(age.as_secs())).to_string().yellow()
        );
    }
    for tracked in never {
        println!("    - {}", tracked.entry.title.red());
    }
    Ok(())
}

/// Open the backup root with the configured engine options
fn open_manager(settings: &AppSettings, root: &Path) -> Result<SaveManager> {
    let mut builder = SaveManagerBuilder::new()
        .follow_symlinks(settings.follow_symlinks)
        .exclude_patterns(settings.exclude_patterns.clone());
    if let Some(workers) = settings.parallel_workers {
        builder = builder.parallel_workers(workers);
    }
    let manager = builder.build(root)?;

    if let Some(diagnostic) = manager.load_diagnostic() {
        if diagnostic.kind != DiagnosticKind::Missing {
            eprintln!("{} {}", "⚠".yellow().bold(), diagnostic);
            if let Some(moved) = &diagnostic.quarantined_to {
                eprintln!("  The old file was kept as {}", moved.display());
            }
        }
    }
    Ok(manager)
}

fn truncate_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Total bytes of regular files under `path`, and how many paths could not be read
fn directory_size(path: &Path) -> (u64, usize) {
    let mut total = 0;
    let mut unreadable = 0;
    for entry in walkdir::WalkDir::new(path) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => match entry.metadata() {
                Ok(meta) => total += meta.len(),
                Err(_) => unreadable += 1,
            },
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Skipping unreadable path in size count: {}", e);
                unreadable += 1;
            }
        }
    }
    (total, unreadable)
}

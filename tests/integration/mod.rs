//! Multi-run integration tests for savekeep
//!
//! Drives a backup root through repeated runs the way a user would: adding
//! entries, changing sources between runs, losing a source, and touching the
//! registry while a run is active.

use ::savekeep::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

/// Source folders plus a backup root
pub struct BackupHarness {
    pub sources: TempDir,
    pub backups: TempDir,
    pub manager: SaveManager,
}

impl BackupHarness {
    pub fn new() -> Self {
        let sources = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let manager = SaveManagerBuilder::new()
            .parallel_workers(4)
            .build(backups.path())
            .unwrap();
        Self {
            sources,
            backups,
            manager,
        }
    }

    /// Create a source folder with `files` and track it
    pub fn track(&self, title: &str, folder: &str, files: &[(&str, &[u8])]) -> (EntryId, PathBuf) {
        let root = self.sources.path().join(folder);
        fs::create_dir_all(&root).unwrap();
        for (path, content) in files {
            write_file(&root.join(path), content);
        }
        let id = self.manager.add_entry(title, &root, "PC").unwrap();
        (id, root)
    }

    pub fn mirror(&self, folder: &str) -> PathBuf {
        self.backups.path().join(folder)
    }

    pub fn last_backup(&self, id: EntryId) -> Option<chrono::DateTime<chrono::Utc>> {
        self.manager.get_entry(id).unwrap().entry.last_backup
    }

    pub fn manifest_on_disk(&self) -> Vec<SaveEntry> {
        ManifestStore::new(self.backups.path()).load().into_entries()
    }
}

pub fn write_file(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Relative path to content for every file under `root`
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[test]
fn test_directory_mirroring() {
    let harness = BackupHarness::new();
    let (_, source) = harness.track(
        "Deep",
        "S",
        &[("a/b/file.txt", b"nested"), ("root.sav", b"top")],
    );
    fs::create_dir_all(source.join("empty/inner")).unwrap();

    let report = harness.manager.backup_all().unwrap();

    assert!(report.is_clean());
    let target = harness.mirror("S");
    assert_eq!(fs::read(target.join("a/b/file.txt")).unwrap(), b"nested");
    assert!(target.join("empty/inner").is_dir());
    assert_eq!(snapshot_tree(&source), snapshot_tree(&target));
}

#[test]
fn test_idempotent_rerun() {
    let harness = BackupHarness::new();
    harness.track("Game1", "game1", &[("save.dat", b"one"), ("cfg/options.ini", b"fov=90")]);
    harness.track("Game2", "game2", &[("slot.sav", b"two")]);

    harness.manager.backup_all().unwrap();
    let first = snapshot_tree(harness.backups.path());

    harness.manager.backup_all().unwrap();
    let second = snapshot_tree(harness.backups.path());

    // Only the manifest timestamps move between runs
    let without_manifest = |tree: &BTreeMap<PathBuf, Vec<u8>>| {
        tree.iter()
            .filter(|(path, _)| path.as_os_str() != MANIFEST_FILE_NAME)
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect::<BTreeMap<_, _>>()
    };
    assert_eq!(without_manifest(&first), without_manifest(&second));
}

#[test]
fn test_partial_failure_isolation() {
    let harness = BackupHarness::new();
    let (a, _) = harness.track("A", "valid", &[("save.dat", b"a")]);
    let (b, b_source) = harness.track("B", "doomed", &[("save.dat", b"b")]);

    // First run backs both up
    harness.manager.backup_all().unwrap();
    let b_first = harness.last_backup(b).unwrap();

    fs::remove_dir_all(&b_source).unwrap();
    let report = harness.manager.backup_all().unwrap();

    assert_eq!(report.succeeded, vec!["A".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].title, "B");
    assert!(report.failed[0].reason.contains("source missing"));

    assert_eq!(harness.last_backup(a), Some(report.started_at));
    assert_eq!(harness.last_backup(b), Some(b_first));

    let on_disk = harness.manifest_on_disk();
    assert_eq!(on_disk[0].last_backup, Some(report.started_at));
    assert_eq!(on_disk[1].last_backup, Some(b_first));

    // B's previous mirror is untouched
    assert_eq!(fs::read(harness.mirror("doomed").join("save.dat")).unwrap(), b"b");
}

#[test]
fn test_timestamp_monotonicity() {
    let harness = BackupHarness::new();
    let (id, _) = harness.track("Game1", "game1", &[("save.dat", b"x")]);

    let mut previous = None;
    for _ in 0..3 {
        harness.manager.backup_all().unwrap();
        let current = harness.last_backup(id);
        assert!(current > previous, "{:?} !> {:?}", current, previous);
        previous = current;
    }
}

#[test]
fn test_source_changes_between_runs() {
    let harness = BackupHarness::new();
    let (_, source) = harness.track("Game1", "game1", &[("slot1.sav", b"v1"), ("slot2.sav", b"v1")]);
    harness.manager.backup_all().unwrap();

    write_file(&source.join("slot1.sav"), b"v2 is longer");
    fs::remove_file(source.join("slot2.sav")).unwrap();
    write_file(&source.join("slot3.sav"), b"new");
    harness.manager.backup_all().unwrap();

    let mirror = harness.mirror("game1");
    assert_eq!(fs::read(mirror.join("slot1.sav")).unwrap(), b"v2 is longer");
    assert_eq!(fs::read(mirror.join("slot3.sav")).unwrap(), b"new");
    // Deleted at the source, still kept in the mirror
    assert_eq!(fs::read(mirror.join("slot2.sav")).unwrap(), b"v1");
}

#[test]
fn test_backup_into_existing_partial_state() {
    let harness = BackupHarness::new();
    let mirror = harness.mirror("game1");
    write_file(&mirror.join("save.dat"), b"half-writ");
    write_file(&mirror.join("unrelated.txt"), b"keep me");

    harness.track("Game1", "game1", &[("save.dat", b"complete save")]);
    let report = harness.manager.backup_all().unwrap();

    assert!(report.is_clean());
    assert_eq!(fs::read(mirror.join("save.dat")).unwrap(), b"complete save");
    assert_eq!(fs::read(mirror.join("unrelated.txt")).unwrap(), b"keep me");
}

#[test]
fn test_registry_changes_wait_for_run() {
    let harness = Arc::new(BackupHarness::new());
    for index in 0..8 {
        let files: Vec<(String, Vec<u8>)> = (0..20)
            .map(|f| (format!("dir{}/file{}.sav", f % 3, f), vec![index as u8; 16 * 1024]))
            .collect();
        let borrowed: Vec<(&str, &[u8])> = files.iter().map(|(p, c)| (p.as_str(), c.as_slice())).collect();
        harness.track(&format!("Game{}", index), &format!("game{}", index), &borrowed);
    }

    let runner = {
        let harness = Arc::clone(&harness);
        thread::spawn(move || harness.manager.backup_all())
    };

    // Either waits for the run or lands before it; never lost either way
    thread::sleep(Duration::from_millis(5));
    let late = harness.sources.path().join("late");
    fs::create_dir_all(&late).unwrap();
    let late_id = harness.manager.add_entry("Late", &late, "PC").unwrap();
    harness.manager.persist().unwrap();

    let report = runner.join().unwrap().unwrap();
    info!("Concurrent run finished: {} entries", report.succeeded.len());

    let titles: Vec<String> = harness
        .manifest_on_disk()
        .into_iter()
        .map(|entry| entry.title)
        .collect();
    assert_eq!(titles.len(), 9);
    assert!(titles.contains(&"Late".to_string()));
    assert!(harness.manager.get_entry(late_id).is_some());
    assert!(report.succeeded.len() == 8 || report.succeeded.len() == 9);
}

#[test]
fn test_overlapping_runs_never_both_proceed() {
    let harness = Arc::new(BackupHarness::new());
    for index in 0..4 {
        let big = vec![7u8; 2 * 1024 * 1024];
        harness.track(&format!("Game{}", index), &format!("game{}", index), &[("world.bin", &big)]);
    }

    let runners: Vec<_> = (0..2)
        .map(|_| {
            let harness = Arc::clone(&harness);
            thread::spawn(move || harness.manager.backup_all())
        })
        .collect();
    let results: Vec<_> = runners.into_iter().map(|r| r.join().unwrap()).collect();

    let completed = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(SaveError::RunInProgress)))
        .count();
    assert!(completed >= 1);
    assert_eq!(completed + rejected, 2);
    assert!(!harness.manager.is_running());
}

#[test]
fn test_exclude_patterns_apply_to_runs() {
    let sources = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let game = sources.path().join("game1");
    write_file(&game.join("save.dat"), b"keep");
    write_file(&game.join("save.dat.lock"), b"skip");
    write_file(&game.join("shadercache/blob.bin"), b"skip");

    let manager = SaveManagerBuilder::new()
        .exclude_patterns(vec!["*.lock".to_string(), "shadercache".to_string()])
        .build(backups.path())
        .unwrap();
    let id = manager.add_entry("Game1", &game, "PC").unwrap();

    assert!(manager.backup_all().unwrap().is_clean());
    let mirror = backups.path().join("game1");
    assert!(mirror.join("save.dat").exists());
    assert!(!mirror.join("save.dat.lock").exists());
    assert!(!mirror.join("shadercache").exists());
    assert!(manager.verify_entry(id).unwrap().is_valid());
}

#[test]
fn test_backup_root_inside_source() {
    let sources = TempDir::new().unwrap();
    let game = sources.path().join("game1");
    write_file(&game.join("save.dat"), b"x");
    let backups = game.join("Backups");

    let manager = SaveManager::open(&backups).unwrap();
    manager.add_entry("Game1", &game, "PC").unwrap();

    for _ in 0..2 {
        assert!(manager.backup_all().unwrap().is_clean());
    }
    assert!(backups.join("game1/save.dat").exists());
    assert!(!backups.join("game1/Backups").exists());
}

#[test]
fn test_source_nested_under_backup_root() {
    let backups = TempDir::new().unwrap();
    let game = backups.path().join("Games/game1");
    write_file(&game.join("save.dat"), b"slot");
    write_file(&game.join("profiles/p1.ini"), b"name=1");

    let manager = SaveManager::open(backups.path()).unwrap();
    let id = manager.add_entry("Game1", &game, "PC").unwrap();
    let report = manager.backup_all().unwrap();

    assert!(report.is_clean());
    assert_eq!(report.files_copied, 2);
    let mirror = backups.path().join("game1");
    assert_eq!(fs::read(mirror.join("save.dat")).unwrap(), b"slot");
    assert_eq!(fs::read(mirror.join("profiles/p1.ini")).unwrap(), b"name=1");
    assert_eq!(manager.get_entry(id).unwrap().entry.last_backup, Some(report.started_at));
    assert!(manager.verify_entry(id).unwrap().is_valid());
}

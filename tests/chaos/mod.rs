//! Chaos tests for savekeep
//!
//! Damages the backup root between and around runs (truncated and garbage
//! manifests, files where directories belong, vanishing sources) and checks
//! that nothing recorded is lost and nothing is claimed that was not copied.

use ::savekeep::manifest::DiagnosticKind;
use ::savekeep::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::info;

fn write_file(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Damage applied to a manifest file
#[derive(Debug, Clone, Copy)]
enum ManifestDamage {
    Garbage,
    Truncated,
    WrongShape,
    BadTimestamp,
}

impl ManifestDamage {
    fn apply(self, path: &Path) {
        let original = fs::read(path).unwrap();
        let damaged: Vec<u8> = match self {
            ManifestDamage::Garbage => b"\x00\x17not json at all".to_vec(),
            ManifestDamage::Truncated => original[..original.len() / 2].to_vec(),
            ManifestDamage::WrongShape => br#"{"title":"not an array"}"#.to_vec(),
            ManifestDamage::BadTimestamp => String::from_utf8(original)
                .unwrap()
                .replace(save_date_marker(), "\"lastBackupDate\": \"last tuesday\"")
                .into_bytes(),
        };
        fs::write(path, damaged).unwrap();
    }
}

fn save_date_marker() -> &'static str {
    "\"lastBackupDate\": \"0001-01-01T00:00:00Z\""
}

#[test]
fn test_corrupt_manifest_is_quarantined() {
    for damage in [
        ManifestDamage::Garbage,
        ManifestDamage::Truncated,
        ManifestDamage::WrongShape,
        ManifestDamage::BadTimestamp,
    ] {
        let sources = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let game = sources.path().join("game1");
        write_file(&game.join("save.dat"), b"x");
        {
            let manager = SaveManager::open(backups.path()).unwrap();
            manager.add_entry("Game1", &game, "PC").unwrap();
            manager.persist().unwrap();
        }
        let manifest = backups.path().join(MANIFEST_FILE_NAME);
        let healthy = fs::read(&manifest).unwrap();
        damage.apply(&manifest);
        let damaged = fs::read(&manifest).unwrap();
        info!("Applied {:?}", damage);

        let manager = SaveManager::open(backups.path()).unwrap();
        let diagnostic = manager.load_diagnostic().expect("diagnostic for damaged manifest");

        assert_eq!(diagnostic.kind, DiagnosticKind::Corrupt, "{:?}", damage);
        assert!(manager.list_entries().is_empty());
        assert_eq!(fs::read_to_string(&manifest).unwrap().trim(), "[]");

        // Damaged bytes are kept aside for recovery
        let moved = diagnostic.quarantined_to.clone().expect("quarantined");
        assert_eq!(fs::read(&moved).unwrap(), damaged);
        assert_ne!(damaged, healthy);
    }
}

#[test]
fn test_zero_length_manifest_is_repaired() {
    let backups = TempDir::new().unwrap();
    fs::write(backups.path().join(MANIFEST_FILE_NAME), b"").unwrap();

    let manager = SaveManager::open(backups.path()).unwrap();

    assert!(manager.load_diagnostic().is_none());
    assert!(manager.list_entries().is_empty());
    assert_eq!(fs::read_to_string(manager.manifest_path()).unwrap().trim(), "[]");
}

#[test]
fn test_null_and_legacy_manifests_load() {
    let backups = TempDir::new().unwrap();
    let manifest = backups.path().join(MANIFEST_FILE_NAME);

    fs::write(&manifest, "null").unwrap();
    let manager = SaveManager::open(backups.path()).unwrap();
    assert!(manager.load_diagnostic().is_none());
    drop(manager);

    // Offset-less sentinel as older tools wrote it, with a byte order mark
    fs::write(
        &manifest,
        "\u{feff}[{\"title\":\"Old\",\"originalPath\":\"/old/saves\",\"platform\":\"PS2\",\
         \"lastBackupDate\":\"0001-01-01T00:00:00\"}]",
    )
    .unwrap();
    let manager = SaveManager::open(backups.path()).unwrap();
    let entries = manager.list_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry.platform, "PS2");
    assert!(entries[0].entry.last_backup.is_none());
}

#[test]
fn test_manifest_deleted_mid_session() {
    let sources = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let game = sources.path().join("game1");
    write_file(&game.join("save.dat"), b"x");

    let manager = SaveManager::open(backups.path()).unwrap();
    manager.add_entry("Game1", &game, "PC").unwrap();
    fs::remove_file(manager.manifest_path()).unwrap();

    let report = manager.backup_all().unwrap();

    let on_disk = ManifestStore::new(backups.path()).load().into_entries();
    assert_eq!(on_disk.len(), 1);
    assert_eq!(on_disk[0].last_backup, Some(report.started_at));
}

#[test]
fn test_directory_in_the_way() {
    let sources = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let game = sources.path().join("game1");
    write_file(&game.join("save.dat"), b"new");
    write_file(&game.join("other.dat"), b"other");

    let manager = SaveManager::open(backups.path()).unwrap();
    let id = manager.add_entry("Game1", &game, "PC").unwrap();

    // A directory sits where a file copy must land
    fs::create_dir_all(backups.path().join("game1/save.dat/inner")).unwrap();
    let report = manager.backup_all().unwrap();

    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.len(), 1);
    let failed = &report.failed[0];
    assert_eq!(failed.failed_paths.len(), 1);
    assert_eq!(failed.failed_paths[0].path, backups.path().join("game1/save.dat"));
    // Siblings still copied, nothing deleted
    assert!(backups.path().join("game1/other.dat").exists());
    assert!(backups.path().join("game1/save.dat/inner").is_dir());
    assert!(manager.get_entry(id).unwrap().entry.last_backup.is_none());

    // Once the obstruction is gone the entry recovers
    fs::remove_dir_all(backups.path().join("game1/save.dat")).unwrap();
    let report = manager.backup_all().unwrap();
    assert!(report.is_clean());
    assert_eq!(manager.get_entry(id).unwrap().entry.last_backup, Some(report.started_at));
}

#[test]
fn test_file_where_mirror_root_belongs() {
    let sources = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let game = sources.path().join("game1");
    write_file(&game.join("save.dat"), b"x");

    let manager = SaveManager::open(backups.path()).unwrap();
    manager.add_entry("Game1", &game, "PC").unwrap();
    fs::write(backups.path().join("game1"), b"i am a file").unwrap();

    let report = manager.backup_all().unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(fs::read(backups.path().join("game1")).unwrap(), b"i am a file");
}

#[test]
fn test_cancelled_run_still_persists_finished_work() {
    let sources = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let manager = SaveManagerBuilder::new()
        .parallel_workers(1)
        .build(backups.path())
        .unwrap();
    for index in 0..5 {
        let game = sources.path().join(format!("game{}", index));
        write_file(&game.join("save.dat"), b"x");
        manager.add_entry(format!("Game{}", index), &game, "PC").unwrap();
    }

    let token = manager.cancellation_token();
    let report = manager
        .backup_all_with_progress(std::sync::Arc::new(move |info: ProgressInfo| {
            if info.processed == 2 {
                token.cancel();
            }
        }))
        .unwrap();

    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.cancelled.len(), 3);
    assert!(!report.is_clean());

    let on_disk = ManifestStore::new(backups.path()).load().into_entries();
    assert_eq!(on_disk.len(), 5);
    let stamped: Vec<_> = on_disk.iter().filter(|e| e.last_backup.is_some()).map(|e| &e.title).collect();
    assert_eq!(stamped.len(), 2);
    for title in &report.cancelled {
        assert!(!stamped.contains(&title));
        assert!(!backups.path().join(title.to_lowercase()).exists());
    }

    // Next run is not affected by the earlier cancel
    assert!(manager.backup_all().unwrap().is_clean());
}

#[test]
fn test_source_vanishes_between_add_and_run() {
    let sources = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let game = sources.path().join("game1");
    write_file(&game.join("save.dat"), b"x");

    let manager = SaveManager::open(backups.path()).unwrap();
    let id = manager.add_entry("Game1", &game, "PC").unwrap();
    fs::remove_dir_all(&game).unwrap();

    let report = manager.backup_all().unwrap();
    assert_eq!(report.failed[0].reason, format!("source missing: {:?}", game));
    assert!(!backups.path().join("game1").exists());
    assert!(manager.get_entry(id).is_some());
}

#[test]
fn test_duplicate_entries_in_manifest_are_kept() {
    let backups = TempDir::new().unwrap();
    let entries = vec![
        SaveEntry::new("Game1", "/a/saves", "PC"),
        SaveEntry::new("Game1", "/b/saves", "PC"),
    ];
    ManifestStore::new(backups.path()).persist(&entries).unwrap();

    let manager = SaveManager::open(backups.path()).unwrap();
    assert_eq!(manager.list_entries().len(), 2);

    // Both stay on disk after the next write
    manager.persist().unwrap();
    assert_eq!(ManifestStore::new(backups.path()).load().into_entries(), entries);
}

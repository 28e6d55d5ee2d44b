//! Main test module for savekeep
//!
//! This module includes all test suites:
//! - Integration tests for multi-run scenarios
//! - Chaos tests for damaged manifests and hostile backup roots
//! - Property-based tests for invariants

pub mod integration;
pub mod chaos;

#[cfg(test)]
mod edge_cases {
    use ::savekeep::*;
    use tempfile::TempDir;
    use std::fs;

    #[test]
    fn test_empty_source_directory() {
        let sources = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let empty = sources.path().join("EmptyGame");
        fs::create_dir_all(&empty).unwrap();

        let manager = SaveManager::open(backups.path()).unwrap();
        manager.add_entry("Empty", &empty, "PC").unwrap();
        let report = manager.backup_all().unwrap();

        assert_eq!(report.succeeded, vec!["Empty".to_string()]);
        assert_eq!(report.files_copied, 0);
        assert!(backups.path().join("EmptyGame").is_dir());
    }

    #[test]
    fn test_no_entries() {
        let backups = TempDir::new().unwrap();
        let manager = SaveManager::open(backups.path()).unwrap();

        let report = manager.backup_all().unwrap();

        assert!(report.is_clean());
        assert!(report.succeeded.is_empty());
        assert!(report.summary().contains("No save files were backed up"));
        assert_eq!(fs::read_to_string(manager.manifest_path()).unwrap().trim(), "[]");
    }

    #[test]
    fn test_special_filenames() {
        let sources = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let game = sources.path().join("Game With Spaces");
        fs::create_dir_all(&game).unwrap();

        let special_names = vec![
            "file with spaces.sav",
            "file-with-dashes.sav",
            "file.with.dots.sav",
            "file@with#special$chars.sav",
            "file(with)parens.sav",
            "file[with]brackets.sav",
            "ファイル.sav",
        ];
        let mut written = Vec::new();
        for name in &special_names {
            // Skip if OS doesn't support this filename
            if fs::write(game.join(name), format!("Content of {}", name)).is_ok() {
                written.push(*name);
            }
        }

        let manager = SaveManager::open(backups.path()).unwrap();
        manager.add_entry("Spaces", &game, "PC").unwrap();
        assert!(manager.backup_all().unwrap().is_clean());

        for name in written {
            let mirrored = backups.path().join("Game With Spaces").join(name);
            assert_eq!(fs::read_to_string(mirrored).unwrap(), format!("Content of {}", name));
        }
    }

    #[test]
    fn test_relative_source_path() {
        let backups = TempDir::new().unwrap();
        let manager = SaveManager::open(backups.path()).unwrap();

        // Resolved against the working directory, which is the crate root
        let id = manager.add_entry("Sources", "src", "").unwrap();
        let tracked = manager.list_entries().into_iter().find(|t| t.id == id).unwrap();

        assert_eq!(tracked.entry.original_path, std::path::PathBuf::from("src"));
        assert_eq!(
            tracked.entry.mirror_path(manager.backup_root()),
            Some(backups.path().join("src"))
        );
    }

    #[test]
    fn test_trailing_separator_mirrors_by_folder_name() {
        let sources = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let game = sources.path().join("game1");
        fs::create_dir_all(&game).unwrap();
        fs::write(game.join("save.dat"), "x").unwrap();

        let manager = SaveManager::open(backups.path()).unwrap();
        let with_slash = format!("{}/", game.display());
        manager.add_entry("Game1", with_slash, "PC").unwrap();

        assert!(manager.backup_all().unwrap().is_clean());
        assert!(backups.path().join("game1/save.dat").exists());
    }

    #[test]
    fn test_large_file() {
        let sources = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let game = sources.path().join("big");
        fs::create_dir_all(&game).unwrap();
        let content: Vec<u8> = (0..5 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        fs::write(game.join("world.bin"), &content).unwrap();

        let manager = SaveManager::open(backups.path()).unwrap();
        let id = manager.add_entry("Big", &game, "PC").unwrap();
        let report = manager.backup_all().unwrap();

        assert_eq!(report.bytes_copied, content.len() as u64);
        assert!(manager.verify_entry(id).unwrap().is_valid());
    }
}

//! Scheduled/manual database backups.
//!
//! Uses SQLite's online backup API for a consistent copy even while the
//! application holds connections, then prunes the backup directory down to
//! the configured retention count (oldest files first).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use rusqlite::backup::Backup;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::settings;

pub const BACKUP_FILENAME_PREFIX: &str = "backup_";
const PAGES_PER_STEP: std::os::raw::c_int = 100;
const PAUSE_BETWEEN_STEPS: Duration = Duration::from_millis(250);

/// Configured backup directory from settings, else `backups/` next to the
/// database file. Created on demand.
pub fn resolve_backup_dir(db: &Database) -> Result<PathBuf> {
    let configured = settings::load(db)?.backup_directory;
    let dir = match configured {
        Some(path) => PathBuf::from(path),
        None => db
            .path()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("backups"),
    };
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Backup files in `directory`, oldest first by modification time.
pub fn list_backups(directory: &Path) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Ok(Vec::new());
    }
    let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(BACKUP_FILENAME_PREFIX) && name.ends_with(".db") {
            let modified = entry.metadata()?.modified()?;
            backups.push((modified, entry.path()));
        }
    }
    backups.sort();
    Ok(backups.into_iter().map(|(_, path)| path).collect())
}

pub fn last_backup_time(directory: &Path) -> Result<Option<SystemTime>> {
    let backups = list_backups(directory)?;
    match backups.last() {
        Some(path) => Ok(Some(fs::metadata(path)?.modified()?)),
        None => Ok(None),
    }
}

fn enforce_retention(directory: &Path, retention: usize) -> Result<()> {
    let backups = list_backups(directory)?;
    if backups.len() <= retention {
        return Ok(());
    }
    for path in &backups[..backups.len() - retention] {
        match fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "deleted old backup"),
            Err(err) => warn!(path = %path.display(), %err, "failed deleting backup"),
        }
    }
    Ok(())
}

fn unique_backup_path(directory: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f");
    let mut path = directory.join(format!("{BACKUP_FILENAME_PREFIX}{stamp}.db"));
    let mut suffix = 1;
    while path.exists() {
        path = directory.join(format!("{BACKUP_FILENAME_PREFIX}{stamp}_{suffix}.db"));
        suffix += 1;
    }
    path
}

/// Copy the live database into the backup directory and prune old files per
/// the configured retention count. Returns the new backup's path.
pub fn perform_backup(db: &Database) -> Result<PathBuf> {
    let directory = resolve_backup_dir(db)?;
    let retention = settings::load(db)?.retention_count.max(1) as usize;
    let backup_path = unique_backup_path(&directory);

    let src = db.connect()?;
    let mut dst = Connection::open(&backup_path)?;
    let backup = Backup::new(&src, &mut dst)?;
    backup.run_to_completion(PAGES_PER_STEP, PAUSE_BETWEEN_STEPS, None)?;

    enforce_retention(&directory, retention)?;
    info!(path = %backup_path.display(), "backup created");
    Ok(backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;
    use crate::{products, schema};

    #[test]
    fn backup_is_a_usable_copy() {
        let (_dir, db) = test_db();
        products::add_product(&db, "Rice 25kg", 2.5, 40).unwrap();
        let path = perform_backup(&db).unwrap();
        assert!(path.exists());

        let copy = Database::open_existing(&path);
        let conn = copy.connect().unwrap();
        assert_eq!(
            schema::current_version(&conn).unwrap(),
            schema::SCHEMA_VERSION
        );
        let stock: i64 = conn
            .query_row(
                "SELECT stock_quantity FROM products WHERE name = 'Rice 25kg'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stock, 40);
    }

    #[test]
    fn defaults_to_directory_next_to_database() {
        let (dir, db) = test_db();
        let resolved = resolve_backup_dir(&db).unwrap();
        assert_eq!(resolved, dir.path().join("backups"));
        assert!(resolved.is_dir());
    }

    #[test]
    fn retention_prunes_oldest_first() {
        let (_dir, db) = test_db();
        crate::settings::update_retention_count(&db, 2).unwrap();
        let first = perform_backup(&db).unwrap();
        let second = perform_backup(&db).unwrap();
        let third = perform_backup(&db).unwrap();
        let directory = resolve_backup_dir(&db).unwrap();
        let remaining = list_backups(&directory).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!first.exists());
        assert_eq!(remaining, vec![second, third]);
    }

    #[test]
    fn empty_directory_has_no_last_backup() {
        let (_dir, db) = test_db();
        let directory = resolve_backup_dir(&db).unwrap();
        assert_eq!(last_backup_time(&directory).unwrap(), None);
        perform_backup(&db).unwrap();
        assert!(last_backup_time(&directory).unwrap().is_some());
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use rusqlite::Connection;

use crate::error::Result;
use crate::schema;

/// Bounded wait on a locked store before surfacing a busy error.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the application database.
///
/// Holds only the file path; every operation opens its own connection with
/// foreign keys enforced and the busy timeout applied. The single writer at a
/// time is serialized by SQLite's own locking.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the database at `path` and bring the schema
    /// up to the current version, seeding baseline rows.
    pub fn initialize(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
        };
        let mut conn = db.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        schema::upgrade(&mut conn)?;
        Ok(db)
    }

    /// Wrap an existing database file without migrating it. Used by read-only
    /// tooling; normal startup goes through [`Database::initialize`].
    pub fn open_existing(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        Ok(conn)
    }
}

/// Timestamp in the stored `YYYY-MM-DD HH:MM:SS` format.
pub(crate) fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_creates_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::initialize(dir.path().join("wholesale.db")).unwrap();
        let conn = db.connect().unwrap();
        assert_eq!(
            schema::current_version(&conn).unwrap(),
            schema::SCHEMA_VERSION
        );
    }

    #[test]
    fn now_stamp_shape() {
        let ts = now_stamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
    }
}

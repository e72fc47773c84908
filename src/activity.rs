//! Audit trail of user actions.
//!
//! The actor is threaded in explicitly by callers; `None` marks a system
//! event. Ledger operations write their audit row inside their own
//! transaction via [`record`].

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::{now_stamp, Database};
use crate::error::Result;

const DETAILS_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub username: String,
    pub action_type: String,
    pub details: Option<String>,
}

/// Insert an audit row on an existing connection (or open transaction).
pub(crate) fn record(
    conn: &Connection,
    actor: Option<&str>,
    action_type: &str,
    details: &str,
) -> Result<()> {
    let details: String = details.chars().take(DETAILS_MAX_CHARS).collect();
    conn.execute(
        "INSERT INTO activity_log (timestamp, username, action_type, details)
         VALUES (?, ?, ?, ?)",
        params![now_stamp(), actor, action_type, details],
    )?;
    Ok(())
}

/// Insert a standalone audit row (its own connection, autocommit).
pub fn log_action(db: &Database, actor: Option<&str>, action_type: &str, details: &str) -> Result<()> {
    let conn = db.connect()?;
    record(&conn, actor, action_type, details)
}

/// Most recent entries, newest first. System events render as "(system)".
pub fn recent(db: &Database, limit: i64) -> Result<Vec<ActivityEntry>> {
    let conn = db.connect()?;
    let mut stmt = conn.prepare(
        "SELECT timestamp, COALESCE(username, '(system)'), action_type, details
         FROM activity_log
         ORDER BY id DESC
         LIMIT ?",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(ActivityEntry {
            timestamp: row.get(0)?,
            username: row.get(1)?,
            action_type: row.get(2)?,
            details: row.get(3)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

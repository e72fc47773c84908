//! Forward-only schema migrations.
//!
//! To add a migration: append a step function to `MIGRATIONS`. Steps must be
//! safe to re-run (probe before ALTER, `IF NOT EXISTS` on DDL) because a prior
//! run may have died partway through one.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

const MIGRATIONS: &[fn(&Connection) -> Result<()>] = &[migrate_v1, migrate_v2];

/// Highest schema version this build understands.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

pub const DEFAULT_WHOLESALE_NAME: &str = "Wholesale Name Here";
pub const DEFAULT_RECEIPT_THANK_YOU: &str = "Thank you for buying from us!";
pub const DEFAULT_RETENTION_COUNT: i64 = 10;
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

/// Stored schema version, or 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64> {
    if !table_exists(conn, "schema_version")? {
        return Ok(0);
    }
    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

/// Bring the database up to [`SCHEMA_VERSION`], then re-affirm baseline seed
/// data. A database newer than this build is a fatal configuration error and
/// nothing is written.
pub fn upgrade(conn: &mut Connection) -> Result<()> {
    let current = current_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(Error::SchemaVersion {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    let tx = conn.transaction()?;
    for version in (current + 1)..=SCHEMA_VERSION {
        MIGRATIONS[(version - 1) as usize](&tx)?;
        set_version(&tx, version)?;
        info!(version, "schema upgraded");
    }
    ensure_baseline(&tx)?;
    tx.commit()?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn set_version(conn: &Connection, version: i64) -> Result<()> {
    if table_exists(conn, "schema_version")? {
        conn.execute("UPDATE schema_version SET version = ?", params![version])?;
    } else {
        conn.execute("CREATE TABLE schema_version (version INTEGER NOT NULL)", [])?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            params![version],
        )?;
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn ensure_column(conn: &Connection, table: &str, column: &str, alter_sql: &str) -> Result<()> {
    if !column_exists(conn, table, column)? {
        conn.execute(alter_sql, [])?;
    }
    Ok(())
}

// v1: consolidated base schema. Earlier incremental steps from the project's
// history were squashed into this one.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            product_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            price REAL NOT NULL,
            stock_quantity INTEGER NOT NULL CHECK (stock_quantity >= 0)
        );

        CREATE TABLE IF NOT EXISTS customers (
            customer_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            phone_number TEXT CHECK (phone_number IS NULL OR LENGTH(phone_number) = 10),
            address TEXT
        );

        CREATE TABLE IF NOT EXISTS invoices (
            invoice_id INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id INTEGER NOT NULL,
            invoice_date TEXT NOT NULL,
            discount REAL DEFAULT 0,
            tax REAL DEFAULT 0,
            total_amount REAL NOT NULL,
            FOREIGN KEY (customer_id) REFERENCES customers(customer_id)
        );

        CREATE TABLE IF NOT EXISTS invoice_items (
            item_id INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_id INTEGER NOT NULL,
            product_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            unit_price REAL NOT NULL CHECK (unit_price >= 0),
            FOREIGN KEY (invoice_id) REFERENCES invoices(invoice_id) ON DELETE CASCADE,
            FOREIGN KEY (product_id) REFERENCES products(product_id)
        );

        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'Admin',
            must_change_password INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY,
            wholesale_number TEXT,
            wholesale_name TEXT,
            wholesale_address TEXT,
            receipt_thank_you TEXT,
            receipt_notes TEXT,
            backup_directory TEXT,
            retention_count INTEGER
        );

        CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            username TEXT,
            action_type TEXT NOT NULL,
            details TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_customers_name_phone
            ON customers(name COLLATE NOCASE, phone_number);
        CREATE INDEX IF NOT EXISTS idx_invoices_customer_id ON invoices(customer_id);
        CREATE INDEX IF NOT EXISTS idx_items_invoice_id ON invoice_items(invoice_id);
        CREATE INDEX IF NOT EXISTS idx_items_product_id ON invoice_items(product_id);
        CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_activity_user ON activity_log(username);
        ",
    )?;
    Ok(())
}

// v2: configurable low-stock threshold for the product view.
fn migrate_v2(conn: &Connection) -> Result<()> {
    ensure_column(
        conn,
        "settings",
        "low_stock_threshold",
        "ALTER TABLE settings ADD COLUMN low_stock_threshold INTEGER",
    )?;
    conn.execute(
        "UPDATE settings SET low_stock_threshold = ? WHERE id = 1 AND low_stock_threshold IS NULL",
        params![DEFAULT_LOW_STOCK_THRESHOLD],
    )?;
    Ok(())
}

/// Guarantee the settings singleton row exists and backfill NULLs in
/// later-added columns, never overwriting values that are already set.
pub fn ensure_baseline(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "settings")? {
        return Ok(());
    }
    let present: i64 = conn.query_row(
        "SELECT COUNT(*) FROM settings WHERE id = 1",
        [],
        |row| row.get(0),
    )?;
    if present > 0 {
        conn.execute(
            "UPDATE settings SET
                backup_directory = COALESCE(backup_directory, ''),
                retention_count = COALESCE(retention_count, ?1),
                receipt_thank_you = COALESCE(receipt_thank_you, ?2)
             WHERE id = 1",
            params![DEFAULT_RETENTION_COUNT, DEFAULT_RECEIPT_THANK_YOU],
        )?;
        if column_exists(conn, "settings", "low_stock_threshold")? {
            conn.execute(
                "UPDATE settings SET low_stock_threshold = COALESCE(low_stock_threshold, ?) WHERE id = 1",
                params![DEFAULT_LOW_STOCK_THRESHOLD],
            )?;
        }
        return Ok(());
    }
    conn.execute(
        "INSERT INTO settings
            (id, wholesale_number, wholesale_name, wholesale_address,
             receipt_thank_you, receipt_notes, backup_directory, retention_count)
         VALUES (1, '', ?1, '', ?2, '', '', ?3)",
        params![
            DEFAULT_WHOLESALE_NAME,
            DEFAULT_RECEIPT_THANK_YOU,
            DEFAULT_RETENTION_COUNT
        ],
    )?;
    if column_exists(conn, "settings", "low_stock_threshold")? {
        conn.execute(
            "UPDATE settings SET low_stock_threshold = ? WHERE id = 1",
            params![DEFAULT_LOW_STOCK_THRESHOLD],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON;", []).unwrap();
        conn
    }

    #[test]
    fn fresh_database_reports_version_zero() {
        let conn = fresh_conn();
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn upgrade_reaches_target_version() {
        let mut conn = fresh_conn();
        upgrade(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn upgrade_is_idempotent() {
        let mut conn = fresh_conn();
        upgrade(&mut conn).unwrap();
        upgrade(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1, "baseline seed must not duplicate");
        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn newer_database_is_rejected_without_writes() {
        let mut conn = fresh_conn();
        upgrade(&mut conn).unwrap();
        conn.execute("UPDATE schema_version SET version = 99", [])
            .unwrap();
        conn.execute("UPDATE settings SET retention_count = NULL WHERE id = 1", [])
            .unwrap();
        let err = upgrade(&mut conn).unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaVersion {
                found: 99,
                supported: SCHEMA_VERSION
            }
        ));
        // the guard must fire before baseline re-affirmation touches anything
        let retention: Option<i64> = conn
            .query_row(
                "SELECT retention_count FROM settings WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(retention, None);
    }

    #[test]
    fn baseline_backfills_nulls_only() {
        let mut conn = fresh_conn();
        upgrade(&mut conn).unwrap();
        conn.execute(
            "UPDATE settings SET wholesale_name = 'Acme Wholesale', retention_count = NULL WHERE id = 1",
            [],
        )
        .unwrap();
        ensure_baseline(&conn).unwrap();
        let (name, retention): (String, i64) = conn
            .query_row(
                "SELECT wholesale_name, retention_count FROM settings WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(name, "Acme Wholesale");
        assert_eq!(retention, DEFAULT_RETENTION_COUNT);
    }

    #[test]
    fn migration_steps_are_individually_rerunnable() {
        let conn = fresh_conn();
        migrate_v1(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        migrate_v2(&conn).unwrap();
        migrate_v2(&conn).unwrap();
    }
}

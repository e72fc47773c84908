//! Typed access to the settings singleton row (id = 1), seeded by the
//! migration runner. Readers apply defaults for NULL/blank values so the UI
//! never deals with schema gaps.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::schema::{
    DEFAULT_LOW_STOCK_THRESHOLD, DEFAULT_RECEIPT_THANK_YOU, DEFAULT_RETENTION_COUNT,
    DEFAULT_WHOLESALE_NAME,
};

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub wholesale_number: String,
    pub wholesale_name: String,
    pub wholesale_address: String,
    pub receipt_thank_you: String,
    pub receipt_notes: String,
    pub backup_directory: Option<String>,
    pub retention_count: i64,
    pub low_stock_threshold: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wholesale_number: String::new(),
            wholesale_name: DEFAULT_WHOLESALE_NAME.to_string(),
            wholesale_address: String::new(),
            receipt_thank_you: DEFAULT_RECEIPT_THANK_YOU.to_string(),
            receipt_notes: String::new(),
            backup_directory: None,
            retention_count: DEFAULT_RETENTION_COUNT,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let v = v.trim().to_string();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    })
}

pub fn load(db: &Database) -> Result<Settings> {
    let conn = db.connect()?;
    let row = conn
        .query_row(
            "SELECT wholesale_number, wholesale_name, wholesale_address,
                    receipt_thank_you, receipt_notes, backup_directory,
                    retention_count, low_stock_threshold
             FROM settings WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((number, name, address, thank_you, notes, backup_dir, retention, low_stock)) = row
    else {
        return Ok(Settings::default());
    };
    Ok(Settings {
        wholesale_number: number.unwrap_or_default(),
        wholesale_name: non_blank(name).unwrap_or_else(|| DEFAULT_WHOLESALE_NAME.to_string()),
        wholesale_address: address.unwrap_or_default(),
        receipt_thank_you: non_blank(thank_you)
            .unwrap_or_else(|| DEFAULT_RECEIPT_THANK_YOU.to_string()),
        receipt_notes: notes.unwrap_or_default(),
        backup_directory: non_blank(backup_dir),
        retention_count: retention
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_RETENTION_COUNT),
        low_stock_threshold: low_stock
            .filter(|&n| n >= 0)
            .unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD),
    })
}

pub fn update_identity(db: &Database, number: &str, name: &str, address: &str) -> Result<()> {
    let conn = db.connect()?;
    conn.execute(
        "UPDATE settings SET wholesale_number = ?, wholesale_name = ?, wholesale_address = ?
         WHERE id = 1",
        params![number.trim(), name.trim(), address.trim()],
    )?;
    Ok(())
}

pub fn update_receipt_texts(db: &Database, thank_you: &str, notes: &str) -> Result<()> {
    let conn = db.connect()?;
    conn.execute(
        "UPDATE settings SET receipt_thank_you = ?, receipt_notes = ? WHERE id = 1",
        params![thank_you.trim(), notes.trim()],
    )?;
    Ok(())
}

pub fn update_backup_directory(db: &Database, directory: &str) -> Result<()> {
    let conn = db.connect()?;
    conn.execute(
        "UPDATE settings SET backup_directory = ? WHERE id = 1",
        params![directory.trim()],
    )?;
    Ok(())
}

pub fn update_retention_count(db: &Database, count: i64) -> Result<()> {
    if count <= 0 {
        return Err(Error::Validation("retention count must be positive".into()));
    }
    let conn = db.connect()?;
    conn.execute(
        "UPDATE settings SET retention_count = ? WHERE id = 1",
        params![count],
    )?;
    Ok(())
}

pub fn update_low_stock_threshold(db: &Database, threshold: i64) -> Result<()> {
    if threshold < 0 {
        return Err(Error::Validation(
            "low-stock threshold must be 0 or greater".into(),
        ));
    }
    let conn = db.connect()?;
    conn.execute(
        "UPDATE settings SET low_stock_threshold = ? WHERE id = 1",
        params![threshold],
    )?;
    Ok(())
}

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::info;

use crate::db::Database;
use crate::error::{Error, Result};

/// Row handed to the user-management UI; never carries the hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub role: String,
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

pub fn verify_password(stored_hash: &str, attempt: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(attempt.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn validate_credentials(username: &str, password: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(Error::Validation("username is required".into()));
    }
    if password.is_empty() {
        return Err(Error::Validation("password is required".into()));
    }
    Ok(())
}

/// Duplicate usernames surface as [`Error::Integrity`].
pub fn add_user(
    db: &Database,
    username: &str,
    password: &str,
    role: &str,
    must_change_password: bool,
) -> Result<i64> {
    validate_credentials(username, password)?;
    let password_hash = hash_password(password)?;
    let conn = db.connect()?;
    conn.execute(
        "INSERT INTO users (username, password_hash, role, must_change_password)
         VALUES (?, ?, ?, ?)",
        params![username.trim(), password_hash, role, must_change_password],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Check a username/password pair, returning the user's role on success.
pub fn authenticate(db: &Database, username: &str, password: &str) -> Result<Option<String>> {
    let conn = db.connect()?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT password_hash, role FROM users WHERE username = ?",
            params![username],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row.and_then(|(stored_hash, role)| {
        if verify_password(&stored_hash, password) {
            Some(role)
        } else {
            None
        }
    }))
}

pub fn user_exists(db: &Database, username: &str) -> Result<bool> {
    let conn = db.connect()?;
    let found = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?",
            params![username],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn user_role(db: &Database, username: &str) -> Result<Option<String>> {
    let conn = db.connect()?;
    let role = conn
        .query_row(
            "SELECT role FROM users WHERE username = ?",
            params![username],
            |row| row.get(0),
        )
        .optional()?;
    Ok(role)
}

pub fn update_user(
    db: &Database,
    old_username: &str,
    new_username: &str,
    new_password: &str,
    new_role: &str,
) -> Result<()> {
    validate_credentials(new_username, new_password)?;
    let password_hash = hash_password(new_password)?;
    let conn = db.connect()?;
    let changed = conn.execute(
        "UPDATE users SET username = ?, password_hash = ?, role = ? WHERE username = ?",
        params![new_username.trim(), password_hash, new_role, old_username],
    )?;
    if changed == 0 {
        return Err(Error::Validation(format!("no such user: {old_username}")));
    }
    Ok(())
}

pub fn change_password(
    db: &Database,
    username: &str,
    new_password: &str,
    clear_flag: bool,
) -> Result<()> {
    validate_credentials(username, new_password)?;
    let password_hash = hash_password(new_password)?;
    let conn = db.connect()?;
    let changed = if clear_flag {
        conn.execute(
            "UPDATE users SET password_hash = ?, must_change_password = 0 WHERE username = ?",
            params![password_hash, username],
        )?
    } else {
        conn.execute(
            "UPDATE users SET password_hash = ? WHERE username = ?",
            params![password_hash, username],
        )?
    };
    if changed == 0 {
        return Err(Error::Validation(format!("no such user: {username}")));
    }
    Ok(())
}

pub fn delete_user(db: &Database, username: &str) -> Result<()> {
    let conn = db.connect()?;
    let changed = conn.execute("DELETE FROM users WHERE username = ?", params![username])?;
    if changed == 0 {
        return Err(Error::Validation(format!("no such user: {username}")));
    }
    Ok(())
}

pub fn must_change_password(db: &Database, username: &str) -> Result<bool> {
    let conn = db.connect()?;
    let flag: Option<bool> = conn
        .query_row(
            "SELECT must_change_password FROM users WHERE username = ?",
            params![username],
            |row| row.get(0),
        )
        .optional()?;
    Ok(flag.unwrap_or(false))
}

pub fn all_users(db: &Database) -> Result<Vec<UserRecord>> {
    let conn = db.connect()?;
    let mut stmt =
        conn.prepare("SELECT user_id, username, role FROM users ORDER BY username")?;
    let rows = stmt.query_map([], |row| {
        Ok(UserRecord {
            user_id: row.get(0)?,
            username: row.get(1)?,
            role: row.get(2)?,
        })
    })?;

    let mut users = Vec::new();
    for row in rows {
        users.push(row?);
    }
    Ok(users)
}

pub fn user_by_id(db: &Database, user_id: i64) -> Result<Option<UserRecord>> {
    let conn = db.connect()?;
    let user = conn
        .query_row(
            "SELECT user_id, username, role FROM users WHERE user_id = ?",
            params![user_id],
            |row| {
                Ok(UserRecord {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    role: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

/// Create `username` as an Admin with a generated temporary password when no
/// users exist yet. Returns the temporary password so the first-run flow can
/// show it once; the account is flagged to force a change on first login.
pub fn ensure_default_admin(db: &Database, username: &str) -> Result<Option<String>> {
    let conn = db.connect()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(None);
    }
    drop(conn);
    let temp_password: String = SaltString::generate(&mut OsRng)
        .as_str()
        .chars()
        .take(12)
        .collect();
    add_user(db, username, &temp_password, "Admin", true)?;
    info!(username, "default admin account created");
    Ok(Some(temp_password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;

    #[test]
    fn authenticate_round_trip() {
        let (_dir, db) = test_db();
        add_user(&db, "admin", "secret", "Admin", false).unwrap();
        assert_eq!(
            authenticate(&db, "admin", "secret").unwrap().as_deref(),
            Some("Admin")
        );
        assert_eq!(authenticate(&db, "admin", "wrong").unwrap(), None);
        assert_eq!(authenticate(&db, "ghost", "secret").unwrap(), None);
    }

    #[test]
    fn duplicate_username_is_integrity_error() {
        let (_dir, db) = test_db();
        add_user(&db, "admin", "secret", "Admin", false).unwrap();
        let err = add_user(&db, "admin", "other", "Staff", false).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)), "got {err:?}");
    }

    #[test]
    fn change_password_clears_flag() {
        let (_dir, db) = test_db();
        add_user(&db, "ama", "temp", "Staff", true).unwrap();
        assert!(must_change_password(&db, "ama").unwrap());
        change_password(&db, "ama", "newpass", true).unwrap();
        assert!(!must_change_password(&db, "ama").unwrap());
        assert_eq!(
            authenticate(&db, "ama", "newpass").unwrap().as_deref(),
            Some("Staff")
        );
    }

    #[test]
    fn default_admin_created_once() {
        let (_dir, db) = test_db();
        let temp = ensure_default_admin(&db, "admin").unwrap();
        let temp = temp.expect("first call creates the account");
        assert!(must_change_password(&db, "admin").unwrap());
        assert_eq!(
            authenticate(&db, "admin", &temp).unwrap().as_deref(),
            Some("Admin")
        );
        assert_eq!(ensure_default_admin(&db, "admin").unwrap(), None);
    }

    #[test]
    fn update_user_renames_and_rehashes() {
        let (_dir, db) = test_db();
        add_user(&db, "kwame", "old", "Staff", false).unwrap();
        update_user(&db, "kwame", "kwame2", "fresh", "Admin").unwrap();
        assert!(!user_exists(&db, "kwame").unwrap());
        assert_eq!(
            authenticate(&db, "kwame2", "fresh").unwrap().as_deref(),
            Some("Admin")
        );
    }
}

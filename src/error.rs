use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the data-access core.
///
/// Anything that touched the store mid-transaction has already been rolled
/// back by the time the error reaches the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: i64,
        available: i64,
        requested: i64,
    },
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("database schema version {found} is newer than supported {supported}; upgrade the application")]
    SchemaVersion { found: i64, supported: i64 },
    #[error("password hash error: {0}")]
    PasswordHash(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Store(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        // Surface unique-key and check-constraint failures as their own
        // variant so callers can treat them as user errors.
        if let rusqlite::Error::SqliteFailure(code, message) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return Error::Integrity(
                    message
                        .clone()
                        .unwrap_or_else(|| "constraint violation".into()),
                );
            }
        }
        Error::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_failures_map_to_integrity() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER UNIQUE); INSERT INTO t VALUES (1);")
            .unwrap();
        let err: Error = conn
            .execute("INSERT INTO t VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Integrity(_)), "got {err:?}");
    }

    #[test]
    fn other_failures_map_to_store() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: Error = conn.execute("SELECT * FROM missing", []).unwrap_err().into();
        assert!(matches!(err, Error::Store(_)), "got {err:?}");
    }
}

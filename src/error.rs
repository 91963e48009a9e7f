//! Crate-wide error type.
//!
//! Engine errors are carried verbatim; the only errors this crate raises on
//! its own are persistence preconditions and task lifecycle failures.

use thiserror::Error;

use crate::storage::reader::ReaderError;
use crate::storage::writer::WriterError;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The single failure signal surfaced by every read, write and batch
/// operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("record not found in {table} (primary key {key})")]
    RecordNotFound { table: &'static str, key: i64 },

    #[error("{table} record has no primary key")]
    MissingPrimaryKey { table: &'static str },

    #[error("task was cancelled")]
    Cancelled,

    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Returns the underlying SQLite error code, if this is an engine error.
    pub fn sqlite_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            Self::Sqlite(e) => e.sqlite_error_code(),
            _ => None,
        }
    }

    /// Whether this failure is a constraint violation (unique, foreign key,
    /// not null, check).
    pub fn is_constraint_violation(&self) -> bool {
        self.sqlite_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::Cancelled
        } else {
            Self::TaskFailed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: Error = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_constraint_violation());

        let err = Error::MissingPrimaryKey { table: "t" };
        assert!(!err.is_constraint_violation());
        assert_eq!(err.to_string(), "t record has no primary key");
    }
}

//! Read connection pool.
//!
//! Uses r2d2 with r2d2_sqlite for pooled read access.
//! SQLite WAL mode allows concurrent readers alongside the single writer, and
//! each read runs in its own transaction so it sees one consistent snapshot.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::schema::apply_reader_pragmas;
use crate::error::Error;

/// Error type for reader pool operations.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Read connection pool.
///
/// Provides pooled read-only connections for concurrent access.
#[derive(Clone)]
pub struct ReaderPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ReaderPool {
    /// Create a new reader pool for the given database path.
    ///
    /// The database file must already exist in WAL mode (the writer creates
    /// it).
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    /// * `max_size` - Maximum number of connections in the pool
    /// * `busy_timeout` - SQLite busy timeout applied to every connection
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        max_size: u32,
        busy_timeout: Duration,
    ) -> Result<Self, ReaderError> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);

        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_customizer(Box::new(ReaderConnectionCustomizer { busy_timeout }))
            .build(manager)?;

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>, ReaderError> {
        Ok(self.pool.get()?)
    }

    /// Get the current pool state for monitoring.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }

    /// Run `f` inside a read transaction on a pooled connection.
    ///
    /// Blocks the calling thread for the duration of the read.
    pub fn read<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Connection) -> Result<T, Error>,
    {
        let mut conn = self.get()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` inside a read transaction on the blocking thread pool.
    pub async fn read_async<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Connection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.read(f)).await?
    }
}

/// Connection customizer that applies reader pragmas.
#[derive(Debug)]
struct ReaderConnectionCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ReaderConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        apply_reader_pragmas(conn, self.busy_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::apply_pragmas;
    use tempfile::TempDir;

    fn create_db(temp_dir: &TempDir) -> (std::path::PathBuf, Connection) {
        let db_path = temp_dir.path().join("test.db");
        let conn = Connection::open(&db_path).unwrap();
        apply_pragmas(&conn, Duration::from_millis(100)).unwrap();
        conn.execute_batch(
            "CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO tags (name) VALUES ('rust');",
        )
        .unwrap();
        (db_path, conn)
    }

    #[test]
    fn test_reader_pool_creation() {
        let temp_dir = TempDir::new().unwrap();
        let (db_path, _writer) = create_db(&temp_dir);

        let pool = ReaderPool::new(&db_path, 3, Duration::from_millis(100)).unwrap();

        let count: i64 = pool
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(pool.state().connections, 3);
    }

    #[test]
    fn test_reader_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let (db_path, _writer) = create_db(&temp_dir);
        let pool = ReaderPool::new(&db_path, 1, Duration::from_millis(100)).unwrap();

        let result = pool.read(|conn| {
            conn.execute("INSERT INTO tags (name) VALUES ('nope')", [])?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Sqlite(_))));
    }

    #[tokio::test]
    async fn test_read_async() {
        let temp_dir = TempDir::new().unwrap();
        let (db_path, _writer) = create_db(&temp_dir);
        let pool = ReaderPool::new(&db_path, 2, Duration::from_millis(100)).unwrap();

        let name: String = pool
            .read_async(|conn| Ok(conn.query_row("SELECT name FROM tags", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(name, "rust");
    }
}

//! Test utilities for Rowsync integration tests.
//!
//! Provides:
//! - Temporary database fixtures
//! - A `Tag` record with a unique natural key
//! - Async polling helpers

#![allow(dead_code)]

use std::path::PathBuf;

use rowsync::{
    AdditionMode, Database, DatabaseConfig, FetchableRecord, PersistableRecord, TableRecord,
};
use rusqlite::types::Value;
use rusqlite::Row;
use tempfile::TempDir;

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        rowsync::observability::tracing::init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self { temp_dir, db_path }
    }

    /// Small configuration pointing at the fixture's database file.
    pub fn config(&self) -> DatabaseConfig {
        DatabaseConfig {
            path: self.db_path.clone(),
            write_channel_size: 16,
            reader_pool_size: 2,
            notify_channel_size: 64,
            busy_timeout_ms: 1000,
            addition_mode: AdditionMode::Insert,
        }
    }

    /// Open the database and create the `tags` and `notes` tables.
    ///
    /// Uses the blocking write path, so call it outside an async runtime or
    /// use [`open_async`](Self::open_async).
    pub fn open(&self) -> Database {
        self.open_with(self.config())
    }

    pub fn open_with(&self, config: DatabaseConfig) -> Database {
        let db = Database::open(config).expect("failed to open database");
        db.write(|tx| {
            tx.execute_batch(SCHEMA)?;
            Ok(())
        })
        .expect("failed to create schema");
        db
    }

    pub async fn open_async(&self) -> Database {
        let db = Database::open(self.config()).expect("failed to open database");
        db.write_async(|tx| {
            tx.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .expect("failed to create schema");
        db
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

const SCHEMA: &str = "
    CREATE TABLE tags (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        color TEXT NOT NULL
    );
    CREATE TABLE notes (
        id INTEGER PRIMARY KEY,
        body TEXT NOT NULL
    );
";

/// Record keyed naturally by `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: Option<i64>,
    pub name: String,
    pub color: String,
}

impl Tag {
    pub fn new(name: &str, color: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            color: color.to_string(),
        }
    }

    /// Natural key extractor.
    pub fn name_key(tag: &Tag) -> String {
        tag.name.clone()
    }
}

impl TableRecord for Tag {
    const TABLE_NAME: &'static str = "tags";
}

impl FetchableRecord for Tag {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            color: row.get("color")?,
        })
    }
}

impl PersistableRecord for Tag {
    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn set_primary_key(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn persistence_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::Text(self.name.clone())),
            ("color", Value::Text(self.color.clone())),
        ]
    }
}

/// Record without a natural key, used as an unrelated table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: Option<i64>,
    pub body: String,
}

impl TableRecord for Note {
    const TABLE_NAME: &'static str = "notes";
}

impl FetchableRecord for Note {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            body: row.get("body")?,
        })
    }
}

impl PersistableRecord for Note {
    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn set_primary_key(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn persistence_values(&self) -> Vec<(&'static str, Value)> {
        vec![("body", Value::Text(self.body.clone()))]
    }
}

/// Fetch all tags ordered by name, blocking.
pub fn tags_by_name(db: &Database) -> Vec<Tag> {
    db.read(|conn| {
        Ok(Tag::all()
            .order(rowsync::OrderingTerm::asc("name"))
            .fetch_all(conn)?)
    })
    .expect("failed to fetch tags")
}

/// Wait for a condition to become true with timeout.
///
/// # Arguments
///
/// * `timeout` - Maximum time to wait
/// * `condition` - Closure that returns true when condition is met
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

//! Connection pragmas for writer and reader connections.
//!
//! Table definitions belong to the host application; this module only
//! configures how connections talk to the file.

use rusqlite::Connection;
use std::time::Duration;

/// Apply pragmas for the single read-write connection.
///
/// - WAL journal so readers never block the writer
/// - NORMAL synchronous, durable at checkpoint under WAL
/// - Foreign keys enforced
pub fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        "#,
    )
}

/// Apply pragmas for pooled read-only connections.
pub fn apply_reader_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA query_only = ON;")
}

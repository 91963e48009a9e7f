//! SQLite storage layer.
//!
//! Provides:
//! - Connection pragmas for writer and readers
//! - Dedicated writer thread with per-job transactions and commit notification
//! - Read connection pool for snapshot reads

pub mod reader;
pub mod schema;
pub mod writer;

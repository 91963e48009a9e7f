//! Rowsync: keyed batch writes and live observation over SQLite.
//!
//! Rowsync reconciles batches of records against the rows already stored,
//! inserting what is new and updating what exists by a caller-defined natural
//! key, inside one write transaction per batch.
//!
//! # Architecture
//!
//! - **Single writer**: all writes go through one dedicated thread and connection
//! - **Pooled readers**: WAL mode lets read-only connections run alongside it
//! - **Blocking or async**: every operation has both forms, plus a spawned form
//! - **Observable**: commits publish the tables they touched, driving live queries
//!
//! # Modules
//!
//! - [`config`]: CLI, environment and serde configuration
//! - [`database`]: Database handle and lifecycle
//! - [`flow`]: Commit notification bus
//! - [`observability`]: Metrics and tracing setup
//! - [`observe`]: Live query observation
//! - [`ops`]: Batch operations (`StorageBacked`)
//! - [`query`]: Query construction
//! - [`reconcile`]: Natural-key reconciliation
//! - [`record`]: Record traits and single-row persistence
//! - [`storage`]: SQLite writer thread and reader pool

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // record::PersistableRecord is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod config;
pub mod database;
pub mod error;
pub mod flow;
pub mod observability;
pub mod observe;
pub mod ops;
pub mod query;
pub mod reconcile;
pub mod record;
pub mod storage;
pub mod task;

pub use config::{AdditionMode, DatabaseConfig};
pub use database::Database;
pub use error::{Error, Result};
pub use flow::notify::TableChange;
pub use observe::ValueObservation;
pub use ops::{BatchRecord, StorageBacked, WriteSummary};
pub use query::{Direction, OrderingTerm, Query};
pub use reconcile::{KeyStrategy, Reconciler, Reconciliation};
pub use record::{copy_primary_key, FetchableRecord, PersistableRecord, SaveAction, TableRecord};
pub use task::TaskHandle;

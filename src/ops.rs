//! Batch operations for anything that owns a [`Database`].
//!
//! Implement [`StorageBacked`] by returning the handle, and every batch
//! operation comes for free in three forms:
//! - blocking (`save_all`), for synchronous callers outside any async runtime
//! - suspending (`save_all_async`), a `Send + 'static` future
//! - fire-and-forget (`spawn_save_all`), returning a [`TaskHandle`]
//!
//! Each batch runs in exactly one write transaction. Any failing record rolls
//! back the whole batch and its error is returned as is.

use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use rusqlite::{Connection, Transaction};

use crate::config::AdditionMode;
use crate::database::Database;
use crate::error::Result;
use crate::observability::metrics;
use crate::observe::ValueObservation;
use crate::query::{OrderingTerm, Query};
use crate::reconcile::{filter_new, Reconciler};
use crate::record::{FetchableRecord, PersistableRecord, SaveAction, TableRecord};
use crate::task::TaskHandle;

/// Row counts of one committed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl WriteSummary {
    /// Total number of rows written.
    pub fn rows(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    fn record(&self, table: &'static str, operation: &'static str, latency: Duration) {
        tracing::debug!(
            table,
            operation,
            inserted = self.inserted,
            updated = self.updated,
            deleted = self.deleted,
            latency_us = latency.as_micros() as u64,
            "Batch committed"
        );
        metrics::record_write(table, operation, self.rows() as u64, latency);
    }
}

/// Record types the batch operations accept.
///
/// Implemented for every type that is persistable, fetchable and can move to
/// the writer thread.
pub trait BatchRecord: PersistableRecord + FetchableRecord + Send + 'static {}

impl<T> BatchRecord for T where T: PersistableRecord + FetchableRecord + Send + 'static {}

/// Capability of owning a database handle.
pub trait StorageBacked {
    fn database(&self) -> &Database;

    /// Run `f` in a read transaction, blocking the calling thread.
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.database().read(f)
    }

    /// Run `f` in a read transaction without blocking the runtime.
    fn read_async<T, F>(&self, f: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.database().clone();
        async move { db.read_async(f).await }
    }

    /// Run `f` in a write transaction, blocking the calling thread.
    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.database().write(f)
    }

    /// Run `f` in a write transaction without blocking the runtime.
    fn write_async<T, F>(&self, f: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.database().clone();
        async move { db.write_async(f).await }
    }

    // Insert-only dedup

    /// Insert the batch records whose natural key is not yet persisted.
    ///
    /// Records whose key already exists are skipped, not updated.
    fn insert_new<T, K, KF>(&self, batch: Vec<T>, key_of: KF) -> Result<WriteSummary>
    where
        T: BatchRecord,
        K: Hash + Eq + 'static,
        KF: Fn(&T) -> K + Send + 'static,
    {
        run_batch(self.database(), "insert_new", T::TABLE_NAME, move |tx| {
            apply_insert_new(tx, batch, key_of)
        })
    }

    fn insert_new_async<T, K, KF>(
        &self,
        batch: Vec<T>,
        key_of: KF,
    ) -> impl Future<Output = Result<WriteSummary>> + Send + 'static
    where
        T: BatchRecord,
        K: Hash + Eq + 'static,
        KF: Fn(&T) -> K + Send + 'static,
    {
        run_batch_async(
            self.database().clone(),
            "insert_new",
            T::TABLE_NAME,
            move |tx| apply_insert_new(tx, batch, key_of),
        )
    }

    fn spawn_insert_new<T, K, KF>(&self, batch: Vec<T>, key_of: KF) -> TaskHandle<WriteSummary>
    where
        T: BatchRecord,
        K: Hash + Eq + 'static,
        KF: Fn(&T) -> K + Send + 'static,
    {
        let db = self.database();
        db.spawn_task(
            "insert_new",
            run_batch_async(db.clone(), "insert_new", T::TABLE_NAME, move |tx| {
                apply_insert_new(tx, batch, key_of)
            }),
        )
    }

    // Update by primary key

    /// Update every record by primary key.
    ///
    /// Fails with `MissingPrimaryKey` or `RecordNotFound` if any record
    /// cannot be matched to a row.
    fn update_all<T: BatchRecord>(&self, batch: Vec<T>) -> Result<WriteSummary> {
        run_batch(self.database(), "update_all", T::TABLE_NAME, move |tx| {
            apply_update_all(tx, batch)
        })
    }

    fn update_all_async<T: BatchRecord>(
        &self,
        batch: Vec<T>,
    ) -> impl Future<Output = Result<WriteSummary>> + Send + 'static {
        run_batch_async(
            self.database().clone(),
            "update_all",
            T::TABLE_NAME,
            move |tx| apply_update_all(tx, batch),
        )
    }

    fn spawn_update_all<T: BatchRecord>(&self, batch: Vec<T>) -> TaskHandle<WriteSummary> {
        let db = self.database();
        db.spawn_task(
            "update_all",
            run_batch_async(db.clone(), "update_all", T::TABLE_NAME, move |tx| {
                apply_update_all(tx, batch)
            }),
        )
    }

    // Upsert by primary key

    /// Save every record: update by primary key when its row exists, insert
    /// otherwise.
    fn save_all<T: BatchRecord>(&self, batch: Vec<T>) -> Result<WriteSummary> {
        run_batch(self.database(), "save_all", T::TABLE_NAME, move |tx| {
            apply_save_all(tx, batch)
        })
    }

    fn save_all_async<T: BatchRecord>(
        &self,
        batch: Vec<T>,
    ) -> impl Future<Output = Result<WriteSummary>> + Send + 'static {
        run_batch_async(
            self.database().clone(),
            "save_all",
            T::TABLE_NAME,
            move |tx| apply_save_all(tx, batch),
        )
    }

    fn spawn_save_all<T: BatchRecord>(&self, batch: Vec<T>) -> TaskHandle<WriteSummary> {
        let db = self.database();
        db.spawn_task(
            "save_all",
            run_batch_async(db.clone(), "save_all", T::TABLE_NAME, move |tx| {
                apply_save_all(tx, batch)
            }),
        )
    }

    // Reconciling save by natural key

    /// Reconcile the batch against the persisted table by natural key and
    /// write the result.
    ///
    /// Records whose key is new are added first, in batch order, using the
    /// database's configured [`AdditionMode`]. Records whose key exists get
    /// the persisted identity through `transfer` and are then updated, in
    /// batch order. Pass [`copy_primary_key`](crate::record::copy_primary_key)
    /// as `transfer` for the usual case.
    fn save_by_key<T, K, KF, TF>(
        &self,
        batch: Vec<T>,
        key_of: KF,
        transfer: TF,
    ) -> Result<WriteSummary>
    where
        T: BatchRecord,
        K: Hash + Eq + 'static,
        KF: Fn(&T) -> K + Send + 'static,
        TF: Fn(&T, &mut T) + Send + 'static,
    {
        let mode = self.database().config().addition_mode;
        self.save_by_key_with(mode, batch, key_of, transfer)
    }

    /// [`save_by_key`](Self::save_by_key) with an explicit addition mode.
    fn save_by_key_with<T, K, KF, TF>(
        &self,
        mode: AdditionMode,
        batch: Vec<T>,
        key_of: KF,
        transfer: TF,
    ) -> Result<WriteSummary>
    where
        T: BatchRecord,
        K: Hash + Eq + 'static,
        KF: Fn(&T) -> K + Send + 'static,
        TF: Fn(&T, &mut T) + Send + 'static,
    {
        run_batch(self.database(), "save_by_key", T::TABLE_NAME, move |tx| {
            apply_save_by_key(tx, mode, batch, &Reconciler::new(key_of, transfer))
        })
    }

    fn save_by_key_async<T, K, KF, TF>(
        &self,
        batch: Vec<T>,
        key_of: KF,
        transfer: TF,
    ) -> impl Future<Output = Result<WriteSummary>> + Send + 'static
    where
        T: BatchRecord,
        K: Hash + Eq + 'static,
        KF: Fn(&T) -> K + Send + 'static,
        TF: Fn(&T, &mut T) + Send + 'static,
    {
        let mode = self.database().config().addition_mode;
        self.save_by_key_with_async(mode, batch, key_of, transfer)
    }

    fn save_by_key_with_async<T, K, KF, TF>(
        &self,
        mode: AdditionMode,
        batch: Vec<T>,
        key_of: KF,
        transfer: TF,
    ) -> impl Future<Output = Result<WriteSummary>> + Send + 'static
    where
        T: BatchRecord,
        K: Hash + Eq + 'static,
        KF: Fn(&T) -> K + Send + 'static,
        TF: Fn(&T, &mut T) + Send + 'static,
    {
        run_batch_async(
            self.database().clone(),
            "save_by_key",
            T::TABLE_NAME,
            move |tx| apply_save_by_key(tx, mode, batch, &Reconciler::new(key_of, transfer)),
        )
    }

    fn spawn_save_by_key<T, K, KF, TF>(
        &self,
        batch: Vec<T>,
        key_of: KF,
        transfer: TF,
    ) -> TaskHandle<WriteSummary>
    where
        T: BatchRecord,
        K: Hash + Eq + 'static,
        KF: Fn(&T) -> K + Send + 'static,
        TF: Fn(&T, &mut T) + Send + 'static,
    {
        let db = self.database();
        let mode = db.config().addition_mode;
        db.spawn_task(
            "save_by_key",
            run_batch_async(db.clone(), "save_by_key", T::TABLE_NAME, move |tx| {
                apply_save_by_key(tx, mode, batch, &Reconciler::new(key_of, transfer))
            }),
        )
    }

    // Delete by primary key

    /// Delete every record by primary key.
    ///
    /// Records without a key or without a matching row are not counted.
    fn delete_all<T: BatchRecord>(&self, batch: Vec<T>) -> Result<WriteSummary> {
        run_batch(self.database(), "delete_all", T::TABLE_NAME, move |tx| {
            apply_delete_all(tx, batch)
        })
    }

    fn delete_all_async<T: BatchRecord>(
        &self,
        batch: Vec<T>,
    ) -> impl Future<Output = Result<WriteSummary>> + Send + 'static {
        run_batch_async(
            self.database().clone(),
            "delete_all",
            T::TABLE_NAME,
            move |tx| apply_delete_all(tx, batch),
        )
    }

    fn spawn_delete_all<T: BatchRecord>(&self, batch: Vec<T>) -> TaskHandle<WriteSummary> {
        let db = self.database();
        db.spawn_task(
            "delete_all",
            run_batch_async(db.clone(), "delete_all", T::TABLE_NAME, move |tx| {
                apply_delete_all(tx, batch)
            }),
        )
    }

    // Observation

    /// Observe the results of `query`.
    fn observe<T>(&self, query: Query<T>) -> ValueObservation<T>
    where
        T: TableRecord + FetchableRecord + Send + 'static,
    {
        ValueObservation::new(self.database().clone(), query)
    }

    /// Observe every row of `T`'s table, optionally ordered.
    fn observe_all<T>(&self, ordering: Option<OrderingTerm>) -> ValueObservation<T>
    where
        T: TableRecord + FetchableRecord + Send + 'static,
    {
        let query = match ordering {
            Some(term) => T::all().order(term),
            None => T::all(),
        };
        self.observe(query)
    }
}

impl StorageBacked for Database {
    fn database(&self) -> &Database {
        self
    }
}

fn run_batch<F>(
    db: &Database,
    operation: &'static str,
    table: &'static str,
    f: F,
) -> Result<WriteSummary>
where
    F: FnOnce(&Transaction<'_>) -> Result<WriteSummary> + Send + 'static,
{
    let started = Instant::now();
    let summary = db.write(f)?;
    summary.record(table, operation, started.elapsed());
    Ok(summary)
}

async fn run_batch_async<F>(
    db: Database,
    operation: &'static str,
    table: &'static str,
    f: F,
) -> Result<WriteSummary>
where
    F: FnOnce(&Transaction<'_>) -> Result<WriteSummary> + Send + 'static,
{
    let started = Instant::now();
    let summary = db.write_async(f).await?;
    summary.record(table, operation, started.elapsed());
    Ok(summary)
}

fn apply_insert_new<T, K>(
    conn: &Connection,
    batch: Vec<T>,
    key_of: impl Fn(&T) -> K,
) -> Result<WriteSummary>
where
    T: PersistableRecord + FetchableRecord,
    K: Hash + Eq,
{
    let persisted = T::all().fetch_all(conn)?;
    let mut summary = WriteSummary::default();
    for mut record in filter_new(batch, &persisted, key_of) {
        record.insert(conn)?;
        summary.inserted += 1;
    }
    Ok(summary)
}

fn apply_update_all<T: PersistableRecord>(
    conn: &Connection,
    batch: Vec<T>,
) -> Result<WriteSummary> {
    for record in &batch {
        record.update(conn)?;
    }
    Ok(WriteSummary {
        updated: batch.len(),
        ..WriteSummary::default()
    })
}

fn apply_save_all<T: PersistableRecord>(conn: &Connection, batch: Vec<T>) -> Result<WriteSummary> {
    let mut summary = WriteSummary::default();
    for mut record in batch {
        match record.save(conn)? {
            SaveAction::Inserted => summary.inserted += 1,
            SaveAction::Updated => summary.updated += 1,
        }
    }
    Ok(summary)
}

fn apply_save_by_key<T, K, KF, TF>(
    conn: &Connection,
    mode: AdditionMode,
    batch: Vec<T>,
    reconciler: &Reconciler<KF, TF>,
) -> Result<WriteSummary>
where
    T: PersistableRecord + FetchableRecord,
    K: Hash + Eq,
    KF: Fn(&T) -> K,
    TF: Fn(&T, &mut T),
{
    let persisted = T::all().fetch_all(conn)?;
    let plan = reconciler.reconcile(batch, &persisted);

    let mut summary = WriteSummary::default();
    for mut record in plan.to_insert {
        match mode {
            AdditionMode::Insert => {
                record.insert(conn)?;
                summary.inserted += 1;
            }
            AdditionMode::Save => match record.save(conn)? {
                SaveAction::Inserted => summary.inserted += 1,
                SaveAction::Updated => summary.updated += 1,
            },
        }
    }
    for record in &plan.to_update {
        record.update(conn)?;
        summary.updated += 1;
    }
    Ok(summary)
}

fn apply_delete_all<T: PersistableRecord>(
    conn: &Connection,
    batch: Vec<T>,
) -> Result<WriteSummary> {
    let mut summary = WriteSummary::default();
    for record in &batch {
        if record.delete(conn)? {
            summary.deleted += 1;
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::copy_primary_key;
    use rusqlite::types::Value;
    use rusqlite::Row;

    #[derive(Debug, Clone, PartialEq)]
    struct Setting {
        id: Option<i64>,
        key: String,
        value: String,
    }

    impl Setting {
        fn new(key: &str, value: &str) -> Self {
            Self {
                id: None,
                key: key.into(),
                value: value.into(),
            }
        }
    }

    impl TableRecord for Setting {
        const TABLE_NAME: &'static str = "settings";
    }

    impl FetchableRecord for Setting {
        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                key: row.get("key")?,
                value: row.get("value")?,
            })
        }
    }

    impl PersistableRecord for Setting {
        fn primary_key(&self) -> Option<i64> {
            self.id
        }

        fn set_primary_key(&mut self, id: i64) {
            self.id = Some(id);
        }

        fn persistence_values(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("key", Value::Text(self.key.clone())),
                ("value", Value::Text(self.value.clone())),
            ]
        }
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE settings (id INTEGER PRIMARY KEY, key TEXT NOT NULL UNIQUE, value TEXT)",
        )
        .unwrap();
        conn
    }

    fn key_of(s: &Setting) -> String {
        s.key.clone()
    }

    #[test]
    fn test_apply_save_by_key_inserts_then_updates() {
        let conn = setup();
        apply_insert_new(&conn, vec![Setting::new("a", "x")], key_of).unwrap();

        let batch = vec![Setting::new("a", "y"), Setting::new("b", "z")];
        let reconciler = Reconciler::new(key_of, copy_primary_key::<Setting>);
        let summary = apply_save_by_key(&conn, AdditionMode::Insert, batch, &reconciler).unwrap();
        assert_eq!(
            summary,
            WriteSummary {
                inserted: 1,
                updated: 1,
                deleted: 0
            }
        );

        let rows = Setting::all()
            .order(OrderingTerm::asc("key"))
            .fetch_all(&conn)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, Some(1));
        assert_eq!(rows[0].value, "y");
        assert_eq!(rows[1].value, "z");
    }

    #[test]
    fn test_save_mode_turns_stale_key_addition_into_update() {
        let conn = setup();
        apply_insert_new(&conn, vec![Setting::new("a", "x")], key_of).unwrap();

        // Natural key changed, primary key still points at the stored row
        let renamed = Setting {
            id: Some(1),
            key: "renamed".into(),
            value: "x".into(),
        };
        let reconciler = Reconciler::new(key_of, copy_primary_key::<Setting>);

        let strict =
            apply_save_by_key(&conn, AdditionMode::Insert, vec![renamed.clone()], &reconciler);
        assert!(strict.unwrap_err().is_constraint_violation());

        let summary =
            apply_save_by_key(&conn, AdditionMode::Save, vec![renamed], &reconciler).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.inserted, 0);
    }

    #[test]
    fn test_apply_delete_all_counts_only_deleted_rows() {
        let conn = setup();
        apply_insert_new(&conn, vec![Setting::new("a", "x")], key_of).unwrap();
        let stored = Setting::all().fetch_all(&conn).unwrap();

        let batch = vec![stored[0].clone(), Setting::new("never-saved", "")];
        let summary = apply_delete_all(&conn, batch).unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.rows(), 1);
    }
}

//! Dedicated writer thread.
//!
//! All mutation goes through one read-write connection owned by a single OS
//! thread. Callers submit write jobs over a bounded channel and wait for the
//! reply, either blocking or suspending.
//!
//! Each job runs in its own `BEGIN IMMEDIATE` transaction: committed when the
//! job returns `Ok`, rolled back when it returns `Err` or panics. After every
//! commit that wrote rows, the touched tables are published on the
//! [`NotificationBus`].
//!
//! Tables are collected from two sources. SQLite's update hook reports every
//! changed row of a rowid table. The authorizer reports every table a
//! statement prepared in the transaction inserts into, updates or deletes
//! from, which covers `WITHOUT ROWID` tables. The authorizer also answers
//! `Ignore` to deletes, which turns off SQLite's truncate optimization so an
//! unqualified `DELETE FROM t` still goes row by row.

use rusqlite::hooks::{Action, AuthAction, AuthContext, Authorization};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::schema::apply_pragmas;
use crate::error::Error;
use crate::flow::notify::NotificationBus;

/// Error type for writer thread operations.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("writer channel closed")]
    ChannelClosed,

    #[error("writer thread panicked")]
    ThreadPanic,

    #[error("failed to open database: {0}")]
    Open(#[from] rusqlite::Error),

    #[error("failed to spawn writer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

type WriteJob = Box<dyn FnOnce(&mut WriterState) + Send>;

enum WriterCommand {
    Write(WriteJob),
    Shutdown(oneshot::Sender<()>),
}

/// Tables touched by the transaction in progress.
#[derive(Clone, Default)]
struct ChangeSet(Arc<Mutex<BTreeSet<String>>>);

impl ChangeSet {
    fn record(&self, table: &str) {
        if is_internal_table(table) {
            return;
        }
        let mut tables = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !tables.contains(table) {
            tables.insert(table.to_string());
        }
    }

    fn take(&self) -> BTreeSet<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// `sqlite_master`, `sqlite_sequence` and friends change with DDL and
/// autoincrement bookkeeping; observers never query them.
fn is_internal_table(table: &str) -> bool {
    table
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("sqlite_"))
}

fn authorize(changes: &ChangeSet, ctx: &AuthContext<'_>) -> Authorization {
    match ctx.action {
        // DDL authorizes deletes on the schema table and aborts on Ignore
        AuthAction::Delete { table_name } if is_internal_table(table_name) => {
            Authorization::Allow
        }
        AuthAction::Delete { table_name } => {
            changes.record(table_name);
            Authorization::Ignore
        }
        AuthAction::Insert { table_name } | AuthAction::Update { table_name, .. } => {
            changes.record(table_name);
            Authorization::Allow
        }
        _ => Authorization::Allow,
    }
}

struct WriterState {
    conn: Connection,
    changes: ChangeSet,
    notify_bus: NotificationBus,
    commit_seq: u64,
}

impl WriterState {
    fn transact<T, F>(&mut self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, Error>,
    {
        self.changes.clear();
        // The authorizer only runs at prepare time
        self.conn.flush_prepared_statement_cache();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let value = match f(&tx) {
            Ok(value) => value,
            Err(e) => {
                drop(tx);
                self.changes.clear();
                tracing::debug!(error = %e, "Write transaction rolled back");
                return Err(e);
            }
        };

        if let Err(e) = tx.commit() {
            self.changes.clear();
            return Err(e.into());
        }

        let tables = self.changes.take();
        if !tables.is_empty() {
            self.commit_seq += 1;
            tracing::trace!(
                commit_seq = self.commit_seq,
                tables = ?tables,
                "Write transaction committed"
            );
            self.notify_bus.notify(tables, self.commit_seq);
        }
        Ok(value)
    }
}

/// Owner of the writer thread.
pub struct Writer {
    thread: JoinHandle<()>,
    handle: WriterHandle,
}

impl Writer {
    /// Open the database and spawn the writer thread.
    ///
    /// The connection is opened and configured on the calling thread so open
    /// errors surface here, and so the file is in WAL mode before any reader
    /// connects.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file (created if missing)
    /// * `notify_bus` - Bus receiving one notification per committing write
    /// * `channel_size` - Bound of the job queue
    /// * `busy_timeout` - SQLite busy timeout
    pub fn spawn<P: AsRef<Path>>(
        db_path: P,
        notify_bus: NotificationBus,
        channel_size: usize,
        busy_timeout: Duration,
    ) -> Result<Self, WriterError> {
        let conn = Connection::open(db_path)?;
        apply_pragmas(&conn, busy_timeout)?;

        let changes = ChangeSet::default();
        let hook_changes = changes.clone();
        conn.update_hook(Some(
            move |_: Action, _: &str, table: &str, _: i64| hook_changes.record(table),
        ));
        let auth_changes = changes.clone();
        conn.authorizer(Some(move |ctx: AuthContext<'_>| {
            authorize(&auth_changes, &ctx)
        }));

        let state = WriterState {
            conn,
            changes,
            notify_bus,
            commit_seq: 0,
        };

        let (tx, rx) = mpsc::channel(channel_size.max(1));
        let thread = thread::Builder::new()
            .name("rowsync-writer".into())
            .spawn(move || run(state, rx))?;

        Ok(Self {
            thread,
            handle: WriterHandle { tx },
        })
    }

    /// Get a cloneable handle for submitting writes.
    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Wait for the writer thread to exit.
    ///
    /// Call after [`WriterHandle::shutdown`], otherwise this blocks until
    /// every handle is dropped.
    pub fn join(self) -> Result<(), WriterError> {
        drop(self.handle);
        self.thread.join().map_err(|_| WriterError::ThreadPanic)
    }
}

fn run(mut state: WriterState, mut rx: mpsc::Receiver<WriterCommand>) {
    tracing::debug!("Writer thread started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            WriterCommand::Write(job) => {
                // A panicking job drops its reply sender; the caller sees
                // ThreadPanic and the transaction was rolled back on unwind.
                if panic::catch_unwind(AssertUnwindSafe(|| job(&mut state))).is_err() {
                    state.changes.clear();
                    tracing::error!("Write job panicked, transaction rolled back");
                }
            }
            WriterCommand::Shutdown(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }

    tracing::debug!(commits = state.commit_seq, "Writer thread stopped");
}

/// Cloneable handle for submitting write jobs.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
}

impl WriterHandle {
    /// Run `f` in a write transaction, blocking until it commits or fails.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime; use
    /// [`write_async`](Self::write_async) there.
    pub fn write<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: WriteJob = Box::new(move |state| {
            let _ = reply_tx.send(state.transact(f));
        });

        self.tx
            .blocking_send(WriterCommand::Write(job))
            .map_err(|_| WriterError::ChannelClosed)?;
        reply_rx
            .blocking_recv()
            .map_err(|_| WriterError::ThreadPanic)?
    }

    /// Run `f` in a write transaction, suspending until it commits or fails.
    pub async fn write_async<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: WriteJob = Box::new(move |state| {
            let _ = reply_tx.send(state.transact(f));
        });

        self.tx
            .send(WriterCommand::Write(job))
            .await
            .map_err(|_| WriterError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WriterError::ThreadPanic)?
    }

    /// Ask the writer thread to stop after the jobs already queued.
    pub async fn shutdown(&self) -> Result<(), WriterError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Shutdown(ack_tx))
            .await
            .map_err(|_| WriterError::ChannelClosed)?;
        ack_rx.await.map_err(|_| WriterError::ThreadPanic)
    }

    /// Whether the writer thread has stopped accepting jobs.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

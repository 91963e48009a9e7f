//! Database handle setup and lifecycle.
//!
//! Wires together:
//! - The dedicated writer thread
//! - The read connection pool
//! - The commit notification bus
//! - Tracking of spawned background writes

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use tokio::sync::{broadcast, OnceCell};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tokio_util::task::TaskTracker;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::flow::notify::{NotificationBus, TableChange};
use crate::storage::reader::ReaderPool;
use crate::storage::writer::{Writer, WriterHandle};
use crate::task::TaskHandle;

struct DatabaseInner {
    config: DatabaseConfig,
    writer: WriterHandle,
    readers: ReaderPool,
    notify_bus: NotificationBus,
    tasks: TaskTracker,
    closed: CancellationToken,
    writer_thread: Mutex<Option<Writer>>,
    shutdown: OnceCell<()>,
}

/// Shared handle to one SQLite database.
///
/// Cheap to clone. Writes are serialized through a single writer thread;
/// reads run concurrently on pooled read-only connections. Both come in a
/// blocking and a suspending form.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Open (or create) the database described by `config`.
    ///
    /// Missing parent directories are created.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let notify_bus = NotificationBus::new(config.notify_channel_size);

        // The writer creates the file and switches it to WAL before readers connect
        let writer = Writer::spawn(
            &config.path,
            notify_bus.clone(),
            config.write_channel_size,
            busy_timeout,
        )?;
        let readers = ReaderPool::new(&config.path, config.reader_pool_size, busy_timeout)?;

        tracing::info!(
            path = %config.path.display(),
            reader_pool_size = config.reader_pool_size,
            addition_mode = ?config.addition_mode,
            "Database opened"
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                writer: writer.handle(),
                readers,
                notify_bus,
                tasks: TaskTracker::new(),
                closed: CancellationToken::new(),
                writer_thread: Mutex::new(Some(writer)),
                shutdown: OnceCell::new(),
                config,
            }),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Run `f` in a read transaction, blocking the calling thread.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.inner.readers.read(f)
    }

    /// Run `f` in a read transaction without blocking the runtime.
    pub async fn read_async<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.readers.read_async(f).await
    }

    /// Run `f` in a write transaction, blocking the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.writer.write(f)
    }

    /// Run `f` in a write transaction, suspending until it commits or fails.
    pub async fn write_async<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.writer.write_async(f).await
    }

    /// Receive one [`TableChange`] per committed write that changed rows.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<TableChange> {
        self.inner.notify_bus.subscribe()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFutureOwned {
        self.inner.closed.clone().cancelled_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Spawn a tracked background write.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub(crate) fn spawn_task<T, Fut>(&self, operation: &'static str, fut: Fut) -> TaskHandle<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        TaskHandle::spawn(&self.inner.tasks, operation, fut)
    }

    /// Close the database.
    ///
    /// Ends live observations, waits for spawned background writes, then
    /// stops the writer thread after the jobs already queued. Later writes
    /// fail with `WriterError::ChannelClosed`. Every caller, including
    /// concurrent ones, returns only once the writer thread has been joined.
    pub async fn close(&self) -> Result<()> {
        self.inner
            .shutdown
            .get_or_try_init(|| self.shutdown())
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.inner.closed.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        let writer = self
            .inner
            .writer_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(writer) = writer else {
            return Ok(());
        };

        tracing::info!("Shutting down writer thread");
        self.inner.writer.shutdown().await?;
        tokio::task::spawn_blocking(move || writer.join()).await??;

        tracing::info!("Database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::writer::WriterError;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("app.db");
        let db = Database::open(DatabaseConfig::test_config(path.clone())).unwrap();

        assert!(path.exists());
        assert_eq!(db.config().reader_pool_size, 2);
    }

    #[test]
    fn test_blocking_read_sees_committed_write() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(DatabaseConfig::test_config(temp_dir.path().join("t.db"))).unwrap();

        db.write(|tx| {
            tx.execute_batch(
                "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT);
                 INSERT INTO kv VALUES ('a', '1');",
            )?;
            Ok(())
        })
        .unwrap();

        let v: String = db
            .read(|conn| {
                Ok(conn.query_row("SELECT v FROM kv WHERE k = 'a'", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(v, "1");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(DatabaseConfig::test_config(temp_dir.path().join("t.db"))).unwrap();

        db.write_async(|tx| {
            tx.execute_batch("CREATE TABLE kv (k TEXT PRIMARY KEY);")?;
            Ok(())
        })
        .await
        .unwrap();

        db.close().await.unwrap();
        db.close().await.unwrap();
        assert!(db.is_closed());

        let err = db.write_async(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::Writer(WriterError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_concurrent_close_waits_for_writer_join() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(DatabaseConfig::test_config(temp_dir.path().join("t.db"))).unwrap();
        let other = db.clone();

        let (first, (second, writer_stopped)) = tokio::join!(db.close(), async {
            let result = other.close().await;
            (result, other.inner.writer.is_closed())
        });

        first.unwrap();
        second.unwrap();
        assert!(writer_stopped);
    }
}

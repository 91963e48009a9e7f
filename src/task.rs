//! Handles for fire-and-forget background writes.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::Result;

/// Handle to a spawned database operation.
///
/// Dropping the handle detaches the task; it still runs to completion.
/// [`cancel`](Self::cancel) is best effort: a write the writer thread has
/// already accepted still commits.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: Uuid,
    operation: &'static str,
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub(crate) fn spawn<Fut>(tracker: &TaskTracker, operation: &'static str, fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = Uuid::now_v7();
        let span = tracing::debug_span!("background_write", task_id = %id, operation);
        let handle = tracker.spawn(
            async move {
                let result = fut.await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "Background write failed");
                }
                result
            }
            .instrument(span),
        );

        Self {
            id,
            operation,
            handle,
        }
    }
}

impl<T> TaskHandle<T> {
    /// Time-sortable identifier, also recorded on the task's tracing span.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the operation's result.
    ///
    /// Returns [`Error::Cancelled`](crate::Error::Cancelled) if the task was
    /// cancelled before it finished.
    pub async fn join(self) -> Result<T> {
        self.handle.await?
    }
}

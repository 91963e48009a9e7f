//! Commit notification bus for live observations.
//!
//! - tokio::sync::broadcast for pub-sub notifications
//! - Lightweight notifications name the tables a commit touched; observers
//!   decide for themselves whether to refetch

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, Receiver, Sender};

/// Notification sent after a write transaction commits.
#[derive(Debug, Clone)]
pub struct TableChange {
    /// Tables with at least one inserted, updated or deleted row
    pub tables: Arc<BTreeSet<String>>,
    /// Monotonic commit counter of the writer
    pub commit_seq: u64,
}

impl TableChange {
    /// Whether this commit changed rows of `table`.
    ///
    /// SQLite identifiers are case-insensitive, so is this comparison.
    pub fn touches(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.eq_ignore_ascii_case(table))
    }
}

/// Notification bus for waking observations.
///
/// The writer thread publishes one [`TableChange`] per committed transaction
/// that modified rows. Observations subscribe and refetch when their table is
/// named.
#[derive(Clone)]
pub struct NotificationBus {
    sender: Sender<TableChange>,
}

impl NotificationBus {
    /// Create a new notification bus with the given capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of buffered notifications.
    ///   Older notifications are dropped if consumers fall behind.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to notifications.
    ///
    /// Returns a receiver that will receive all future notifications.
    pub fn subscribe(&self) -> Receiver<TableChange> {
        self.sender.subscribe()
    }

    /// Notify subscribers that a transaction committed.
    ///
    /// Called by the writer thread after a successful commit.
    ///
    /// # Returns
    ///
    /// The number of receivers that received the notification.
    pub fn notify(&self, tables: BTreeSet<String>, commit_seq: u64) -> usize {
        // send() returns an error if there are no receivers, which is fine
        self.sender
            .send(TableChange {
                tables: Arc::new(tables),
                commit_seq,
            })
            .unwrap_or(0)
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

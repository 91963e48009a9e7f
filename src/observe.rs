//! Live result-set observation.
//!
//! A [`ValueObservation`] pairs a [`Query`] with the database's commit
//! notifications. Change detection comes from the writer's update hook and
//! authorizer; this module only filters notifications by table and refetches.

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::database::Database;
use crate::error::Result;
use crate::observability::metrics;
use crate::query::Query;
use crate::record::{FetchableRecord, TableRecord};

/// Restartable observation of a query's results.
pub struct ValueObservation<T> {
    db: Database,
    query: Query<T>,
}

impl<T> Clone for ValueObservation<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            query: self.query.clone(),
        }
    }
}

impl<T> ValueObservation<T>
where
    T: TableRecord + FetchableRecord + Send + 'static,
{
    pub(crate) fn new(db: Database, query: Query<T>) -> Self {
        Self { db, query }
    }

    pub fn query(&self) -> &Query<T> {
        &self.query
    }

    /// Fetch the current results once.
    pub async fn fetch(&self) -> Result<Vec<T>> {
        let query = self.query.clone();
        self.db
            .read_async(move |conn| Ok(query.fetch_all(conn)?))
            .await
    }

    /// Stream of result sets.
    ///
    /// Yields the current results first, then fresh results after every
    /// committed write that changed a row of the observed table. A reader that
    /// falls behind and misses notifications refetches once. The stream ends
    /// when the database is closed. Each call starts a new, independent
    /// observation.
    pub fn values(&self) -> BoxStream<'static, Result<Vec<T>>> {
        let table = self.query.table();

        // Subscribe before the first fetch so no commit slips between them
        let changes = BroadcastStream::new(self.db.subscribe_changes()).filter_map(move |item| {
            let relevant = match item {
                Ok(change) => change.touches(table),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    tracing::debug!(table, missed, "Observation lagged, refetching");
                    true
                }
            };
            future::ready(relevant.then_some(true))
        });

        let observation = self.clone();
        stream::once(future::ready(false))
            .chain(changes)
            .then(move |refresh| {
                let observation = observation.clone();
                async move {
                    if refresh {
                        metrics::record_observation_refresh(table);
                    }
                    observation.fetch().await
                }
            })
            .take_until(self.db.closed())
            .boxed()
    }
}

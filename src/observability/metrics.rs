//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - rowsync_rows_written_total: Counter of rows written, by table and operation
//! - rowsync_write_latency_seconds: Histogram of batch write latency
//! - rowsync_observation_refresh_total: Counter of observation refetches
//!
//! Nothing is recorded until [`init_metrics`] or [`init_metrics_with_meter`]
//! has been called.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Rowsync metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Rows inserted, updated or deleted by batch operations.
    pub rows_written: Counter<u64>,
    /// Latency of batch operations, from submission to commit.
    pub write_latency: Histogram<f64>,
    /// Observation refetches triggered by commits.
    pub observation_refresh: Counter<u64>,
}

impl Metrics {
    /// Create the instruments on `meter`.
    pub fn new(meter: &Meter) -> Self {
        Self {
            rows_written: meter
                .u64_counter("rowsync_rows_written_total")
                .with_description("Rows written by batch operations")
                .with_unit("1")
                .init(),
            write_latency: meter
                .f64_histogram("rowsync_write_latency_seconds")
                .with_description("Batch operation latency from submission to commit")
                .with_unit("s")
                .init(),
            observation_refresh: meter
                .u64_counter("rowsync_observation_refresh_total")
                .with_description("Observation refetches after a relevant commit")
                .with_unit("1")
                .init(),
        }
    }

    /// Record a committed batch operation.
    pub fn record_write(&self, table: &str, operation: &'static str, rows: u64, latency: Duration) {
        if rows > 0 {
            self.rows_written.add(
                rows,
                &[
                    KeyValue::new("table", table.to_string()),
                    KeyValue::new("operation", operation),
                ],
            );
        }
        self.write_latency
            .record(latency.as_secs_f64(), &[KeyValue::new("operation", operation)]);
    }

    /// Record an observation refetch.
    pub fn record_observation_refresh(&self, table: &str) {
        self.observation_refresh
            .add(1, &[KeyValue::new("table", table.to_string())]);
    }
}

/// Initialize the metrics system on the global meter provider.
///
/// Rowsync does not install a provider: instruments are created on whatever
/// provider the host has registered with `opentelemetry::global` (install it
/// first), and are no-ops otherwise. Subsequent calls are ignored.
pub fn init_metrics() {
    METRICS.get_or_init(|| Metrics::new(&global::meter("rowsync")));
}

/// Initialize the metrics system on a specific meter.
///
/// Returns `false` if metrics were already initialized.
pub fn init_metrics_with_meter(meter: &Meter) -> bool {
    METRICS.set(Metrics::new(meter)).is_ok()
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record a committed batch operation.
pub fn record_write(table: &str, operation: &'static str, rows: u64, latency: Duration) {
    if let Some(m) = METRICS.get() {
        m.record_write(table, operation, rows, latency);
    }
}

/// Record an observation refetch.
pub fn record_observation_refresh(table: &str) {
    if let Some(m) = METRICS.get() {
        m.record_observation_refresh(table);
    }
}

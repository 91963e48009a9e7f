//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing setup for host applications and tests
//! - OpenTelemetry metrics for batch writes and observation refreshes

pub mod metrics;
pub mod tracing;

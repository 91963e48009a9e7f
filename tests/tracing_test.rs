//! Global subscriber installation.
//!
//! Kept in its own test binary: the subscriber is process-wide.

use rowsync::observability::tracing::init_tracing;

#[test]
fn test_init_tracing_installs_once() {
    init_tracing("rowsync=debug", true).unwrap();
    tracing::debug!("subscriber installed");

    assert!(init_tracing("info", false).is_err());
}

//! Change notification infrastructure.
//!
//! Provides:
//! - Notification bus for waking live observations after a commit

pub mod notify;

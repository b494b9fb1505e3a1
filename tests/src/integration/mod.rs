//! # Integration Tests
//!
//! Live logging, simulated crashes and replay, all through the public API
//! and a real WAL directory.

pub mod crash_recovery;
pub mod group_commit;

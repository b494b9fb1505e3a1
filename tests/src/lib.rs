//! # Quantum-Chain Consensus WAL Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── benchmarks/       # Criterion benchmarks (driven from benches/)
//! │   └── qc_18_consensus_wal.rs
//! │
//! └── integration/      # Crash/restart cycles against real directories
//!     ├── crash_recovery.rs
//!     └── group_commit.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # By category
//! cargo test -p qc-tests integration::crash_recovery
//! cargo test -p qc-tests integration::group_commit
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

pub mod benchmarks;
pub mod integration;

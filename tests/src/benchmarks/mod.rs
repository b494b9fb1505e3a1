//! # Consensus WAL Benchmarks
//!
//! Criterion benchmarks for the append, flush and replay paths.

pub mod qc_18_consensus_wal;

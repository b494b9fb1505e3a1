//! # Quantum-Chain Consensus WAL Benchmarks
//!
//! | Path | Target |
//! |------|--------|
//! | Vote encode / decode | < 1μs |
//! | Group-commit append (memory) | < 1μs per entry |
//! | Replay, 100 heights | < 50ms |
//! | Every-write append (file) | bounded by fsync |

use criterion::{criterion_group, criterion_main, Criterion};

fn wal_benchmarks(c: &mut Criterion) {
    qc_tests::benchmarks::qc_18_consensus_wal::register_benchmarks(c);
}

criterion_group!(benches, wal_benchmarks);
criterion_main!(benches);

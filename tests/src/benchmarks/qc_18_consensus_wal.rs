//! # QC-18 Consensus WAL Benchmarks
//!
//! - Codec: encode and decode of the largest common entry (a vote)
//! - Append: in-memory log under every-write and group commit
//! - Replay: scan and re-feed of a log with many heights
//! - File: append + fsync against a real directory

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use qc_18_consensus_wal::test_utils::{
    height_complete, peer_vote, self_proposal, InMemoryBlockStore, RecordingMachine,
};
use qc_18_consensus_wal::{
    decode, encode, AppendLog, Envelope, FileAppendLog, FlushPolicy, MemoryAppendLog,
    ReplayEngine, ReplayStart, WalConfig,
};
use std::time::Duration;

fn height_traffic(height: u64, votes: u32) -> Vec<Envelope> {
    let mut entries = vec![self_proposal(height, 0)];
    entries.extend((0..votes).map(|i| peer_vote(height, 0, &format!("peer{}", i))));
    entries.push(height_complete(height));
    entries
}

pub fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-codec");
    let vote = peer_vote(10, 2, "peerA");
    let body = encode(&vote);

    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("encode_vote", |b| b.iter(|| black_box(encode(&vote))));
    group.bench_function("decode_vote", |b| {
        b.iter(|| black_box(decode(&body).is_ok()))
    });
    group.finish();
}

pub fn bench_memory_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-append-memory");
    let entries = height_traffic(1, 100);
    group.throughput(Throughput::Elements(entries.len() as u64));

    let policies = [
        ("every_write", FlushPolicy::EveryWrite),
        (
            "group_16",
            FlushPolicy::GroupCommit {
                max_frames: 16,
                max_delay_ms: 10,
            },
        ),
    ];
    for (name, policy) in policies {
        group.bench_with_input(BenchmarkId::new("append", name), &policy, |b, policy| {
            b.iter(|| {
                let mut log = MemoryAppendLog::new(*policy);
                for entry in &entries {
                    log.append(entry).unwrap();
                }
                log.flush().unwrap();
                black_box(log.size())
            })
        });
    }
    group.finish();
}

pub fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-replay");
    group.measurement_time(Duration::from_secs(10));

    for heights in [10u64, 100] {
        let mut log = MemoryAppendLog::new(FlushPolicy::GroupCommit {
            max_frames: 64,
            max_delay_ms: u64::MAX,
        });
        for h in 1..=heights {
            for entry in height_traffic(h, 20) {
                log.append(&entry).unwrap();
            }
        }
        log.flush().unwrap();
        let blocks = InMemoryBlockStore::committed_through(heights);

        group.throughput(Throughput::Bytes(log.size()));
        group.bench_with_input(BenchmarkId::new("replay", heights), &heights, |b, &h| {
            b.iter(|| {
                let mut machine = RecordingMachine::at_checkpoint(h);
                let outcome = ReplayEngine::new(ReplayStart::default())
                    .run(&log, &blocks, &mut machine)
                    .unwrap();
                black_box(outcome.counts.frames_scanned)
            })
        });
    }
    group.finish();
}

pub fn bench_file_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-append-file");
    group.sample_size(20);
    let entries = height_traffic(1, 50);
    group.throughput(Throughput::Elements(entries.len() as u64));

    let policies = [
        ("every_write", FlushPolicy::EveryWrite),
        (
            "group_32",
            FlushPolicy::GroupCommit {
                max_frames: 32,
                max_delay_ms: 5,
            },
        ),
    ];
    for (name, policy) in policies {
        group.bench_with_input(BenchmarkId::new("append_sync", name), &policy, |b, policy| {
            b.iter(|| {
                let dir = tempfile::tempdir().unwrap();
                let mut log =
                    FileAppendLog::open(WalConfig::new(dir.path(), 64 << 20, *policy)).unwrap();
                for entry in &entries {
                    log.append(entry).unwrap();
                }
                log.flush().unwrap();
                black_box(log.size())
            })
        });
    }
    group.finish();
}

pub fn register_benchmarks(c: &mut Criterion) {
    bench_codec(c);
    bench_memory_append(c);
    bench_replay(c);
    bench_file_append(c);
}

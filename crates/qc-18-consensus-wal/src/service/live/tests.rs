//! # Live Logger Tests

use super::*;
use crate::adapters::infra::ManualTimeSource;
use crate::adapters::storage::{FileAppendLog, MemoryAppendLog};
use crate::domain::codec::{decode, DecodedEntry};
use crate::domain::config::{FlushPolicy, WalConfig};
use crate::domain::entities::{RoundStep, TimeoutInfo};
use crate::service::replay::{ReplayEngine, ReplayStart};
use crate::test_utils::{
    height_complete, peer_vote, self_proposal, timeout, timeout_info, InMemoryBlockStore,
    RecordingMachine, RecordingSink,
};
use std::fs;
use std::path::PathBuf;

const WIDE_WINDOW: FlushPolicy = FlushPolicy::GroupCommit {
    max_frames: 100,
    max_delay_ms: 50,
};

fn replay_fresh<L: AppendLog>(log: &L) -> ReplayOutcome {
    ReplayEngine::new(ReplayStart::default())
        .run(
            log,
            &InMemoryBlockStore::committed_through(10),
            &mut RecordingMachine::at_checkpoint(0),
        )
        .unwrap()
}

fn manual_logger() -> (
    LiveLogger<MemoryAppendLog<ManualTimeSource>, ManualTimeSource>,
    ManualTimeSource,
) {
    let clock = ManualTimeSource::new(1_000);
    let log = MemoryAppendLog::with_clock(WIDE_WINDOW, clock.clone());
    let outcome = replay_fresh(&log);
    let logger = LiveLogger::resume_with_clock(log, &outcome, clock.clone()).unwrap();
    (logger, clock)
}

#[test]
fn test_self_message_is_durable_when_record_returns() {
    let (mut logger, _clock) = manual_logger();

    logger.record(self_proposal(1, 0).event).unwrap();

    assert!(!logger.log().has_unflushed());
    assert_eq!(logger.log().flush_count(), 1);
}

#[test]
fn test_height_complete_is_durable_and_becomes_checkpoint() {
    let (mut logger, _clock) = manual_logger();
    logger.record(peer_vote(1, 0, "peerA").event).unwrap();
    let offset = logger.record(height_complete(1).event).unwrap();

    assert!(!logger.log().has_unflushed());
    assert_eq!(logger.last_checkpoint(), Some((1, offset)));
}

#[test]
fn test_peer_message_and_timeout_wait_for_window() {
    let (mut logger, clock) = manual_logger();
    logger.record(peer_vote(1, 0, "peerA").event).unwrap();
    logger.record(timeout(1, 0, RoundStep::Prevote).event).unwrap();
    assert!(logger.log().has_unflushed());
    assert!(!logger.tick().unwrap());

    clock.advance_ms(50);
    assert!(logger.tick().unwrap());
    assert!(!logger.log().has_unflushed());
}

#[test]
fn test_record_stamps_entries_with_clock() {
    let (mut logger, clock) = manual_logger();
    clock.set_ms(42_000);
    logger.record(self_proposal(1, 0).event).unwrap();

    let frame = logger.log().stream_from(0).unwrap().next().unwrap().unwrap();
    match decode(&frame.body).unwrap() {
        DecodedEntry::Known(envelope) => {
            assert_eq!(envelope.timestamp_ms, 42_000)
        }
        other => panic!("unexpected entry {:?}", other),
    }
}

#[test]
fn test_emit_flushes_pending_entries_first() {
    let (mut logger, _clock) = manual_logger();
    logger.record(peer_vote(1, 0, "peerA").event).unwrap();
    assert!(logger.log().has_unflushed());

    let mut sink = RecordingSink::default();
    logger
        .emit(
            OutboundEffect::AckPeer {
                peer: "peerA".into(),
            },
            &mut sink,
        )
        .unwrap();

    assert!(!logger.log().has_unflushed());
    assert_eq!(sink.delivered.len(), 1);
}

#[test]
fn test_emit_without_pending_does_not_flush() {
    let (mut logger, _clock) = manual_logger();
    let mut sink = RecordingSink::default();
    logger
        .emit(
            OutboundEffect::ScheduleTimeout(timeout_info(1, 0, RoundStep::Propose)),
            &mut sink,
        )
        .unwrap();
    assert_eq!(logger.log().flush_count(), 0);
}

#[test]
fn test_dispatch_records_then_feeds_machine_then_emits() {
    let (mut logger, _clock) = manual_logger();
    let mut machine = RecordingMachine::at_checkpoint(0);
    let mut sink = RecordingSink::default();

    logger
        .dispatch(peer_vote(1, 0, "peerA").event, &mut machine, &mut sink)
        .unwrap();
    logger
        .dispatch(height_complete(1).event, &mut machine, &mut sink)
        .unwrap();

    assert_eq!(machine.live, 2);
    assert_eq!(machine.replayed, 0);
    assert_eq!(machine.state.height, 2);
    assert!(matches!(
        sink.delivered.as_slice(),
        [
            OutboundEffect::AckPeer { .. },
            OutboundEffect::ScheduleTimeout(TimeoutInfo {
                height: 2,
                step: RoundStep::NewHeight,
                ..
            })
        ]
    ));
    assert!(!logger.log().has_unflushed());
}

/// Sink that records how many bytes the active segment held at each delivery.
struct DiskSizeSink {
    segment: PathBuf,
    sizes_at_delivery: Vec<u64>,
}

impl EffectSink for DiskSizeSink {
    fn deliver(&mut self, _effect: OutboundEffect) -> WalResult<()> {
        let len = fs::metadata(&self.segment)
            .map_err(|e| WalError::io(&self.segment, e))?
            .len();
        self.sizes_at_delivery.push(len);
        Ok(())
    }
}

#[test]
fn test_effects_leave_only_after_entry_is_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = WalConfig::new(dir.path(), 1 << 20, FlushPolicy::GroupCommit {
        max_frames: 100,
        max_delay_ms: u64::MAX,
    });
    let log = FileAppendLog::open(config).unwrap();
    let outcome = replay_fresh(&log);
    let mut logger = LiveLogger::resume(log, &outcome).unwrap();

    let mut machine = RecordingMachine::at_checkpoint(0);
    let mut sink = DiskSizeSink {
        segment: dir.path().join("00000000000000000000.wal"),
        sizes_at_delivery: Vec::new(),
    };

    logger
        .dispatch(peer_vote(1, 0, "peerA").event, &mut machine, &mut sink)
        .unwrap();
    logger
        .dispatch(self_proposal(1, 0).event, &mut machine, &mut sink)
        .unwrap();

    let size = logger.log().size();
    assert_eq!(sink.sizes_at_delivery.len(), 2);
    assert!(sink.sizes_at_delivery[0] > 0);
    assert_eq!(sink.sizes_at_delivery[1], size);
}

#[test]
fn test_resume_cuts_torn_tail_before_appending() {
    let mut log = MemoryAppendLog::new(FlushPolicy::EveryWrite);
    log.append(&peer_vote(1, 0, "peerA")).unwrap();
    let valid = log.size();
    let mut bytes = log.crash();
    bytes.extend_from_slice(&[0x20, 0x00, 0x00]);

    let log = MemoryAppendLog::from_durable(bytes, FlushPolicy::EveryWrite);
    let outcome = replay_fresh(&log);
    assert_eq!(outcome.end_offset, valid);
    assert!(outcome.torn_tail.is_some());

    let mut logger = LiveLogger::resume(log, &outcome).unwrap();
    assert_eq!(logger.log().size(), valid);
    let offset = logger.record(self_proposal(1, 0).event).unwrap();
    assert_eq!(offset, valid);

    let frames: Vec<_> = logger
        .log()
        .stream_from(0)
        .unwrap()
        .collect::<WalResult<_>>()
        .unwrap();
    assert_eq!(frames.len(), 2);
}

#[test]
fn test_resume_rejects_outcome_past_end_of_log() {
    let mut log = MemoryAppendLog::new(FlushPolicy::EveryWrite);
    log.append(&peer_vote(1, 0, "peerA")).unwrap();
    let outcome = replay_fresh(&log);

    let empty = MemoryAppendLog::new(FlushPolicy::EveryWrite);
    let err = LiveLogger::resume(empty, &outcome).err().unwrap();
    assert!(matches!(err, WalError::InvalidOffset { end: 0, .. }));
}

#[test]
fn test_resume_seeds_checkpoint_from_replay() {
    let mut log = MemoryAppendLog::new(FlushPolicy::EveryWrite);
    log.append(&peer_vote(1, 0, "peerA")).unwrap();
    let marker = log.append(&height_complete(1)).unwrap();
    let outcome = replay_fresh(&log);

    let logger = LiveLogger::resume(log, &outcome).unwrap();
    assert_eq!(logger.last_checkpoint(), Some((1, marker)));
}

#[test]
fn test_compact_to_checkpoint_drops_segments_before_marker() {
    let dir = tempfile::tempdir().unwrap();
    let config = WalConfig::new(dir.path(), 256, FlushPolicy::EveryWrite);
    let log = FileAppendLog::open(config).unwrap();
    let outcome = replay_fresh(&log);
    let mut logger = LiveLogger::resume(log, &outcome).unwrap();
    assert_eq!(logger.compact_to_checkpoint().unwrap(), 0);

    for round in 0..10 {
        logger.record(peer_vote(1, round, "peerA").event).unwrap();
    }
    let marker = logger.record(height_complete(1).event).unwrap();
    logger.record(peer_vote(2, 0, "peerA").event).unwrap();
    let before = logger.log().segment_count();
    assert!(before > 2);

    let removed = logger.compact_to_checkpoint().unwrap();
    assert!(removed > 0);
    assert!(logger.log().start_offset() <= marker);

    let log = logger.into_log();
    let reopened = ReplayEngine::new(ReplayStart::default())
        .run(
            &log,
            &InMemoryBlockStore::committed_through(1),
            &mut RecordingMachine::at_checkpoint(1),
        )
        .unwrap();
    assert_eq!(reopened.checkpoint.unwrap().offset, marker);
    assert_eq!(reopened.counts.events_replayed, 2);
}

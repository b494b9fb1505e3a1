//! # Crash Recovery
//!
//! Runs consensus traffic through a live logger, drops the log the way a
//! crash would, damages the directory in the ways a crash can, then
//! recovers with a fresh state machine.
//!
//! Recovery must land on the same round state the live node had, restart
//! only the timers that were still outstanding, and never let a network
//! effect out while replaying.

#[cfg(test)]
mod tests {
    use qc_18_consensus_wal::domain::codec::FRAME_HEADER_LEN;
    use qc_18_consensus_wal::test_utils::{
        committed_block, height_complete, peer_vote, sample_header, self_proposal, self_vote,
        timeout, InMemoryBlockStore, RecordingMachine, RecordingSink,
    };
    use qc_18_consensus_wal::{
        AppendLog, BlockId, BlockMeta, CorruptionKind, Envelope, FileAppendLog, FlushPolicy,
        LiveLogger, ReplayEngine, ReplayOutcome, ReplayStart, RoundStep, WalConfig, WalError,
        WalResult,
    };
    use std::fs;
    use std::path::{Path, PathBuf};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const SEGMENT_BYTES: u64 = 512;

    fn open(dir: &Path) -> FileAppendLog {
        FileAppendLog::open(WalConfig::new(dir, SEGMENT_BYTES, FlushPolicy::EveryWrite)).unwrap()
    }

    fn replay(
        log: &FileAppendLog,
        blocks: &InMemoryBlockStore,
        machine: &mut RecordingMachine,
    ) -> WalResult<ReplayOutcome> {
        ReplayEngine::new(ReplayStart::default()).run(log, blocks, machine)
    }

    /// Three finished heights, then height 4 in round 1 waiting on a timer.
    fn three_heights_and_a_half() -> Vec<Envelope> {
        let mut script = Vec::new();
        for h in 1..=3 {
            script.push(self_proposal(h, 0));
            script.push(peer_vote(h, 0, "peerA"));
            script.push(timeout(h, 0, RoundStep::Propose));
            script.push(self_vote(h, 0));
            script.push(height_complete(h));
        }
        script.push(self_proposal(4, 0));
        script.push(peer_vote(4, 1, "peerB"));
        script.push(timeout(4, 1, RoundStep::Propose));
        script
    }

    /// Drive `script` through a live logger on `dir` and crash.
    fn run_live_then_crash(dir: &Path, script: Vec<Envelope>) -> RecordingMachine {
        let log = open(dir);
        let mut machine = RecordingMachine::at_checkpoint(0);
        let outcome = replay(&log, &InMemoryBlockStore::default(), &mut machine).unwrap();
        let mut logger = LiveLogger::resume(log, &outcome).unwrap();

        let mut sink = RecordingSink::default();
        for entry in script {
            logger.dispatch(entry.event, &mut machine, &mut sink).unwrap();
        }
        logger.into_log().abandon();
        machine
    }

    fn wal_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("wal"))
            .collect();
        files.sort();
        files
    }

    // =============================================================================
    // RECOVERY
    // =============================================================================

    #[test]
    fn test_recovery_rebuilds_live_round_state() {
        let dir = tempfile::tempdir().unwrap();
        let live = run_live_then_crash(dir.path(), three_heights_and_a_half());
        assert!(wal_files(dir.path()).len() > 1);

        let log = open(dir.path());
        assert!(log.repaired_tail().is_none());
        let mut recovered = RecordingMachine::at_checkpoint(3);
        let outcome = replay(&log, &InMemoryBlockStore::committed_through(3), &mut recovered).unwrap();

        assert_eq!(outcome.checkpoint.as_ref().map(|c| c.height), Some(3));
        assert_eq!(outcome.counts.markers_seen, 3);
        assert_eq!(outcome.counts.events_replayed, 4);
        assert_eq!(outcome.counts.effects_suppressed, 2);
        assert_eq!(recovered.live, 0);

        assert_eq!(recovered.state.height, live.state.height);
        assert_eq!(recovered.state.round, live.state.round);
        let tail = &live.state.applied[live.state.applied.len() - 4..];
        assert_eq!(recovered.state.applied.as_slice(), tail);

        // The next-height timer was superseded by the round 1 propose timeout.
        let timers: Vec<_> = outcome
            .timers_to_restart
            .iter()
            .map(|t| t.position())
            .collect();
        assert_eq!(timers, vec![(4, 1, RoundStep::Prevote)]);
    }

    #[test]
    fn test_recovery_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        run_live_then_crash(dir.path(), three_heights_and_a_half());
        let log = open(dir.path());
        let blocks = InMemoryBlockStore::committed_through(3);

        let mut first = RecordingMachine::at_checkpoint(3);
        let mut second = RecordingMachine::at_checkpoint(3);
        let a = replay(&log, &blocks, &mut first).unwrap();
        let b = replay(&log, &blocks, &mut second).unwrap();

        assert_eq!(a, b);
        assert_eq!(first.state, second.state);
    }

    #[test]
    fn test_torn_final_write_is_cut_and_logging_continues() {
        let dir = tempfile::tempdir().unwrap();
        run_live_then_crash(dir.path(), three_heights_and_a_half());

        let active = wal_files(dir.path()).pop().unwrap();
        let len = fs::metadata(&active).unwrap().len();
        fs::OpenOptions::new()
            .write(true)
            .open(&active)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let log = open(dir.path());
        assert!(log.repaired_tail().is_some());
        assert_eq!(log.metrics().snapshot().torn_tails_repaired, 1);

        let blocks = InMemoryBlockStore::committed_through(3);
        let mut machine = RecordingMachine::at_checkpoint(3);
        let outcome = replay(&log, &blocks, &mut machine).unwrap();
        assert!(outcome.torn_tail.is_none());
        // The round 1 propose timeout was lost with the torn frame.
        assert_eq!(outcome.counts.events_replayed, 3);
        let timers: Vec<_> = outcome
            .timers_to_restart
            .iter()
            .map(|t| t.position())
            .collect();
        assert_eq!(timers, vec![(4, 0, RoundStep::NewHeight)]);

        let mut logger = LiveLogger::resume(log, &outcome).unwrap();
        let mut sink = RecordingSink::default();
        logger
            .dispatch(timeout(4, 1, RoundStep::Propose).event, &mut machine, &mut sink)
            .unwrap();
        logger
            .dispatch(height_complete(4).event, &mut machine, &mut sink)
            .unwrap();
        logger.into_log().abandon();

        let log = open(dir.path());
        let mut again = RecordingMachine::at_checkpoint(4);
        let outcome = replay(&log, &InMemoryBlockStore::committed_through(4), &mut again).unwrap();
        assert_eq!(outcome.checkpoint.map(|c| c.height), Some(4));
        assert_eq!(again.state.height, 5);
    }

    #[test]
    fn test_corruption_before_tail_stops_recovery_with_offset() {
        let dir = tempfile::tempdir().unwrap();
        run_live_then_crash(dir.path(), three_heights_and_a_half());

        let first = wal_files(dir.path()).remove(0);
        let mut bytes = fs::read(&first).unwrap();
        bytes[FRAME_HEADER_LEN + 4] ^= 0x5A;
        fs::write(&first, bytes).unwrap();

        let log = open(dir.path());
        let mut machine = RecordingMachine::at_checkpoint(3);
        let err = replay(&log, &InMemoryBlockStore::committed_through(3), &mut machine).unwrap_err();
        assert!(matches!(
            err,
            WalError::Corruption {
                offset: 0,
                kind: CorruptionKind::ChecksumMismatch { .. },
            }
        ));
        assert_eq!(machine.replayed, 0);
    }

    #[test]
    fn test_marker_naming_another_block_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        run_live_then_crash(dir.path(), three_heights_and_a_half());

        let mut header = sample_header(3);
        header.app_hash = vec![0x99; header.app_hash.len()];
        let forked = BlockMeta {
            block_id: BlockId::new(header.hash(), committed_block(3).block_id.part_set_header),
            header,
            ..committed_block(3)
        };
        let mut blocks = InMemoryBlockStore::committed_through(3);
        blocks.insert(forked);

        let log = open(dir.path());
        let err = replay(&log, &blocks, &mut RecordingMachine::at_checkpoint(3)).unwrap_err();
        assert!(matches!(err, WalError::CheckpointMismatch { height: 3, .. }));
    }

    #[test]
    fn test_missing_committed_block_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        run_live_then_crash(dir.path(), three_heights_and_a_half());

        let log = open(dir.path());
        let err = replay(
            &log,
            &InMemoryBlockStore::committed_through(1),
            &mut RecordingMachine::at_checkpoint(3),
        )
        .unwrap_err();
        assert!(matches!(err, WalError::MissingCommittedBlock { height: 3 }));
    }

    #[test]
    fn test_recovery_with_pruned_block_store() {
        let dir = tempfile::tempdir().unwrap();
        run_live_then_crash(dir.path(), three_heights_and_a_half());

        let mut blocks = InMemoryBlockStore::default();
        blocks.insert(committed_block(3));
        let log = open(dir.path());
        let mut machine = RecordingMachine::at_checkpoint(3);
        let outcome = replay(&log, &blocks, &mut machine).unwrap();
        assert_eq!(outcome.checkpoint.map(|c| c.height), Some(3));
        assert_eq!(outcome.counts.markers_seen, 3);
    }

    #[test]
    fn test_compaction_keeps_recovery_intact() {
        let dir = tempfile::tempdir().unwrap();
        run_live_then_crash(dir.path(), three_heights_and_a_half());
        let files_before = wal_files(dir.path()).len();

        let log = open(dir.path());
        let blocks = InMemoryBlockStore::committed_through(3);
        let mut machine = RecordingMachine::at_checkpoint(3);
        let outcome = replay(&log, &blocks, &mut machine).unwrap();
        let mut logger = LiveLogger::resume(log, &outcome).unwrap();
        assert!(logger.compact_to_checkpoint().unwrap() > 0);
        drop(logger);
        assert!(wal_files(dir.path()).len() < files_before);

        let log = open(dir.path());
        assert!(log.start_offset() > 0);
        let mut recovered = RecordingMachine::at_checkpoint(3);
        let again = replay(&log, &blocks, &mut recovered).unwrap();
        assert_eq!(again.checkpoint, outcome.checkpoint);
        assert_eq!(recovered.state, machine.state);
    }
}

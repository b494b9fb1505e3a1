//! # Group Commit
//!
//! Loss bounds under `FlushPolicy::GroupCommit` and the entries that must
//! bypass the window, checked by crashing and counting what survived on
//! disk.

#[cfg(test)]
mod tests {
    use qc_18_consensus_wal::test_utils::{
        height_complete, peer_vote, self_proposal, self_vote, timeout, InMemoryBlockStore,
        RecordingMachine, RecordingSink,
    };
    use qc_18_consensus_wal::{
        decode, scan_dir, spawn_wal_worker, AppendLog, ConsensusStateMachine, DecodedEntry,
        Envelope, Event, FileAppendLog, FlushPolicy, Height, LiveLogger, OutboundEffect,
        ReplayEngine, ReplayStart, RoundStep, WalConfig, WalResult, WorkerConfig,
    };
    use std::path::Path;
    use std::time::Duration;

    /// Accepts everything and asks for nothing, so no effect forces a flush.
    struct SilentMachine;

    impl ConsensusStateMachine for SilentMachine {
        fn current_checkpoint_height(&self) -> Height {
            0
        }

        fn on_event(&mut self, _envelope: &Envelope) -> WalResult<Vec<OutboundEffect>> {
            Ok(Vec::new())
        }
    }

    fn open(dir: &Path, policy: FlushPolicy) -> FileAppendLog {
        FileAppendLog::open(WalConfig::new(dir, 1 << 20, policy)).unwrap()
    }

    fn fresh_logger(dir: &Path, policy: FlushPolicy) -> LiveLogger<FileAppendLog> {
        let log = open(dir, policy);
        let outcome = ReplayEngine::new(ReplayStart::default())
            .run(&log, &InMemoryBlockStore::default(), &mut SilentMachine)
            .unwrap();
        LiveLogger::resume(log, &outcome).unwrap()
    }

    fn surviving(dir: &Path) -> Vec<Event> {
        scan_dir(dir, 1 << 20)
            .unwrap()
            .map(|frame| match decode(&frame.unwrap().body).unwrap() {
                DecodedEntry::Known(envelope) => envelope.event,
                DecodedEntry::Unknown(entry) => panic!("unknown entry {:?}", entry),
            })
            .collect()
    }

    #[test]
    fn test_crash_loses_at_most_one_partial_group() {
        let policy = FlushPolicy::GroupCommit {
            max_frames: 4,
            max_delay_ms: 60_000,
        };
        for appended in [1u32, 3, 4, 5, 7, 8, 11] {
            let dir = tempfile::tempdir().unwrap();
            let mut logger = fresh_logger(dir.path(), policy);
            for round in 0..appended {
                logger.record(peer_vote(1, round, "peerA").event).unwrap();
            }
            logger.into_log().abandon();

            let survived = surviving(dir.path()).len() as u32;
            assert_eq!(survived, appended / 4 * 4, "appended {}", appended);
            assert!(appended - survived <= 3);
        }
    }

    #[test]
    fn test_own_messages_and_markers_skip_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = fresh_logger(
            dir.path(),
            FlushPolicy::GroupCommit {
                max_frames: 1_000,
                max_delay_ms: u64::MAX,
            },
        );

        logger.record(peer_vote(1, 0, "peerA").event).unwrap();
        logger.record(self_proposal(1, 0).event).unwrap();
        logger.record(timeout(1, 0, RoundStep::Propose).event).unwrap();
        logger.record(self_vote(1, 0).event).unwrap();
        logger.record(peer_vote(1, 0, "peerB").event).unwrap();
        logger.record(height_complete(1).event).unwrap();
        logger.record(peer_vote(2, 0, "peerA").event).unwrap();
        logger.into_log().abandon();

        let survived = surviving(dir.path());
        assert_eq!(survived.len(), 6);
        assert!(matches!(
            survived.last(),
            Some(Event::HeightComplete { height: 1, .. })
        ));
    }

    #[test]
    fn test_effects_pull_pending_peer_messages_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = fresh_logger(
            dir.path(),
            FlushPolicy::GroupCommit {
                max_frames: 1_000,
                max_delay_ms: u64::MAX,
            },
        );
        let mut machine = RecordingMachine::at_checkpoint(0);
        let mut sink = RecordingSink::default();

        // Every peer vote is acknowledged, so each one is flushed before its ack.
        for round in 0..5 {
            logger
                .dispatch(peer_vote(1, round, "peerA").event, &mut machine, &mut sink)
                .unwrap();
        }
        logger.into_log().abandon();

        assert_eq!(sink.delivered.len(), 5);
        assert_eq!(surviving(dir.path()).len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_session_recovers_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let logger = fresh_logger(
            dir.path(),
            FlushPolicy::GroupCommit {
                max_frames: 8,
                max_delay_ms: 5,
            },
        );
        let (handle, task) = spawn_wal_worker(
            logger,
            RecordingMachine::at_checkpoint(0),
            RecordingSink::default(),
            WorkerConfig {
                queue_depth: 16,
                tick_interval: Duration::from_millis(1),
            },
        );

        let mut submitters = Vec::new();
        for peer in ["peerA", "peerB", "peerC"] {
            let handle = handle.clone();
            submitters.push(tokio::spawn(async move {
                for round in 0..4 {
                    handle.submit(peer_vote(1, round, peer).event).await.unwrap();
                }
            }));
        }
        for submitter in submitters {
            submitter.await.unwrap();
        }
        handle.submit(height_complete(1).event).await.unwrap();
        handle.submit(self_proposal(2, 0).event).await.unwrap();
        handle.shutdown().await.unwrap();

        let parts = task.await.unwrap();
        let live_state = parts.machine.state.clone();
        assert_eq!(parts.sink.delivered.len(), 14);
        drop(parts);

        let log = open(dir.path(), FlushPolicy::EveryWrite);
        let mut recovered = RecordingMachine::at_checkpoint(1);
        let outcome = ReplayEngine::new(ReplayStart::default())
            .run(&log, &InMemoryBlockStore::committed_through(1), &mut recovered)
            .unwrap();
        assert_eq!(outcome.counts.frames_scanned, 14);
        assert_eq!(outcome.counts.events_replayed, 2);
        assert_eq!(recovered.state.height, live_state.height);
        assert_eq!(log.size(), outcome.end_offset);
    }
}

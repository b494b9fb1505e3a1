//! # Replay Engine
//!
//! Rebuilds round state after a restart from the last validated
//! height-complete marker onward.
//!
//! ```text
//! Searching ──(end of log)──→ Replaying ──(buffer drained)──→ Done
//! ```
//!
//! The log is scanned once. Entries are buffered from the most recent
//! marker (inclusive); a newer marker discards the buffer. Only that last
//! marker is validated against the block store, then the buffer is fed to
//! the state machine in log order. Nothing the state
//! machine asks for during replay reaches the network: broadcasts and
//! acknowledgements are dropped, timer requests are collected and handed
//! back so the caller can restart them once.

use crate::adapters::storage::TornTail;
use crate::domain::block_identity::validate_block_meta;
use crate::domain::codec::{decode, DecodedEntry};
use crate::domain::entities::{
    BlockId, Envelope, Event, Height, OutboundEffect, Round, RoundStep, TimeoutInfo,
};
use crate::domain::errors::{WalError, WalResult};
use crate::ports::outbound::{AppendLog, CommittedBlockStore, ConsensusStateMachine};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Where a replay begins reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStart {
    /// Global byte offset of a frame boundary. Offsets below the first
    /// retained segment start there.
    pub offset: u64,
}

impl ReplayStart {
    pub fn at(offset: u64) -> Self {
        Self { offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPhase {
    Searching,
    Replaying,
    Done,
}

/// The marker replay resumed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: Height,
    pub block_id: BlockId,
    /// Offset of the marker frame.
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayCounts {
    pub frames_scanned: u64,
    /// Events handed to the state machine, the checkpoint marker included.
    pub events_replayed: u64,
    /// Events before the checkpoint marker, not replayed.
    pub events_before_checkpoint: u64,
    pub markers_seen: u64,
    pub snapshots_skipped: u64,
    pub unknown_skipped: u64,
    /// Broadcasts and peer acknowledgements withheld.
    pub effects_suppressed: u64,
}

/// Result of a completed replay. The only way to obtain a `LiveLogger`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub checkpoint: Option<Checkpoint>,
    pub counts: ReplayCounts,
    /// Timers requested during replay and not fired later in the log, in
    /// (height, round, step) order.
    pub timers_to_restart: Vec<TimeoutInfo>,
    /// Offset just past the last valid frame.
    pub end_offset: u64,
    pub torn_tail: Option<TornTail>,
}

/// Single-pass recovery driver.
#[derive(Debug)]
pub struct ReplayEngine {
    start: ReplayStart,
    phase: ReplayPhase,
}

impl ReplayEngine {
    pub fn new(start: ReplayStart) -> Self {
        Self {
            start,
            phase: ReplayPhase::Searching,
        }
    }

    pub fn phase(&self) -> ReplayPhase {
        self.phase
    }

    /// Replay `log` into `machine`.
    ///
    /// Never writes to the log; running it twice over the same log feeds
    /// the same events in the same order.
    ///
    /// # Errors
    ///
    /// Corruption and decode errors from the scan, marker validation
    /// failures, and state machine errors. All of them are fatal.
    pub fn run<L, B, M>(
        &mut self,
        log: &L,
        blocks: &B,
        machine: &mut M,
    ) -> WalResult<ReplayOutcome>
    where
        L: AppendLog + ?Sized,
        B: CommittedBlockStore + ?Sized,
        M: ConsensusStateMachine + ?Sized,
    {
        self.phase = ReplayPhase::Searching;
        let checkpoint_height = machine.current_checkpoint_height();
        info!(
            "[qc-18] Replay searching from offset {} (state machine at height {})",
            self.start.offset, checkpoint_height
        );

        let mut counts = ReplayCounts::default();
        let mut checkpoint: Option<Checkpoint> = None;
        let mut buffer: Vec<Envelope> = Vec::new();

        let mut stream = log.stream_from(self.start.offset)?;
        for frame in stream.by_ref() {
            let frame = frame?;
            counts.frames_scanned += 1;
            let envelope = match decode(&frame.body) {
                Ok(DecodedEntry::Known(envelope)) => envelope,
                Ok(DecodedEntry::Unknown(entry)) => {
                    debug!(
                        "[qc-18] Skipping unknown entry at offset {} (event tag {}, message tag {:?})",
                        frame.offset, entry.event_tag, entry.message_tag
                    );
                    counts.unknown_skipped += 1;
                    continue;
                }
                Err(source) => {
                    return Err(WalError::Decode {
                        offset: frame.offset,
                        source,
                    })
                }
            };

            match &envelope.event {
                Event::HeightComplete { height, block_id } => {
                    counts.markers_seen += 1;
                    if let Some(previous) = &checkpoint {
                        if *height <= previous.height {
                            warn!(
                                "[qc-18] Height-complete marker for {} at offset {} follows marker for {}; using the later one",
                                height, frame.offset, previous.height
                            );
                        }
                    }
                    counts.events_before_checkpoint += buffer.len() as u64;
                    buffer.clear();
                    checkpoint = Some(Checkpoint {
                        height: *height,
                        block_id: block_id.clone(),
                        offset: frame.offset,
                    });
                    buffer.push(envelope);
                }
                Event::DebugSnapshot(_) => counts.snapshots_skipped += 1,
                Event::PeerMessage { .. } | Event::Timeout(_) => buffer.push(envelope),
            }
        }
        let torn_tail = stream.torn_tail();
        let end_offset = stream.valid_end();
        drop(stream);

        if let Some(torn) = torn_tail {
            warn!(
                "[qc-18] Replay stopped at torn tail offset {} ({:?})",
                torn.offset, torn.reason
            );
        }

        // Superseded markers are never consulted; the block store may have
        // pruned their blocks.
        if let Some(c) = &checkpoint {
            validate_marker(c.height, &c.block_id, checkpoint_height, blocks)?;
        }

        self.phase = ReplayPhase::Replaying;
        info!(
            "[qc-18] Replaying {} events from checkpoint {:?}",
            buffer.len(),
            checkpoint.as_ref().map(|c| c.height)
        );

        let mut deferred: BTreeMap<(Height, Round, RoundStep), TimeoutInfo> = BTreeMap::new();
        for envelope in &buffer {
            let effects = machine.on_replayed_event(envelope)?;
            counts.events_replayed += 1;

            if let Event::Timeout(fired) = &envelope.event {
                let fired_at = fired.position();
                deferred.retain(|position, _| *position > fired_at);
            }
            for effect in effects {
                match effect {
                    OutboundEffect::Broadcast(_) | OutboundEffect::AckPeer { .. } => {
                        counts.effects_suppressed += 1;
                    }
                    OutboundEffect::ScheduleTimeout(timeout) => {
                        deferred.insert(timeout.position(), timeout);
                    }
                }
            }
        }

        self.phase = ReplayPhase::Done;
        let outcome = ReplayOutcome {
            checkpoint,
            counts,
            timers_to_restart: deferred.into_values().collect(),
            end_offset,
            torn_tail,
        };
        info!(
            "[qc-18] Replay done: {} events replayed, {} effects suppressed, {} timers to restart, end offset {}",
            outcome.counts.events_replayed,
            outcome.counts.effects_suppressed,
            outcome.timers_to_restart.len(),
            outcome.end_offset
        );
        Ok(outcome)
    }
}

/// Check a height-complete marker against the committed block store.
///
/// A marker at or below the state machine's checkpoint must name exactly
/// the committed block. A marker above it is checked when the block is
/// known and otherwise becomes the recovery baseline.
fn validate_marker<B>(
    height: Height,
    block_id: &BlockId,
    checkpoint_height: Height,
    blocks: &B,
) -> WalResult<()>
where
    B: CommittedBlockStore + ?Sized,
{
    block_id
        .validate_basic()
        .map_err(|source| WalError::BlockValidation { height, source })?;

    if !blocks.has_committed_block(height)? {
        if height <= checkpoint_height {
            return Err(WalError::MissingCommittedBlock { height });
        }
        debug!(
            "[qc-18] Marker for height {} not yet committed locally; using it as baseline",
            height
        );
        return Ok(());
    }

    let meta = blocks
        .committed_block_meta(height)?
        .ok_or(WalError::MissingCommittedBlock { height })?;
    validate_block_meta(&meta).map_err(|source| WalError::BlockValidation { height, source })?;
    if meta.block_id != *block_id {
        return Err(WalError::CheckpointMismatch {
            height,
            logged: hex::encode_upper(&block_id.hash),
            committed: hex::encode_upper(&meta.block_id.hash),
        });
    }
    Ok(())
}

/// Offset of the last height-complete marker for `height`, if any.
pub fn find_height_complete<L>(log: &L, height: Height) -> WalResult<Option<u64>>
where
    L: AppendLog + ?Sized,
{
    let mut found = None;
    for frame in log.stream_from(log.start_offset())? {
        let frame = frame?;
        match decode(&frame.body) {
            Ok(DecodedEntry::Known(Envelope {
                event: Event::HeightComplete { height: h, .. },
                ..
            })) if h == height => found = Some(frame.offset),
            Ok(_) => {}
            Err(source) => {
                return Err(WalError::Decode {
                    offset: frame.offset,
                    source,
                })
            }
        }
    }
    Ok(found)
}

//! Fixtures shared by unit tests and the workspace integration tests.

use crate::domain::entities::{
    BlockId, BlockMeta, ConsensusMessage, Envelope, Event, Header, Height, Origin,
    OutboundEffect, PartSetHeader, Proposal, Round, RoundStateSnapshot, RoundStep, TimeoutInfo,
    Vote, VoteType, HASH_LEN,
};
use crate::domain::errors::WalResult;
use crate::ports::outbound::{CommittedBlockStore, ConsensusStateMachine, EffectSink};
use std::collections::HashMap;
use std::time::Duration;

pub const CHAIN_ID: &str = "qc-test-chain";

pub fn sample_header(height: Height) -> Header {
    let seed = height as u8;
    Header {
        chain_id: CHAIN_ID.to_string(),
        height,
        time_ms: 1_700_000_000_000 + height * 1_000,
        last_block_id: (height > 1)
            .then(|| BlockId::new(vec![seed.wrapping_sub(1); HASH_LEN], parts(height - 1))),
        last_commit_hash: vec![seed ^ 0x11; HASH_LEN],
        data_hash: vec![seed ^ 0x22; HASH_LEN],
        validators_hash: vec![seed ^ 0x33; HASH_LEN],
        app_hash: vec![seed ^ 0x44; HASH_LEN],
        proposer_address: vec![0xAA; 20],
    }
}

fn parts(height: Height) -> PartSetHeader {
    PartSetHeader {
        total: 1,
        hash: vec![height as u8 ^ 0x55; HASH_LEN],
    }
}

/// A block meta whose id really is its header's hash.
pub fn committed_block(height: Height) -> BlockMeta {
    let header = sample_header(height);
    BlockMeta {
        block_id: BlockId::new(header.hash(), parts(height)),
        block_size: 1_024,
        header,
        num_txs: height,
    }
}

pub fn block_id_at(height: Height) -> BlockId {
    committed_block(height).block_id
}

fn at(height: Height, round: Round) -> u64 {
    1_700_000_000_000 + height * 1_000 + u64::from(round) * 10
}

pub fn peer_vote(height: Height, round: Round, peer: &str) -> Envelope {
    Envelope::new(
        at(height, round),
        Event::PeerMessage {
            message: ConsensusMessage::Vote(Vote {
                vote_type: VoteType::Prevote,
                height,
                round,
                block_id: Some(block_id_at(height)),
                validator_index: 2,
                validator_address: vec![0xB2; 20],
            }),
            origin: Origin::peer(peer),
        },
    )
}

pub fn self_vote(height: Height, round: Round) -> Envelope {
    Envelope::new(
        at(height, round),
        Event::PeerMessage {
            message: ConsensusMessage::Vote(Vote {
                vote_type: VoteType::Precommit,
                height,
                round,
                block_id: None,
                validator_index: 0,
                validator_address: vec![0xA0; 20],
            }),
            origin: Origin::SelfGenerated,
        },
    )
}

pub fn self_proposal(height: Height, round: Round) -> Envelope {
    Envelope::new(
        at(height, round),
        Event::PeerMessage {
            message: ConsensusMessage::Proposal(Proposal {
                height,
                round,
                pol_round: None,
                block_id: block_id_at(height),
            }),
            origin: Origin::SelfGenerated,
        },
    )
}

pub fn timeout_info(height: Height, round: Round, step: RoundStep) -> TimeoutInfo {
    TimeoutInfo {
        duration: Duration::from_millis(1_000),
        height,
        round,
        step,
    }
}

pub fn timeout(height: Height, round: Round, step: RoundStep) -> Envelope {
    Envelope::new(at(height, round), Event::Timeout(timeout_info(height, round, step)))
}

pub fn height_complete(height: Height) -> Envelope {
    Envelope::new(
        at(height, 9),
        Event::HeightComplete {
            height,
            block_id: block_id_at(height),
        },
    )
}

pub fn debug_snapshot(height: Height, round: Round) -> Envelope {
    Envelope::new(
        at(height, round),
        Event::DebugSnapshot(RoundStateSnapshot {
            height,
            round,
            step: RoundStep::Prevote,
        }),
    )
}

/// Event variant a future build might add.
#[derive(Clone, PartialEq, prost::Message)]
struct FutureEvent {
    #[prost(bytes = "vec", tag = "30")]
    payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct FutureEnvelope {
    #[prost(uint64, tag = "1")]
    timestamp_ms: u64,
    #[prost(message, optional, tag = "2")]
    msg: Option<FutureEvent>,
}

/// Tag of the event written by [`unknown_event_body`].
pub const FUTURE_EVENT_TAG: u32 = 30;

/// Entry body whose event variant this build does not know.
pub fn unknown_event_body(timestamp_ms: u64) -> Vec<u8> {
    prost::Message::encode_to_vec(&FutureEnvelope {
        timestamp_ms,
        msg: Some(FutureEvent {
            payload: b"from a newer build".to_vec(),
        }),
    })
}

/// Block store holding whatever was inserted.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBlockStore {
    blocks: HashMap<Height, BlockMeta>,
}

impl InMemoryBlockStore {
    /// Store with valid committed blocks for `1..=height`.
    pub fn committed_through(height: Height) -> Self {
        let mut store = Self::default();
        for h in 1..=height {
            store.insert(committed_block(h));
        }
        store
    }

    pub fn insert(&mut self, meta: BlockMeta) {
        self.blocks.insert(meta.header.height, meta);
    }
}

impl CommittedBlockStore for InMemoryBlockStore {
    fn has_committed_block(&self, height: Height) -> WalResult<bool> {
        Ok(self.blocks.contains_key(&height))
    }

    fn committed_block_meta(&self, height: Height) -> WalResult<Option<BlockMeta>> {
        Ok(self.blocks.get(&height).cloned())
    }
}

/// Observable state of [`RecordingMachine`], compared across replays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    pub height: Height,
    pub round: Round,
    pub applied: Vec<Event>,
}

/// A toy state machine that remembers every event it processed.
///
/// Effects: a self-generated message is broadcast, a peer message is
/// acknowledged, a completed height schedules the next height's first
/// timeout, a propose timeout schedules the prevote timeout.
#[derive(Debug, Clone)]
pub struct RecordingMachine {
    pub checkpoint_height: Height,
    pub state: MachineState,
    pub replayed: usize,
    pub live: usize,
}

impl RecordingMachine {
    pub fn at_checkpoint(checkpoint_height: Height) -> Self {
        Self {
            checkpoint_height,
            state: MachineState {
                height: checkpoint_height + 1,
                round: 0,
                applied: Vec::new(),
            },
            replayed: 0,
            live: 0,
        }
    }

    fn apply(&mut self, envelope: &Envelope) -> Vec<OutboundEffect> {
        self.state.applied.push(envelope.event.clone());
        match &envelope.event {
            Event::PeerMessage { message, origin } => {
                self.state.round = self.state.round.max(message.round());
                match origin {
                    Origin::SelfGenerated => vec![OutboundEffect::Broadcast(message.clone())],
                    Origin::Peer(peer) => vec![OutboundEffect::AckPeer {
                        peer: peer.to_string(),
                    }],
                }
            }
            Event::Timeout(t) if t.step == RoundStep::Propose => {
                vec![OutboundEffect::ScheduleTimeout(TimeoutInfo {
                    step: RoundStep::Prevote,
                    ..t.clone()
                })]
            }
            Event::Timeout(_) => Vec::new(),
            Event::HeightComplete { height, .. } => {
                self.state.height = height + 1;
                self.state.round = 0;
                vec![OutboundEffect::ScheduleTimeout(TimeoutInfo {
                    duration: Duration::from_millis(1_000),
                    height: height + 1,
                    round: 0,
                    step: RoundStep::NewHeight,
                })]
            }
            Event::DebugSnapshot(_) => Vec::new(),
        }
    }
}

impl ConsensusStateMachine for RecordingMachine {
    fn current_checkpoint_height(&self) -> Height {
        self.checkpoint_height
    }

    fn on_event(&mut self, envelope: &Envelope) -> WalResult<Vec<OutboundEffect>> {
        self.live += 1;
        Ok(self.apply(envelope))
    }

    fn on_replayed_event(&mut self, envelope: &Envelope) -> WalResult<Vec<OutboundEffect>> {
        self.replayed += 1;
        Ok(self.apply(envelope))
    }
}

/// Sink that keeps every delivered effect.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub delivered: Vec<OutboundEffect>,
}

impl EffectSink for RecordingSink {
    fn deliver(&mut self, effect: OutboundEffect) -> WalResult<()> {
        self.delivered.push(effect);
        Ok(())
    }
}

//! # Domain Entities
//!
//! The event model recorded in the consensus WAL.
//!
//! Every variant of [`Event`] is handled exhaustively by the codec and the
//! replay engine; adding a variant is a compile error until both handle it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Block height.
pub type Height = u64;

/// Consensus round within a height.
pub type Round = u32;

/// Length of every non-empty hash carried by a [`BlockId`].
pub const HASH_LEN: usize = 32;

// =============================================================================
// BLOCK IDENTITY
// =============================================================================

/// Header of the part set a block was split into for gossip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartSetHeader {
    /// Number of parts.
    pub total: u32,
    /// Merkle root of the parts. Empty for the zero header.
    #[serde(with = "hex")]
    pub hash: Vec<u8>,
}

impl PartSetHeader {
    /// True for the zero header (no parts, no hash).
    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.hash.is_empty()
    }
}

/// Identity of a block: its header hash plus its part set header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    #[serde(with = "hex")]
    pub hash: Vec<u8>,
    pub part_set_header: PartSetHeader,
}

impl BlockId {
    pub fn new(hash: impl Into<Vec<u8>>, part_set_header: PartSetHeader) -> Self {
        Self {
            hash: hash.into(),
            part_set_header,
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.hash[..self.hash.len().min(6)];
        write!(
            f,
            "{}:{}",
            hex::encode_upper(short),
            self.part_set_header.total
        )
    }
}

/// Block header. Only the fields that participate in the header hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub chain_id: String,
    pub height: Height,
    pub time_ms: u64,
    pub last_block_id: Option<BlockId>,
    #[serde(with = "hex")]
    pub last_commit_hash: Vec<u8>,
    #[serde(with = "hex")]
    pub data_hash: Vec<u8>,
    #[serde(with = "hex")]
    pub validators_hash: Vec<u8>,
    #[serde(with = "hex")]
    pub app_hash: Vec<u8>,
    #[serde(with = "hex")]
    pub proposer_address: Vec<u8>,
}

/// Meta information about a committed block.
///
/// Invariant: `block_id.hash == header.hash()`, checked by
/// [`crate::domain::block_identity::validate_block_meta`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub block_size: u64,
    pub header: Header,
    pub num_txs: u64,
}

// =============================================================================
// ROUND STATE
// =============================================================================

/// Step of the round state machine, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoundStep {
    NewHeight,
    NewRound,
    Propose,
    Prevote,
    PrevoteWait,
    Precommit,
    PrecommitWait,
    Commit,
}

impl RoundStep {
    /// Wire value (1-based, 0 is reserved for "unset").
    pub fn as_u8(self) -> u8 {
        match self {
            RoundStep::NewHeight => 1,
            RoundStep::NewRound => 2,
            RoundStep::Propose => 3,
            RoundStep::Prevote => 4,
            RoundStep::PrevoteWait => 5,
            RoundStep::Precommit => 6,
            RoundStep::PrecommitWait => 7,
            RoundStep::Commit => 8,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => RoundStep::NewHeight,
            2 => RoundStep::NewRound,
            3 => RoundStep::Propose,
            4 => RoundStep::Prevote,
            5 => RoundStep::PrevoteWait,
            6 => RoundStep::Precommit,
            7 => RoundStep::PrecommitWait,
            8 => RoundStep::Commit,
            _ => return None,
        })
    }
}

impl fmt::Display for RoundStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStep::NewHeight => "NewHeight",
            RoundStep::NewRound => "NewRound",
            RoundStep::Propose => "Propose",
            RoundStep::Prevote => "Prevote",
            RoundStep::PrevoteWait => "PrevoteWait",
            RoundStep::Precommit => "Precommit",
            RoundStep::PrecommitWait => "PrecommitWait",
            RoundStep::Commit => "Commit",
        };
        f.write_str(name)
    }
}

/// Diagnostic snapshot of the round state. Never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStateSnapshot {
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
}

/// A scheduled timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutInfo {
    pub duration: Duration,
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
}

impl TimeoutInfo {
    /// Ordering key used to decide whether one timeout supersedes another.
    pub fn position(&self) -> (Height, Round, RoundStep) {
        (self.height, self.round, self.step)
    }
}

// =============================================================================
// CONSENSUS MESSAGES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteType {
    Prevote,
    Precommit,
}

impl VoteType {
    pub fn as_u8(self) -> u8 {
        match self {
            VoteType::Prevote => 1,
            VoteType::Precommit => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(VoteType::Prevote),
            2 => Some(VoteType::Precommit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub height: Height,
    pub round: Round,
    /// Proof-of-lock round, if the proposer is re-proposing a locked block.
    pub pol_round: Option<Round>,
    pub block_id: BlockId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPart {
    pub height: Height,
    pub round: Round,
    pub index: u32,
    #[serde(with = "hex")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: Height,
    pub round: Round,
    /// `None` is a nil vote.
    pub block_id: Option<BlockId>,
    pub validator_index: u32,
    #[serde(with = "hex")]
    pub validator_address: Vec<u8>,
}

/// A message exchanged by the round-voting algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    BlockPart(BlockPart),
    Vote(Vote),
}

impl ConsensusMessage {
    pub fn height(&self) -> Height {
        match self {
            ConsensusMessage::Proposal(p) => p.height,
            ConsensusMessage::BlockPart(p) => p.height,
            ConsensusMessage::Vote(v) => v.height,
        }
    }

    pub fn round(&self) -> Round {
        match self {
            ConsensusMessage::Proposal(p) => p.round,
            ConsensusMessage::BlockPart(p) => p.round,
            ConsensusMessage::Vote(v) => v.round,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Proposal(_) => "proposal",
            ConsensusMessage::BlockPart(_) => "block_part",
            ConsensusMessage::Vote(_) => "vote",
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Identifier of a network peer. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// `None` for the empty string, which the wire reserves for local events.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        (!id.is_empty()).then_some(PeerId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerId {
    type Error = &'static str;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        PeerId::new(id).ok_or("peer id must not be empty")
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an event came from.
///
/// On the wire this is a peer id string; the empty string means the event
/// was generated locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    SelfGenerated,
    Peer(PeerId),
}

impl Origin {
    pub fn peer(id: impl Into<String>) -> Self {
        PeerId::new(id).map_or(Origin::SelfGenerated, Origin::Peer)
    }

    pub fn is_self(&self) -> bool {
        matches!(self, Origin::SelfGenerated)
    }

    /// Wire form of the origin.
    pub fn as_wire(&self) -> &str {
        match self {
            Origin::SelfGenerated => "",
            Origin::Peer(id) => id.as_str(),
        }
    }
}

/// Every event that can change consensus state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PeerMessage {
        message: ConsensusMessage,
        origin: Origin,
    },
    Timeout(TimeoutInfo),
    HeightComplete {
        height: Height,
        block_id: BlockId,
    },
    DebugSnapshot(RoundStateSnapshot),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::PeerMessage { .. } => "peer_message",
            Event::Timeout(_) => "timeout",
            Event::HeightComplete { .. } => "height_complete",
            Event::DebugSnapshot(_) => "debug_snapshot",
        }
    }

    /// True when the event was produced by this node rather than a peer.
    ///
    /// Timeouts are always local.
    pub fn is_self_generated(&self) -> bool {
        match self {
            Event::PeerMessage { origin, .. } => origin.is_self(),
            Event::Timeout(_) | Event::HeightComplete { .. } | Event::DebugSnapshot(_) => true,
        }
    }
}

/// An event with the wall-clock time it was accepted.
///
/// `timestamp_ms` is informational. Log position alone orders events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub timestamp_ms: u64,
    pub event: Event,
}

impl Envelope {
    pub fn new(timestamp_ms: u64, event: Event) -> Self {
        Self {
            timestamp_ms,
            event,
        }
    }
}

// =============================================================================
// OUTBOUND EFFECTS
// =============================================================================

/// A side effect the state machine asks for after processing an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundEffect {
    /// Send a message to every peer.
    Broadcast(ConsensusMessage),
    /// Acknowledge reception to the peer that sent the event.
    AckPeer { peer: String },
    /// Start a timer.
    ScheduleTimeout(TimeoutInfo),
}

impl OutboundEffect {
    /// True for effects visible outside this process.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            OutboundEffect::Broadcast(_) | OutboundEffect::AckPeer { .. }
        )
    }
}

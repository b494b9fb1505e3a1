//! Protobuf messages stored in entry bodies.
//!
//! Field numbers follow the consensus WAL schema (`TimedWALMessage`,
//! `WALMessage`, `MsgInfo`). Timestamps are milliseconds and durations are
//! unsigned, so every [`crate::domain::entities::Envelope`] maps onto them
//! without loss.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct TimedWalMessage {
    #[prost(uint64, tag = "1")]
    pub timestamp_ms: u64,
    #[prost(message, optional, tag = "2")]
    pub msg: Option<WalMessage>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WalMessage {
    #[prost(oneof = "wal_message::Sum", tags = "1, 2, 3, 4")]
    pub sum: Option<wal_message::Sum>,
}

pub mod wal_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Sum {
        #[prost(message, tag = "1")]
        EventDataRoundState(super::EventDataRoundState),
        #[prost(message, tag = "2")]
        MsgInfo(super::MsgInfo),
        #[prost(message, tag = "3")]
        TimeoutInfo(super::TimeoutInfo),
        #[prost(message, tag = "4")]
        EndHeight(super::EndHeight),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct EventDataRoundState {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(uint32, tag = "2")]
    pub round: u32,
    #[prost(uint32, tag = "3")]
    pub step: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgInfo {
    #[prost(message, optional, tag = "1")]
    pub msg: Option<ConsensusMessage>,
    /// Empty for messages this node produced.
    #[prost(string, tag = "2")]
    pub peer_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConsensusMessage {
    #[prost(oneof = "consensus_message::Sum", tags = "3, 5, 6")]
    pub sum: Option<consensus_message::Sum>,
}

pub mod consensus_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Sum {
        #[prost(message, tag = "3")]
        Proposal(super::Proposal),
        #[prost(message, tag = "5")]
        BlockPart(super::BlockPart),
        #[prost(message, tag = "6")]
        Vote(super::Vote),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Proposal {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(uint32, tag = "2")]
    pub round: u32,
    #[prost(uint32, optional, tag = "3")]
    pub pol_round: Option<u32>,
    #[prost(message, optional, tag = "4")]
    pub block_id: Option<BlockId>,
}

#[derive(Clone, PartialEq, Message)]
pub struct BlockPart {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(uint32, tag = "2")]
    pub round: u32,
    #[prost(uint32, tag = "3")]
    pub index: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub bytes: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Vote {
    #[prost(uint32, tag = "1")]
    pub vote_type: u32,
    #[prost(uint64, tag = "2")]
    pub height: u64,
    #[prost(uint32, tag = "3")]
    pub round: u32,
    /// Absent for a nil vote.
    #[prost(message, optional, tag = "4")]
    pub block_id: Option<BlockId>,
    #[prost(uint32, tag = "5")]
    pub validator_index: u32,
    #[prost(bytes = "vec", tag = "6")]
    pub validator_address: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TimeoutInfo {
    #[prost(message, optional, tag = "1")]
    pub duration: Option<Duration>,
    #[prost(uint64, tag = "2")]
    pub height: u64,
    #[prost(uint32, tag = "3")]
    pub round: u32,
    #[prost(uint32, tag = "4")]
    pub step: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Duration {
    #[prost(uint64, tag = "1")]
    pub seconds: u64,
    #[prost(uint32, tag = "2")]
    pub nanos: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct EndHeight {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(message, optional, tag = "2")]
    pub block_id: Option<BlockId>,
}

#[derive(Clone, PartialEq, Message)]
pub struct BlockId {
    #[prost(bytes = "vec", tag = "1")]
    pub hash: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub part_set_header: Option<PartSetHeader>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PartSetHeader {
    #[prost(uint32, tag = "1")]
    pub total: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub chain_id: String,
    #[prost(uint64, tag = "2")]
    pub height: u64,
    #[prost(uint64, tag = "3")]
    pub time_ms: u64,
    #[prost(message, optional, tag = "4")]
    pub last_block_id: Option<BlockId>,
    #[prost(bytes = "vec", tag = "5")]
    pub last_commit_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub data_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "7")]
    pub validators_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub app_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "9")]
    pub proposer_address: Vec<u8>,
}

/// Field 1 of any message, undecoded.
#[derive(Clone, PartialEq, Message)]
pub struct RawField1 {
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,
}

/// Field 2 of any message, undecoded.
#[derive(Clone, PartialEq, Message)]
pub struct RawField2 {
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

//! # Entry Codec
//!
//! Protobuf encoding of [`Envelope`]s and the frame wrapper around them.
//!
//! ## Field Layout
//!
//! ```text
//! TimedWalMessage 1: timestamp_ms   2: msg
//! WalMessage      1: round state    2: msg info     3: timeout     4: end height
//! MsgInfo         1: msg            2: peer_id (empty = self)
//! Message         3: proposal       5: block part   6: vote
//! ```
//!
//! An event or message tag this build does not know yields
//! [`DecodedEntry::Unknown`]; scans skip it. prost ignores unknown fields
//! inside a known message. Anything else that does not parse is a
//! [`DecodeError`].

pub mod frame;
pub mod proto;

use crate::domain::entities::{
    BlockId, BlockPart, ConsensusMessage, Envelope, Event, Header, Origin, PartSetHeader,
    Proposal, RoundStateSnapshot, RoundStep, TimeoutInfo, Vote, VoteType,
};
use crate::domain::errors::DecodeError;
use prost::encoding::{decode_key, skip_field, DecodeContext};
use prost::Message;
use proto::{consensus_message, wal_message};
use serde::Serialize;
use std::time::Duration;

pub use frame::{encode_frame, Frame, FrameHeader, FRAME_HEADER_LEN};

/// Oneof tags.
pub mod tags {
    pub const DEBUG_SNAPSHOT: u32 = 1;
    pub const MSG_INFO: u32 = 2;
    pub const TIMEOUT: u32 = 3;
    pub const HEIGHT_COMPLETE: u32 = 4;

    pub const PROPOSAL: u32 = 3;
    pub const BLOCK_PART: u32 = 5;
    pub const VOTE: u32 = 6;
}

/// Outcome of decoding one entry body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEntry {
    Known(Envelope),
    Unknown(UnknownEntry),
}

/// A well-formed entry written by a newer schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnknownEntry {
    pub timestamp_ms: u64,
    /// Event variant tag.
    pub event_tag: u32,
    /// Consensus message kind, when the unknown part is inside a message.
    pub message_tag: Option<u32>,
}

const NANOS_PER_SEC: u32 = 1_000_000_000;

// =============================================================================
// ENCODE
// =============================================================================

/// Encode an envelope into an entry body.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    proto::TimedWalMessage {
        timestamp_ms: envelope.timestamp_ms,
        msg: Some(proto::WalMessage {
            sum: Some(event_to_proto(&envelope.event)),
        }),
    }
    .encode_to_vec()
}

fn event_to_proto(event: &Event) -> wal_message::Sum {
    match event {
        Event::DebugSnapshot(snapshot) => {
            wal_message::Sum::EventDataRoundState(proto::EventDataRoundState {
                height: snapshot.height,
                round: snapshot.round,
                step: u32::from(snapshot.step.as_u8()),
            })
        }
        Event::PeerMessage { message, origin } => wal_message::Sum::MsgInfo(proto::MsgInfo {
            msg: Some(proto::ConsensusMessage {
                sum: Some(message_to_proto(message)),
            }),
            peer_id: origin.as_wire().to_string(),
        }),
        Event::Timeout(timeout) => wal_message::Sum::TimeoutInfo(proto::TimeoutInfo {
            duration: Some(proto::Duration {
                seconds: timeout.duration.as_secs(),
                nanos: timeout.duration.subsec_nanos(),
            }),
            height: timeout.height,
            round: timeout.round,
            step: u32::from(timeout.step.as_u8()),
        }),
        Event::HeightComplete { height, block_id } => {
            wal_message::Sum::EndHeight(proto::EndHeight {
                height: *height,
                block_id: Some(block_id_to_proto(block_id)),
            })
        }
    }
}

fn message_to_proto(message: &ConsensusMessage) -> consensus_message::Sum {
    match message {
        ConsensusMessage::Proposal(p) => consensus_message::Sum::Proposal(proto::Proposal {
            height: p.height,
            round: p.round,
            pol_round: p.pol_round,
            block_id: Some(block_id_to_proto(&p.block_id)),
        }),
        ConsensusMessage::BlockPart(p) => consensus_message::Sum::BlockPart(proto::BlockPart {
            height: p.height,
            round: p.round,
            index: p.index,
            bytes: p.bytes.clone(),
        }),
        ConsensusMessage::Vote(v) => consensus_message::Sum::Vote(proto::Vote {
            vote_type: u32::from(v.vote_type.as_u8()),
            height: v.height,
            round: v.round,
            block_id: v.block_id.as_ref().map(block_id_to_proto),
            validator_index: v.validator_index,
            validator_address: v.validator_address.clone(),
        }),
    }
}

fn block_id_to_proto(block_id: &BlockId) -> proto::BlockId {
    proto::BlockId {
        hash: block_id.hash.clone(),
        part_set_header: Some(proto::PartSetHeader {
            total: block_id.part_set_header.total,
            hash: block_id.part_set_header.hash.clone(),
        }),
    }
}

/// Canonical header bytes; the input of the header hash.
pub fn encode_header(header: &Header) -> Vec<u8> {
    proto::Header {
        chain_id: header.chain_id.clone(),
        height: header.height,
        time_ms: header.time_ms,
        last_block_id: header.last_block_id.as_ref().map(block_id_to_proto),
        last_commit_hash: header.last_commit_hash.clone(),
        data_hash: header.data_hash.clone(),
        validators_hash: header.validators_hash.clone(),
        app_hash: header.app_hash.clone(),
        proposer_address: header.proposer_address.clone(),
    }
    .encode_to_vec()
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode an entry body.
pub fn decode(body: &[u8]) -> Result<DecodedEntry, DecodeError> {
    let timed = proto::TimedWalMessage::decode(body)?;
    let timestamp_ms = timed.timestamp_ms;
    let msg = timed.msg.ok_or(DecodeError::MissingField {
        context: "envelope",
        field: "event",
    })?;

    let event = match msg.sum {
        Some(wal_message::Sum::EventDataRoundState(s)) => {
            Event::DebugSnapshot(RoundStateSnapshot {
                height: s.height,
                round: s.round,
                step: step_from_proto(s.step)?,
            })
        }
        Some(wal_message::Sum::MsgInfo(info)) => {
            let message = info.msg.ok_or(DecodeError::MissingField {
                context: "message info",
                field: "message",
            })?;
            match message.sum {
                Some(sum) => Event::PeerMessage {
                    message: message_from_proto(sum)?,
                    origin: Origin::peer(info.peer_id),
                },
                None => return unknown_message(body, timestamp_ms),
            }
        }
        Some(wal_message::Sum::TimeoutInfo(t)) => Event::Timeout(TimeoutInfo {
            duration: duration_from_proto(t.duration.unwrap_or_default())?,
            height: t.height,
            round: t.round,
            step: step_from_proto(t.step)?,
        }),
        Some(wal_message::Sum::EndHeight(end)) => Event::HeightComplete {
            height: end.height,
            block_id: required_block_id(end.block_id, "height complete")?,
        },
        None => return unknown_event(body, timestamp_ms),
    };
    Ok(DecodedEntry::Known(Envelope {
        timestamp_ms,
        event,
    }))
}

fn message_from_proto(sum: consensus_message::Sum) -> Result<ConsensusMessage, DecodeError> {
    Ok(match sum {
        consensus_message::Sum::Proposal(p) => ConsensusMessage::Proposal(Proposal {
            height: p.height,
            round: p.round,
            pol_round: p.pol_round,
            block_id: required_block_id(p.block_id, "proposal")?,
        }),
        consensus_message::Sum::BlockPart(p) => ConsensusMessage::BlockPart(BlockPart {
            height: p.height,
            round: p.round,
            index: p.index,
            bytes: p.bytes,
        }),
        consensus_message::Sum::Vote(v) => {
            let vote_type = u8::try_from(v.vote_type)
                .ok()
                .and_then(VoteType::from_u8)
                .ok_or(DecodeError::InvalidValue {
                    context: "vote type",
                    value: u64::from(v.vote_type),
                })?;
            ConsensusMessage::Vote(Vote {
                vote_type,
                height: v.height,
                round: v.round,
                block_id: v.block_id.map(block_id_from_proto),
                validator_index: v.validator_index,
                validator_address: v.validator_address,
            })
        }
    })
}

fn required_block_id(
    block_id: Option<proto::BlockId>,
    context: &'static str,
) -> Result<BlockId, DecodeError> {
    block_id
        .map(block_id_from_proto)
        .ok_or(DecodeError::MissingField {
            context,
            field: "block_id",
        })
}

fn block_id_from_proto(block_id: proto::BlockId) -> BlockId {
    let part_set_header = block_id
        .part_set_header
        .map(|psh| PartSetHeader {
            total: psh.total,
            hash: psh.hash,
        })
        .unwrap_or_default();
    BlockId {
        hash: block_id.hash,
        part_set_header,
    }
}

fn duration_from_proto(duration: proto::Duration) -> Result<Duration, DecodeError> {
    if duration.nanos >= NANOS_PER_SEC {
        return Err(DecodeError::InvalidValue {
            context: "timeout duration nanos",
            value: u64::from(duration.nanos),
        });
    }
    Ok(Duration::new(duration.seconds, duration.nanos))
}

fn step_from_proto(raw: u32) -> Result<RoundStep, DecodeError> {
    u8::try_from(raw)
        .ok()
        .and_then(RoundStep::from_u8)
        .ok_or(DecodeError::InvalidValue {
            context: "round step",
            value: u64::from(raw),
        })
}

// Entries from a newer schema decode with an empty oneof. The tag is read
// back from the raw body so scans can report what they skipped.

fn unknown_event(body: &[u8], timestamp_ms: u64) -> Result<DecodedEntry, DecodeError> {
    let raw_event = proto::RawField2::decode(body)?.value;
    let event_tag = last_field_tag(&raw_event)?.ok_or(DecodeError::MissingField {
        context: "event",
        field: "variant",
    })?;
    Ok(DecodedEntry::Unknown(UnknownEntry {
        timestamp_ms,
        event_tag,
        message_tag: None,
    }))
}

fn unknown_message(body: &[u8], timestamp_ms: u64) -> Result<DecodedEntry, DecodeError> {
    let raw_event = proto::RawField2::decode(body)?.value;
    let msg_info = proto::RawField2::decode(raw_event.as_slice())?.value;
    let message = proto::RawField1::decode(msg_info.as_slice())?.value;
    let message_tag = last_field_tag(&message)?.ok_or(DecodeError::MissingField {
        context: "message",
        field: "kind",
    })?;
    Ok(DecodedEntry::Unknown(UnknownEntry {
        timestamp_ms,
        event_tag: tags::MSG_INFO,
        message_tag: Some(message_tag),
    }))
}

/// Tag of the last field in `buf`, the one a oneof keeps.
fn last_field_tag(mut buf: &[u8]) -> Result<Option<u32>, DecodeError> {
    let mut last = None;
    while !buf.is_empty() {
        let (tag, wire_type) = decode_key(&mut buf)?;
        skip_field(wire_type, tag, &mut buf, DecodeContext::default())?;
        last = Some(tag);
    }
    Ok(last)
}

//! # Outbound Ports (Driven Ports)
//!
//! What the WAL needs from storage and from the host node.

use crate::adapters::storage::FrameStream;
use crate::domain::entities::{BlockMeta, Envelope, Height, OutboundEffect};
use crate::domain::errors::WalResult;

/// Ordered, append-only, durable byte log of framed entries.
///
/// Production: `FileAppendLog` (segmented files under one directory).
/// Testing: `MemoryAppendLog`.
///
/// ## Durability
///
/// Under `FlushPolicy::EveryWrite` an entry is on stable storage when
/// `append` returns. Under `FlushPolicy::GroupCommit { max_frames, max_delay_ms }`
/// entries are buffered and written as one group; a crash loses at most the
/// unflushed group, which is at most `max_frames - 1` entries or the entries
/// appended during the last `max_delay_ms`. Callers that need an entry durable
/// before acting on it call [`AppendLog::flush`].
pub trait AppendLog {
    /// Append one entry. Returns the global byte offset of its frame.
    fn append(&mut self, envelope: &Envelope) -> WalResult<u64>;

    /// Write and sync every pending entry.
    fn flush(&mut self) -> WalResult<()>;

    /// Flush if the group-commit window has elapsed. Returns whether it did.
    fn flush_if_due(&mut self) -> WalResult<bool>;

    /// True when appended entries are not yet on stable storage.
    fn has_unflushed(&self) -> bool;

    /// Scan durable frames starting at `offset`.
    ///
    /// The stream snapshots the segment list; it yields only flushed frames.
    /// An offset below [`AppendLog::start_offset`] starts at the first
    /// retained frame.
    fn stream_from(&self, offset: u64) -> WalResult<FrameStream<'_>>;

    /// Drop everything at and after `offset`, pending entries included.
    fn truncate_to(&mut self, offset: u64) -> WalResult<()>;

    /// Logical end of the log, pending entries included.
    fn size(&self) -> u64;

    /// Offset of the first retained byte.
    fn start_offset(&self) -> u64;

    /// Release storage holding only entries before `offset`.
    ///
    /// Never removes bytes at or after `offset`. Returns the number of
    /// storage units (segments) removed; logs without segments keep
    /// everything.
    fn compact_before(&mut self, _offset: u64) -> WalResult<usize> {
        Ok(0)
    }
}

impl<L: AppendLog + ?Sized> AppendLog for Box<L> {
    fn append(&mut self, envelope: &Envelope) -> WalResult<u64> {
        (**self).append(envelope)
    }

    fn flush(&mut self) -> WalResult<()> {
        (**self).flush()
    }

    fn flush_if_due(&mut self) -> WalResult<bool> {
        (**self).flush_if_due()
    }

    fn has_unflushed(&self) -> bool {
        (**self).has_unflushed()
    }

    fn stream_from(&self, offset: u64) -> WalResult<FrameStream<'_>> {
        (**self).stream_from(offset)
    }

    fn truncate_to(&mut self, offset: u64) -> WalResult<()> {
        (**self).truncate_to(offset)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn start_offset(&self) -> u64 {
        (**self).start_offset()
    }

    fn compact_before(&mut self, offset: u64) -> WalResult<usize> {
        (**self).compact_before(offset)
    }
}

/// The round-voting state machine the WAL feeds.
///
/// The WAL never interprets votes or proposals; it only orders events and
/// decides which of the returned effects may leave the process.
pub trait ConsensusStateMachine {
    /// Height of the last block this state machine has finalized.
    fn current_checkpoint_height(&self) -> Height;

    /// Process a live event. Returned effects are delivered by the caller.
    fn on_event(&mut self, envelope: &Envelope) -> WalResult<Vec<OutboundEffect>>;

    /// Process an event read back from the log during recovery.
    ///
    /// Returned effects are never delivered to the network.
    fn on_replayed_event(&mut self, envelope: &Envelope) -> WalResult<Vec<OutboundEffect>> {
        self.on_event(envelope)
    }
}

/// Read access to finalized blocks.
pub trait CommittedBlockStore {
    fn has_committed_block(&self, height: Height) -> WalResult<bool>;

    fn committed_block_meta(&self, height: Height) -> WalResult<Option<BlockMeta>>;
}

/// Where outbound effects go once they are allowed out.
pub trait EffectSink {
    fn deliver(&mut self, effect: OutboundEffect) -> WalResult<()>;
}

/// Abstract interface for time operations (for testability).
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

//! In-memory append log for tests.

use super::stream::{FrameStream, SegmentSource, SegmentSpan};
use super::PendingGroup;
use crate::adapters::infra::SystemTimeSource;
use crate::domain::codec::{self, encode_frame};
use crate::domain::config::{FlushPolicy, DEFAULT_MAX_RECORD_BYTES};
use crate::domain::entities::Envelope;
use crate::domain::errors::{WalError, WalResult};
use crate::ports::outbound::{AppendLog, TimeSource};

/// A single in-memory segment with the same durability semantics as the
/// file log: only flushed bytes survive [`MemoryAppendLog::crash`].
#[derive(Debug)]
pub struct MemoryAppendLog<T: TimeSource = SystemTimeSource> {
    durable: Vec<u8>,
    pending: PendingGroup,
    policy: FlushPolicy,
    max_record_bytes: usize,
    clock: T,
    flushes: u64,
}

impl MemoryAppendLog<SystemTimeSource> {
    pub fn new(policy: FlushPolicy) -> Self {
        Self::with_clock(policy, SystemTimeSource)
    }

    /// Reopen from bytes that survived a crash. Torn tails are left in place.
    pub fn from_durable(bytes: Vec<u8>, policy: FlushPolicy) -> Self {
        let mut log = Self::new(policy);
        log.durable = bytes;
        log
    }
}

impl<T: TimeSource> MemoryAppendLog<T> {
    pub fn with_clock(policy: FlushPolicy, clock: T) -> Self {
        Self {
            durable: Vec::new(),
            pending: PendingGroup::default(),
            policy,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            clock,
            flushes: 0,
        }
    }

    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }

    /// Bytes that would survive a crash right now.
    pub fn durable_bytes(&self) -> &[u8] {
        &self.durable
    }

    /// Number of group writes so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Lose the pending group and return what is on "disk".
    pub fn crash(self) -> Vec<u8> {
        self.durable
    }
}

impl<T: TimeSource> AppendLog for MemoryAppendLog<T> {
    fn append(&mut self, envelope: &Envelope) -> WalResult<u64> {
        let frame = encode_frame(&codec::encode(envelope), self.max_record_bytes)?;
        let offset = self.size();
        let now = self.clock.now_ms();
        self.pending.push(&frame, now);
        if self.pending.should_flush(self.policy, now) {
            self.flush()?;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> WalResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.durable.extend_from_slice(self.pending.bytes());
        self.pending.clear();
        self.flushes += 1;
        Ok(())
    }

    fn flush_if_due(&mut self) -> WalResult<bool> {
        if self.pending.should_flush(self.policy, self.clock.now_ms()) {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn has_unflushed(&self) -> bool {
        !self.pending.is_empty()
    }

    fn stream_from(&self, offset: u64) -> WalResult<FrameStream<'_>> {
        let span = SegmentSpan {
            start: 0,
            len: self.durable.len() as u64,
            source: SegmentSource::Memory(&self.durable),
        };
        FrameStream::new(vec![span], offset, self.max_record_bytes)
    }

    fn truncate_to(&mut self, offset: u64) -> WalResult<()> {
        let end = self.size();
        if offset > end {
            return Err(WalError::InvalidOffset {
                offset,
                start: 0,
                end,
            });
        }
        self.flush()?;
        self.durable.truncate(offset as usize);
        Ok(())
    }

    fn size(&self) -> u64 {
        (self.durable.len() + self.pending.len()) as u64
    }

    fn start_offset(&self) -> u64 {
        0
    }
}

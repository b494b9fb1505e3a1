//! # Live Logger
//!
//! Write path used once replay has finished.
//!
//! Every event is recorded before the state machine sees it, and every
//! outbound effect waits until the log holds everything recorded so far.
//! Height-complete markers and this node's own messages are synced before
//! [`LiveLogger::record`] returns; peer messages, timeouts and snapshots
//! ride the configured flush policy.

use crate::adapters::infra::SystemTimeSource;
use crate::domain::entities::{Envelope, Event, Height, OutboundEffect};
use crate::domain::errors::{WalError, WalResult};
use crate::ports::outbound::{AppendLog, ConsensusStateMachine, EffectSink, TimeSource};
use crate::service::replay::ReplayOutcome;
use tracing::{debug, info, warn};

/// Appends events during normal operation.
///
/// Only constructible from a [`ReplayOutcome`], so nothing is appended to
/// a log that has not been replayed.
pub struct LiveLogger<L: AppendLog, T: TimeSource = SystemTimeSource> {
    log: L,
    clock: T,
    /// Most recent height-complete marker: (height, offset).
    last_checkpoint: Option<(Height, u64)>,
}

impl<L: AppendLog> LiveLogger<L, SystemTimeSource> {
    pub fn resume(log: L, outcome: &ReplayOutcome) -> WalResult<Self> {
        Self::resume_with_clock(log, outcome, SystemTimeSource)
    }
}

impl<L: AppendLog, T: TimeSource> LiveLogger<L, T> {
    /// Take over `log` after `outcome` was produced from it.
    ///
    /// Bytes after `outcome.end_offset` (a torn tail the log did not repair
    /// itself) are cut first so new frames follow the last valid one.
    pub fn resume_with_clock(mut log: L, outcome: &ReplayOutcome, clock: T) -> WalResult<Self> {
        let size = log.size();
        if size < outcome.end_offset {
            return Err(WalError::InvalidOffset {
                offset: outcome.end_offset,
                start: log.start_offset(),
                end: size,
            });
        }
        if size > outcome.end_offset {
            warn!(
                "[qc-18] Cutting {} bytes after last valid frame at {}",
                size - outcome.end_offset,
                outcome.end_offset
            );
            log.truncate_to(outcome.end_offset)?;
        }

        let last_checkpoint = outcome
            .checkpoint
            .as_ref()
            .map(|c| (c.height, c.offset));
        info!(
            "[qc-18] Live logging resumed at offset {} (checkpoint {:?})",
            outcome.end_offset,
            last_checkpoint.map(|(h, _)| h)
        );
        Ok(Self {
            log,
            clock,
            last_checkpoint,
        })
    }

    /// Stamp and append `event`. Returns its offset.
    pub fn record(&mut self, event: Event) -> WalResult<u64> {
        let envelope = Envelope::new(self.clock.now_ms(), event);
        self.record_envelope(&envelope)
    }

    fn record_envelope(&mut self, envelope: &Envelope) -> WalResult<u64> {
        let offset = self.log.append(envelope)?;
        if requires_sync(&envelope.event) {
            self.log.flush()?;
        }
        if let Event::HeightComplete { height, .. } = &envelope.event {
            self.last_checkpoint = Some((*height, offset));
            debug!("[qc-18] Height {} complete at offset {}", height, offset);
        }
        Ok(offset)
    }

    /// Hand `effect` to `sink` once everything recorded so far is durable.
    pub fn emit<S>(&mut self, effect: OutboundEffect, sink: &mut S) -> WalResult<()>
    where
        S: EffectSink + ?Sized,
    {
        if self.log.has_unflushed() {
            self.log.flush()?;
        }
        sink.deliver(effect)
    }

    /// Record `event`, feed it to `machine`, then emit every effect it returns.
    pub fn dispatch<M, S>(&mut self, event: Event, machine: &mut M, sink: &mut S) -> WalResult<u64>
    where
        M: ConsensusStateMachine + ?Sized,
        S: EffectSink + ?Sized,
    {
        let envelope = Envelope::new(self.clock.now_ms(), event);
        let offset = self.record_envelope(&envelope)?;
        for effect in machine.on_event(&envelope)? {
            self.emit(effect, sink)?;
        }
        Ok(offset)
    }

    /// Flush the pending group if its window has elapsed.
    pub fn tick(&mut self) -> WalResult<bool> {
        self.log.flush_if_due()
    }

    pub fn flush(&mut self) -> WalResult<()> {
        self.log.flush()
    }

    /// Drop storage before the most recent height-complete marker.
    pub fn compact_to_checkpoint(&mut self) -> WalResult<usize> {
        match self.last_checkpoint {
            Some((_, offset)) => self.log.compact_before(offset),
            None => Ok(0),
        }
    }

    /// (height, offset) of the most recent height-complete marker.
    pub fn last_checkpoint(&self) -> Option<(Height, u64)> {
        self.last_checkpoint
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn into_log(self) -> L {
        self.log
    }
}

/// Entries that must be on disk before anything else happens.
fn requires_sync(event: &Event) -> bool {
    match event {
        Event::HeightComplete { .. } => true,
        Event::PeerMessage { origin, .. } => origin.is_self(),
        Event::Timeout(_) | Event::DebugSnapshot(_) => false,
    }
}

#[cfg(test)]
mod tests;

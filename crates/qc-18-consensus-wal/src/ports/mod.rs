//! # Ports Layer
//!
//! Traits at the edges of the WAL. All of them are driven ports: the log
//! storage, the state machine being recovered, the committed block store,
//! the effect sink and the clock.

pub mod outbound;

pub use outbound::{AppendLog, CommittedBlockStore, ConsensusStateMachine, EffectSink, TimeSource};

//! # Consensus Write-Ahead Log (qc-18)
//!
//! Durable, ordered record of every input the consensus state machine
//! processes, and the replay that rebuilds round state after a crash.
//!
//! ## Architecture
//!
//! ```text
//! peer msgs / timeouts / own msgs
//!            │
//!            ▼
//!     LiveLogger ──append──→ AppendLog (segmented files)
//!            │                      │
//!            ▼                      │ restart
//!  ConsensusStateMachine            ▼
//!            │               ReplayEngine ──→ ReplayOutcome
//!            ▼
//!  effects (after flush) ──→ EffectSink
//! ```
//!
//! ## Guarantees
//!
//! | Rule | Description |
//! |------|-------------|
//! | Write-ahead | An event is appended before the state machine sees it |
//! | Effects after flush | No effect leaves until every prior entry is durable |
//! | Sync classes | Height-complete markers and own messages are synced immediately |
//! | Torn tails | A partial final frame is cut, never reported as corruption |
//! | Corruption | A bad frame anywhere else stops recovery with its offset |
//! | Replay isolation | Broadcasts and acks requested during replay are dropped |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - event model, codec, block identity, config, errors, metrics
//! - `ports/` - `AppendLog`, `ConsensusStateMachine`, `CommittedBlockStore`, `EffectSink`
//! - `adapters/` - file and memory logs, directory lock, clocks
//! - `service/` - replay, live logging, async worker
//!
//! ## Usage
//!
//! ```ignore
//! use qc_18_consensus_wal::{FileAppendLog, FlushPolicy, LiveLogger, ReplayEngine, ReplayStart, WalConfig};
//!
//! let config = WalConfig::new("/var/lib/node/cs.wal", 64 << 20, FlushPolicy::EveryWrite);
//! let log = FileAppendLog::open(config)?;
//! let outcome = ReplayEngine::new(ReplayStart::default()).run(&log, &blocks, &mut machine)?;
//! for timer in &outcome.timers_to_restart {
//!     timers.schedule(timer.clone());
//! }
//! let mut logger = LiveLogger::resume(log, &outcome)?;
//! logger.dispatch(event, &mut machine, &mut network)?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export key types for convenience
pub use adapters::infra::{ManualTimeSource, SystemTimeSource};
pub use adapters::lock::WalDirLock;
pub use adapters::storage::{scan_dir, FileAppendLog, FrameStream, MemoryAppendLog, TornTail};
pub use domain::codec::{decode, encode, DecodedEntry, Frame, UnknownEntry};
pub use domain::config::{FlushPolicy, WalConfig};
pub use domain::entities::{
    BlockId, BlockMeta, ConsensusMessage, Envelope, Event, Header, Height, Origin,
    OutboundEffect, PartSetHeader, PeerId, Round, RoundStep, TimeoutInfo,
};
pub use domain::errors::{CorruptionKind, DecodeError, LockError, TornReason, WalError, WalResult};
pub use domain::metrics::{WalMetrics, WalMetricsSnapshot};
pub use ports::outbound::{
    AppendLog, CommittedBlockStore, ConsensusStateMachine, EffectSink, TimeSource,
};
pub use service::{Checkpoint, LiveLogger, ReplayEngine, ReplayOutcome, ReplayStart};

#[cfg(feature = "worker")]
pub use service::{spawn_wal_worker, WalWorkerHandle, WorkerConfig};

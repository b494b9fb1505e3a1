//! # WAL Services
//!
//! - `replay` - recovery from the last validated height-complete marker
//! - `live` - logging during normal operation
//! - `worker` - async single-writer task (feature `worker`)

pub mod live;
pub mod replay;
#[cfg(feature = "worker")]
pub mod worker;

pub use live::LiveLogger;
pub use replay::{
    find_height_complete, Checkpoint, ReplayCounts, ReplayEngine, ReplayOutcome, ReplayPhase,
    ReplayStart,
};
#[cfg(feature = "worker")]
pub use worker::{spawn_wal_worker, WalWorkerHandle, WorkerConfig, WorkerParts};

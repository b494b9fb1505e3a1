//! # Adapters Layer
//!
//! - `storage` - append log implementations and the frame scanner
//! - `lock` - single-writer directory lock
//! - `infra` - clocks

pub mod infra;
pub mod lock;
pub mod storage;

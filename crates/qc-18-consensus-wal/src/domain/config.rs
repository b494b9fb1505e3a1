//! # WAL Configuration
//!
//! Operator-facing knobs. The directory, segment size and flush policy have
//! no defaults: a durability trade-off is never picked silently.

use crate::domain::codec::FRAME_HEADER_LEN;
use crate::domain::errors::{WalError, WalResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest entry body accepted unless configured otherwise (1 MiB).
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

/// Retries for transient I/O errors on write or sync.
pub const DEFAULT_IO_RETRY_LIMIT: u32 = 3;

/// When appended entries reach stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Write and sync on every append.
    EveryWrite,
    /// Buffer appends and sync them together once `max_frames` are pending
    /// or the oldest pending entry is `max_delay_ms` old.
    GroupCommit { max_frames: usize, max_delay_ms: u64 },
}

/// Configuration for a file-backed WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalConfig {
    /// Directory holding the segment files and the lock file.
    pub dir: PathBuf,

    /// Rotate once the active segment would grow past this many bytes.
    pub segment_max_bytes: u64,

    pub flush_policy: FlushPolicy,

    /// Largest entry body. Larger appends fail with `RecordTooLarge`; larger
    /// lengths found on disk are corruption.
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,

    #[serde(default = "default_io_retry_limit")]
    pub io_retry_limit: u32,
}

fn default_max_record_bytes() -> usize {
    DEFAULT_MAX_RECORD_BYTES
}

fn default_io_retry_limit() -> u32 {
    DEFAULT_IO_RETRY_LIMIT
}

impl WalConfig {
    pub fn new(dir: impl Into<PathBuf>, segment_max_bytes: u64, flush_policy: FlushPolicy) -> Self {
        Self {
            dir: dir.into(),
            segment_max_bytes,
            flush_policy,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            io_retry_limit: DEFAULT_IO_RETRY_LIMIT,
        }
    }

    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }

    pub fn with_io_retry_limit(mut self, limit: u32) -> Self {
        self.io_retry_limit = limit;
        self
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Reject settings the log cannot honour.
    pub fn validate(&self) -> WalResult<()> {
        if self.segment_max_bytes <= FRAME_HEADER_LEN as u64 {
            return Err(config_error(format!(
                "segment_max_bytes must exceed the {}-byte frame header, got {}",
                FRAME_HEADER_LEN, self.segment_max_bytes
            )));
        }
        if self.max_record_bytes == 0 || u32::try_from(self.max_record_bytes).is_err() {
            return Err(config_error(format!(
                "max_record_bytes must be in 1..=u32::MAX, got {}",
                self.max_record_bytes
            )));
        }
        if let FlushPolicy::GroupCommit { max_frames, .. } = self.flush_policy {
            if max_frames == 0 {
                return Err(config_error("group commit max_frames must be at least 1"));
            }
        }
        Ok(())
    }
}

fn config_error(reason: impl Into<String>) -> WalError {
    WalError::Config {
        reason: reason.into(),
    }
}

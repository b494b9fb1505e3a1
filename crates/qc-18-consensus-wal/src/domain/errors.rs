//! # Domain Errors
//!
//! Error types for the consensus WAL.
//!
//! ## Classes
//!
//! | Class | Type | Handling |
//! |-------|------|----------|
//! | Torn trailing write | [`TornReason`] (not an error) | scan stops at last good frame |
//! | Data corruption | [`WalError::Corruption`], [`WalError::Decode`] | fatal |
//! | Unknown variant | `DecodedEntry::Unknown` (not an error) | skipped |
//! | Integrity mismatch | [`WalError::BlockValidation`], [`WalError::CheckpointMismatch`] | fatal, never retried |
//! | I/O failure | [`WalError::Io`] | propagated, retried only if [`WalError::is_retryable`] |
//! | Failed flush | [`WalError::Poisoned`] | every later write refused until reopen |

use crate::domain::entities::Height;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors surfaced by the append log, the replay engine and the live logger.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying storage failed.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    /// Encoded envelope exceeds the configured record limit.
    #[error("record exceeds max bytes {max_bytes} (got {got_bytes})")]
    RecordTooLarge { max_bytes: usize, got_bytes: usize },

    /// Integrity failure in the middle of the log. Requires manual intervention.
    #[error("log corruption at offset {offset}: {kind}")]
    Corruption { offset: u64, kind: CorruptionKind },

    /// A frame passed its checksum but its body is not a valid envelope.
    #[error("malformed entry at offset {offset}: {source}")]
    Decode {
        offset: u64,
        #[source]
        source: DecodeError,
    },

    /// A committed block's meta failed identity validation.
    #[error("block meta at height {height} failed validation: {source}")]
    BlockValidation {
        height: Height,
        #[source]
        source: BlockValidationError,
    },

    /// A height-complete marker disagrees with the locally committed block.
    #[error("checkpoint at height {height} names block {logged}, block store has {committed}")]
    CheckpointMismatch {
        height: Height,
        logged: String,
        committed: String,
    },

    /// The state machine claims a height the block store does not have.
    #[error("no committed block at checkpointed height {height}")]
    MissingCommittedBlock { height: Height },

    /// Block store query failed.
    #[error("block store error: {reason}")]
    BlockStore { reason: String },

    /// The consensus state machine rejected an event.
    #[error("state machine error: {reason}")]
    StateMachine { reason: String },

    /// Another process holds the WAL directory.
    #[error(transparent)]
    Locked(#[from] LockError),

    /// Offset outside the retained log.
    #[error("offset {offset} outside retained log [{start}, {end}]")]
    InvalidOffset { offset: u64, start: u64, end: u64 },

    /// Rejected configuration.
    #[error("invalid WAL configuration: {reason}")]
    Config { reason: String },

    /// A flush failed after bytes may have reached the file. The log
    /// refuses further writes; reopen it to recover.
    #[error("WAL at {dir:?} is poisoned by an earlier write failure")]
    Poisoned { dir: PathBuf },

    /// The background writer task is gone.
    #[error("WAL worker stopped")]
    WorkerStopped,
}

impl WalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WalError::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// True only for transient I/O conditions the storage signals as retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WalError::Io { source, .. } => is_retryable_kind(source.kind()),
            _ => false,
        }
    }

    /// True for the error classes that must stop the node.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

pub(crate) fn is_retryable_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// What exactly was wrong with a corrupt region of the log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptionKind {
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("invalid frame length {length} (max {max})")]
    InvalidLength { length: u32, max: usize },

    #[error("sealed segment starting at {segment_start} ends inside a frame")]
    TruncatedSealedSegment { segment_start: u64 },

    #[error("segment gap: expected segment at {expected}, found {found}")]
    SegmentGap { expected: u64, found: u64 },
}

/// Why a scan stopped early at the end of the log.
///
/// Expected after a crash mid-append; never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TornReason {
    IncompleteHeader,
    IncompleteBody,
    ChecksumMismatch,
    ZeroFilled,
}

/// Malformed envelope bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The body is not a valid protobuf message.
    #[error("malformed entry: {0}")]
    Malformed(#[from] prost::DecodeError),

    #[error("invalid value {value} for {context}")]
    InvalidValue { context: &'static str, value: u64 },

    #[error("{context} is missing required field {field}")]
    MissingField {
        context: &'static str,
        field: &'static str,
    },
}

/// Block identity validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockValidationError {
    #[error("{context}: expected {expected} byte hash, got {len}")]
    InvalidHashLength {
        context: &'static str,
        expected: usize,
        len: usize,
    },

    #[error("part set header total {total} inconsistent with {hash_len} byte hash")]
    InconsistentPartSet { total: u32, hash_len: usize },

    #[error("expected BlockID#Hash and Header#Hash to be the same, got {expected} != {actual}")]
    HashMismatch { expected: String, actual: String },
}

/// Errors from WAL directory locking.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create lock file: {0}")]
    CreateFailed(#[source] io::Error),

    #[error("WAL directory already in use by process {pid:?} ({})", .path.display())]
    AlreadyLocked { pid: Option<u32>, path: PathBuf },

    #[error("failed to write PID to lock file: {0}")]
    WriteFailed(#[source] io::Error),
}

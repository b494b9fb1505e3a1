//! # WAL Directory Locking
//!
//! One writer per WAL directory, across processes.
//!
//! - `flock`: exclusive advisory lock on `<dir>/LOCK` using fs2

mod flock;

pub use flock::WalDirLock;

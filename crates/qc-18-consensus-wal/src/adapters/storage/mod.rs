//! # Append Log Storage Adapters
//!
//! - `FileAppendLog`: segmented files, production
//! - `MemoryAppendLog`: a single in-memory segment, for tests
//! - `FrameStream`: the scanner both of them hand out

mod file;
mod memory;
mod stream;

pub use file::{scan_dir, segment_spans, FileAppendLog};
pub use memory::MemoryAppendLog;
pub use stream::{check_contiguous, FrameStream, SegmentSource, SegmentSpan, TornTail};

use crate::domain::config::FlushPolicy;

/// Frames accepted by `append` but not yet written.
#[derive(Debug, Default)]
pub(crate) struct PendingGroup {
    bytes: Vec<u8>,
    frames: usize,
    oldest_ms: Option<u64>,
}

impl PendingGroup {
    pub(crate) fn push(&mut self, frame: &[u8], now_ms: u64) {
        self.bytes.extend_from_slice(frame);
        self.frames += 1;
        self.oldest_ms.get_or_insert(now_ms);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
        self.frames = 0;
        self.oldest_ms = None;
    }

    /// Whether the policy requires this group on disk now.
    pub(crate) fn should_flush(&self, policy: FlushPolicy, now_ms: u64) -> bool {
        if self.is_empty() {
            return false;
        }
        match policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::GroupCommit {
                max_frames,
                max_delay_ms,
            } => {
                let age = self
                    .oldest_ms
                    .map(|oldest| now_ms.saturating_sub(oldest))
                    .unwrap_or(0);
                self.frames >= max_frames || age >= max_delay_ms
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_flushes_on_count_or_age() {
        let policy = FlushPolicy::GroupCommit {
            max_frames: 3,
            max_delay_ms: 100,
        };
        let mut group = PendingGroup::default();
        assert!(!group.should_flush(policy, 0));

        group.push(b"a", 1_000);
        group.push(b"b", 1_010);
        assert!(!group.should_flush(policy, 1_050));
        assert!(group.should_flush(policy, 1_100));

        group.push(b"c", 1_020);
        assert!(group.should_flush(policy, 1_020));
        assert_eq!(group.len(), 3);

        group.clear();
        assert!(group.is_empty());
        assert!(!group.should_flush(policy, 5_000));
    }
}

//! # Segmented File Log
//!
//! ```text
//! <dir>/
//!   LOCK
//!   00000000000000000000.wal   sealed
//!   00000000000000065536.wal   sealed
//!   00000000000000131072.wal   active (appends go here)
//! ```
//!
//! Each file is named after the global offset of its first byte. A segment
//! is sealed when the next frame would push it past `segment_max_bytes`;
//! the new file is created and the directory synced before any frame is
//! written to it.

use super::stream::{check_contiguous, FrameStream, SegmentSource, SegmentSpan, TornTail};
use super::PendingGroup;
use crate::adapters::infra::SystemTimeSource;
use crate::adapters::lock::WalDirLock;
use crate::domain::codec::{self, encode_frame};
use crate::domain::config::WalConfig;
use crate::domain::entities::Envelope;
use crate::domain::errors::{is_retryable_kind, WalError, WalResult};
use crate::domain::metrics::WalMetrics;
use crate::ports::outbound::{AppendLog, TimeSource};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const SEGMENT_EXT: &str = "wal";

#[derive(Debug, Clone)]
struct Segment {
    start: u64,
    /// Durable bytes.
    len: u64,
    path: PathBuf,
}

impl Segment {
    fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Durable append log backed by segment files in one directory.
///
/// Holds the directory lock for its whole lifetime. Dropping the log
/// flushes pending entries best-effort; [`FileAppendLog::abandon`] drops
/// them instead.
///
/// A failed flush cuts the active segment back to its durable length and
/// poisons the log: every later write returns [`WalError::Poisoned`] and
/// drop writes nothing.
pub struct FileAppendLog<T: TimeSource = SystemTimeSource> {
    config: WalConfig,
    /// Creation order; the last one is active.
    segments: Vec<Segment>,
    active: File,
    pending: PendingGroup,
    clock: T,
    metrics: Arc<WalMetrics>,
    repaired_tail: Option<TornTail>,
    poisoned: bool,
    _lock: WalDirLock,
}

impl FileAppendLog<SystemTimeSource> {
    pub fn open(config: WalConfig) -> WalResult<Self> {
        Self::open_with_clock(config, SystemTimeSource)
    }
}

impl<T: TimeSource> FileAppendLog<T> {
    /// Open (or create) the log in `config.dir`.
    ///
    /// Takes the directory lock, checks that segments are contiguous and
    /// cuts a torn tail off the active segment.
    pub fn open_with_clock(config: WalConfig, clock: T) -> WalResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir).map_err(|e| WalError::io(&config.dir, e))?;
        let lock = WalDirLock::acquire(&config.dir)?;

        let mut segments = list_segments(&config.dir)?;
        if segments.is_empty() {
            segments.push(create_segment(&config.dir, 0)?);
        }
        let spans: Vec<_> = segments.iter().map(span_of).collect();
        check_contiguous(&spans)?;

        let metrics = Arc::new(WalMetrics::new());
        let repaired_tail = repair_active(&mut segments, config.max_record_bytes)?;
        if repaired_tail.is_some() {
            metrics.record_torn_tail();
        }

        let active = open_for_append(segments.last().map(|s| s.path.as_path()))?;

        let log = Self {
            config,
            segments,
            active,
            pending: PendingGroup::default(),
            clock,
            metrics,
            repaired_tail,
            poisoned: false,
            _lock: lock,
        };
        info!(
            "[qc-18] Opened WAL at {} ({} segments, {}..{})",
            log.config.dir.display(),
            log.segments.len(),
            log.start_offset(),
            log.durable_end()
        );
        Ok(log)
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<WalMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Torn tail cut when the log was opened, if any.
    pub fn repaired_tail(&self) -> Option<TornTail> {
        self.repaired_tail
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Drop the log without writing pending entries, as a crash would.
    pub fn abandon(mut self) {
        let lost = self.pending.len();
        self.pending.clear();
        debug!("[qc-18] WAL abandoned with {} unflushed bytes", lost);
    }

    fn durable_end(&self) -> u64 {
        self.segments.last().map(Segment::end).unwrap_or(0)
    }

    fn active_path(&self) -> PathBuf {
        self.segments
            .last()
            .map(|s| s.path.clone())
            .unwrap_or_else(|| self.config.dir.clone())
    }

    fn ensure_writable(&self) -> WalResult<()> {
        if self.poisoned {
            return Err(WalError::Poisoned {
                dir: self.config.dir.clone(),
            });
        }
        Ok(())
    }

    /// Write and sync the pending group. Retries transient write errors
    /// after cutting the partial write.
    fn write_pending(&mut self, path: &Path, durable_len: u64) -> WalResult<()> {
        let limit = self.config.io_retry_limit;
        let mut attempt = 0;
        loop {
            match self.active.write_all(self.pending.bytes()) {
                Ok(()) => break,
                Err(e) if is_retryable_kind(e.kind()) && attempt < limit => {
                    self.active
                        .set_len(durable_len)
                        .map_err(|cut| WalError::io(path, cut))?;
                    attempt += 1;
                    self.metrics.record_io_retry();
                }
                Err(e) => return Err(WalError::io(path, e)),
            }
        }
        retry_io(limit, &self.metrics, path, || self.active.sync_data())
    }

    fn should_rotate(&self, next_len: u64) -> bool {
        let active_len = self.segments.last().map(|s| s.len).unwrap_or(0);
        let projected = active_len + self.pending.len() as u64;
        projected > 0 && projected + next_len > self.config.segment_max_bytes
    }

    fn rotate(&mut self) -> WalResult<()> {
        self.flush()?;
        let path = self.active_path();
        retry_io(self.config.io_retry_limit, &self.metrics, &path, || {
            self.active.sync_all()
        })?;

        let start = self.durable_end();
        let segment = create_segment(&self.config.dir, start)?;
        self.active = open_for_append(Some(&segment.path))?;
        self.segments.push(segment);
        self.metrics.record_rotation();
        info!(
            "[qc-18] Rotated WAL segment at offset {} ({} segments)",
            start,
            self.segments.len()
        );
        Ok(())
    }
}

impl<T: TimeSource> AppendLog for FileAppendLog<T> {
    fn append(&mut self, envelope: &Envelope) -> WalResult<u64> {
        self.ensure_writable()?;
        let body = codec::encode(envelope);
        let frame = encode_frame(&body, self.config.max_record_bytes)?;

        if self.should_rotate(frame.len() as u64) {
            self.rotate()?;
        }

        let offset = self.size();
        let now = self.clock.now_ms();
        self.pending.push(&frame, now);
        self.metrics.record_append(frame.len() as u64);
        debug!(
            "[qc-18] Appended {} at offset {} ({} bytes)",
            envelope.event.kind(),
            offset,
            frame.len()
        );

        if self.pending.should_flush(self.config.flush_policy, now) {
            self.flush()?;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> WalResult<()> {
        self.ensure_writable()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let path = self.active_path();
        let durable_len = self.segments.last().map(|s| s.len).unwrap_or(0);

        if let Err(e) = self.write_pending(&path, durable_len) {
            self.poisoned = true;
            error!(
                "[qc-18] WAL flush of {} bytes failed, refusing further writes: {}",
                self.pending.len(),
                e
            );
            // Bytes of the group may be in the file; none may survive.
            self.active
                .set_len(durable_len)
                .map_err(|cut| WalError::io(&path, cut))?;
            return Err(e);
        }

        let written = self.pending.len() as u64;
        if let Some(active) = self.segments.last_mut() {
            active.len += written;
        }
        self.pending.clear();
        self.metrics.record_flush();
        Ok(())
    }

    fn flush_if_due(&mut self) -> WalResult<bool> {
        if self
            .pending
            .should_flush(self.config.flush_policy, self.clock.now_ms())
        {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn has_unflushed(&self) -> bool {
        !self.pending.is_empty()
    }

    fn stream_from(&self, offset: u64) -> WalResult<FrameStream<'_>> {
        let spans = self.segments.iter().map(span_of).collect();
        FrameStream::new(spans, offset, self.config.max_record_bytes)
    }

    fn truncate_to(&mut self, offset: u64) -> WalResult<()> {
        let (start, end) = (self.start_offset(), self.size());
        self.ensure_writable()?;
        if offset < start || offset > end {
            return Err(WalError::InvalidOffset { offset, start, end });
        }
        self.flush()?;

        let keep = self
            .segments
            .iter()
            .rposition(|s| s.start <= offset)
            .unwrap_or(0);
        let removed: Vec<_> = self.segments.drain(keep + 1..).collect();
        for segment in &removed {
            fs::remove_file(&segment.path).map_err(|e| WalError::io(&segment.path, e))?;
        }

        let Some(active) = self.segments.last_mut() else {
            return Ok(());
        };
        let new_len = offset - active.start;
        let file = OpenOptions::new()
            .write(true)
            .open(&active.path)
            .map_err(|e| WalError::io(&active.path, e))?;
        file.set_len(new_len)
            .and_then(|()| file.sync_all())
            .map_err(|e| WalError::io(&active.path, e))?;
        active.len = new_len;
        let active_path = active.path.clone();

        self.active = open_for_append(Some(&active_path))?;
        if !removed.is_empty() {
            fsync_dir(&self.config.dir)?;
        }
        info!("[qc-18] Truncated WAL to offset {}", offset);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.durable_end() + self.pending.len() as u64
    }

    fn start_offset(&self) -> u64 {
        self.segments.first().map(|s| s.start).unwrap_or(0)
    }

    /// Delete sealed segments that end at or before `offset`.
    ///
    /// The active segment and any segment containing `offset` are kept.
    /// Returns the number of segments removed.
    fn compact_before(&mut self, offset: u64) -> WalResult<usize> {
        self.ensure_writable()?;
        let sealed = self.segments.len().saturating_sub(1);
        let removable = self.segments[..sealed]
            .iter()
            .take_while(|s| s.end() <= offset)
            .count();
        if removable == 0 {
            return Ok(0);
        }
        for segment in self.segments.drain(..removable) {
            fs::remove_file(&segment.path).map_err(|e| WalError::io(&segment.path, e))?;
        }
        fsync_dir(&self.config.dir)?;
        info!(
            "[qc-18] Compacted {} segments, log now starts at {}",
            removable,
            self.start_offset()
        );
        Ok(removable)
    }
}

impl<T: TimeSource> Drop for FileAppendLog<T> {
    fn drop(&mut self) {
        if self.poisoned {
            warn!(
                "[qc-18] Closing poisoned WAL, {} unflushed bytes dropped",
                self.pending.len()
            );
            return;
        }
        if let Err(e) = self.flush() {
            warn!("[qc-18] Failed to flush WAL on close: {}", e);
        }
    }
}

/// Segments under `dir` in offset order. Takes no lock and repairs nothing.
pub fn segment_spans(dir: &Path) -> WalResult<Vec<SegmentSpan<'static>>> {
    Ok(list_segments(dir)?.iter().map(span_of).collect())
}

/// Scan every frame under `dir` without opening the log for writing.
///
/// A torn tail is reported by the stream, not cut.
pub fn scan_dir(dir: &Path, max_record_bytes: usize) -> WalResult<FrameStream<'static>> {
    FrameStream::new(segment_spans(dir)?, 0, max_record_bytes)
}

fn span_of(segment: &Segment) -> SegmentSpan<'static> {
    SegmentSpan {
        start: segment.start,
        len: segment.len,
        source: SegmentSource::File(segment.path.clone()),
    }
}

fn segment_path(dir: &Path, start: u64) -> PathBuf {
    dir.join(format!("{:020}.{}", start, SEGMENT_EXT))
}

fn list_segments(dir: &Path) -> WalResult<Vec<Segment>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| WalError::io(dir, e))? {
        let entry = entry.map_err(|e| WalError::io(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
            continue;
        }
        let Some(start) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        else {
            warn!("[qc-18] Ignoring unrecognised file {}", path.display());
            continue;
        };
        let len = entry
            .metadata()
            .map_err(|e| WalError::io(&path, e))?
            .len();
        segments.push(Segment { start, len, path });
    }
    segments.sort_by_key(|s| s.start);
    Ok(segments)
}

fn create_segment(dir: &Path, start: u64) -> WalResult<Segment> {
    let path = segment_path(dir, start);
    let file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .map_err(|e| WalError::io(&path, e))?;
    file.sync_all().map_err(|e| WalError::io(&path, e))?;
    fsync_dir(dir)?;
    Ok(Segment {
        start,
        len: 0,
        path,
    })
}

fn open_for_append(path: Option<&Path>) -> WalResult<File> {
    let path = path.ok_or_else(|| WalError::Config {
        reason: "WAL has no active segment".to_string(),
    })?;
    OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| WalError::io(path, e))
}

/// Scan the active segment and cut a torn tail.
fn repair_active(segments: &mut [Segment], max_record_bytes: usize) -> WalResult<Option<TornTail>> {
    let Some(active) = segments.last_mut() else {
        return Ok(None);
    };
    let mut stream = FrameStream::new(vec![span_of(active)], active.start, max_record_bytes)?;
    for frame in stream.by_ref() {
        frame?;
    }
    let Some(torn) = stream.torn_tail() else {
        return Ok(None);
    };

    let new_len = torn.offset - active.start;
    warn!(
        "[qc-18] Torn tail in {} at offset {} ({:?}), truncating {} bytes",
        active.path.display(),
        torn.offset,
        torn.reason,
        active.len - new_len
    );
    let file = OpenOptions::new()
        .write(true)
        .open(&active.path)
        .map_err(|e| WalError::io(&active.path, e))?;
    file.set_len(new_len)
        .and_then(|()| file.sync_all())
        .map_err(|e| WalError::io(&active.path, e))?;
    active.len = new_len;
    Ok(Some(torn))
}

fn retry_io<F>(limit: u32, metrics: &WalMetrics, path: &Path, mut op: F) -> WalResult<()>
where
    F: FnMut() -> io::Result<()>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if is_retryable_kind(e.kind()) && attempt < limit => {
                attempt += 1;
                metrics.record_io_retry();
            }
            Err(e) => return Err(WalError::io(path, e)),
        }
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> WalResult<()> {
    let file = File::open(dir).map_err(|e| WalError::io(dir, e))?;
    file.sync_all().map_err(|e| WalError::io(dir, e))
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> WalResult<()> {
    Ok(())
}

//! # Frame Stream
//!
//! Linear scan over a snapshot of segments. Classifies every stop:
//!
//! | Where | What | Result |
//! |-------|------|--------|
//! | last segment | header cut short, body cut short, bad checksum on the final frame, zero-filled rest | clean end, [`TornTail`] |
//! | last segment | bad checksum with bytes after it, impossible length | [`WalError::Corruption`] |
//! | sealed segment | anything that is not a whole valid frame | [`WalError::Corruption`] |

use crate::domain::codec::{frame, Frame, FrameHeader, FRAME_HEADER_LEN};
use crate::domain::errors::{CorruptionKind, TornReason, WalError, WalResult};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use tracing::debug;

/// Where a segment's bytes live.
#[derive(Debug, Clone)]
pub enum SegmentSource<'a> {
    File(PathBuf),
    Memory(&'a [u8]),
}

/// One segment as seen when the stream was created.
#[derive(Debug, Clone)]
pub struct SegmentSpan<'a> {
    /// Global offset of the segment's first byte.
    pub start: u64,
    /// Durable length at snapshot time.
    pub len: u64,
    pub source: SegmentSource<'a>,
}

impl SegmentSpan<'_> {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// An incomplete trailing write, left by a crash mid-append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TornTail {
    /// Offset of the first byte that is not part of a valid frame.
    pub offset: u64,
    pub reason: TornReason,
}

enum Reader<'a> {
    File {
        reader: BufReader<File>,
        path: PathBuf,
    },
    Memory {
        data: &'a [u8],
        pos: usize,
    },
}

impl<'a> Reader<'a> {
    fn open(source: &SegmentSource<'a>, local_start: u64) -> WalResult<Self> {
        match source {
            SegmentSource::File(path) => {
                let mut file = File::open(path).map_err(|e| WalError::io(path, e))?;
                file.seek(SeekFrom::Start(local_start))
                    .map_err(|e| WalError::io(path, e))?;
                Ok(Reader::File {
                    reader: BufReader::new(file),
                    path: path.clone(),
                })
            }
            SegmentSource::Memory(data) => Ok(Reader::Memory {
                data: *data,
                pos: local_start as usize,
            }),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> WalResult<()> {
        match self {
            Reader::File { reader, path } => {
                reader.read_exact(buf).map_err(|e| WalError::io(path.as_path(), e))
            }
            Reader::Memory { data, pos } => {
                let end = *pos + buf.len();
                let src = data.get(*pos..end).ok_or_else(|| WalError::Io {
                    path: None,
                    source: std::io::ErrorKind::UnexpectedEof.into(),
                })?;
                buf.copy_from_slice(src);
                *pos = end;
                Ok(())
            }
        }
    }

    fn read_vec(&mut self, len: u64) -> WalResult<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

struct Cursor<'a> {
    start: u64,
    len: u64,
    /// Position within the segment.
    pos: u64,
    is_last: bool,
    reader: Reader<'a>,
}

enum Step {
    Frame(Frame),
    SegmentEnd,
    Torn(TornTail),
}

impl Cursor<'_> {
    fn offset(&self) -> u64 {
        self.start + self.pos
    }

    /// A stop short of a whole frame: torn in the last segment, fatal elsewhere.
    fn short(&self, reason: TornReason) -> WalResult<Step> {
        if self.is_last {
            Ok(Step::Torn(TornTail {
                offset: self.offset(),
                reason,
            }))
        } else {
            Err(WalError::Corruption {
                offset: self.offset(),
                kind: CorruptionKind::TruncatedSealedSegment {
                    segment_start: self.start,
                },
            })
        }
    }

    fn step(&mut self, max_record_bytes: usize) -> WalResult<Step> {
        let remaining = self.len - self.pos;
        if remaining == 0 {
            return Ok(Step::SegmentEnd);
        }
        let offset = self.offset();

        if remaining < FRAME_HEADER_LEN as u64 {
            let rest = self.reader.read_vec(remaining)?;
            let reason = if is_all_zero(&rest) {
                TornReason::ZeroFilled
            } else {
                TornReason::IncompleteHeader
            };
            return self.short(reason);
        }

        let mut raw = [0u8; FRAME_HEADER_LEN];
        self.reader.read_exact(&mut raw)?;
        let header = FrameHeader::parse(&raw);

        if header.is_zero() {
            let rest = self.reader.read_vec(remaining - FRAME_HEADER_LEN as u64)?;
            if self.is_last && is_all_zero(&rest) {
                return self.short(TornReason::ZeroFilled);
            }
            return Err(invalid_length(offset, 0, max_record_bytes));
        }
        if header.length == 0 || header.length as usize > max_record_bytes {
            return Err(invalid_length(offset, header.length, max_record_bytes));
        }
        if header.frame_len() > remaining {
            return self.short(TornReason::IncompleteBody);
        }

        let body = self.reader.read_vec(u64::from(header.length))?;
        let actual = frame::checksum(&body);
        if actual != header.checksum {
            if self.is_last && header.frame_len() == remaining {
                return self.short(TornReason::ChecksumMismatch);
            }
            return Err(WalError::Corruption {
                offset,
                kind: CorruptionKind::ChecksumMismatch {
                    expected: header.checksum,
                    actual,
                },
            });
        }

        self.pos += header.frame_len();
        Ok(Step::Frame(Frame {
            offset,
            length: header.length,
            checksum: header.checksum,
            body,
        }))
    }
}

fn invalid_length(offset: u64, length: u32, max: usize) -> WalError {
    WalError::Corruption {
        offset,
        kind: CorruptionKind::InvalidLength { length, max },
    }
}

fn is_all_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0)
}

/// Lazy, finite iterator over verified frames.
///
/// Yields `Err` at most once and then ends. A clean end caused by a torn
/// trailing write is reported by [`FrameStream::torn_tail`].
pub struct FrameStream<'a> {
    pending: VecDeque<SegmentSpan<'a>>,
    cursor: Option<Cursor<'a>>,
    /// Local offset to seek to in the first segment opened.
    first_local_start: u64,
    max_record_bytes: usize,
    valid_end: u64,
    torn_tail: Option<TornTail>,
    finished: bool,
}

impl<'a> FrameStream<'a> {
    /// Stream `segments` (in creation order) starting at global offset `from`.
    ///
    /// # Errors
    ///
    /// - `InvalidOffset` if `from` is past the end of the snapshot
    /// - `Corruption` with `SegmentGap` if the segments are not contiguous
    pub fn new(
        segments: Vec<SegmentSpan<'a>>,
        from: u64,
        max_record_bytes: usize,
    ) -> WalResult<Self> {
        check_contiguous(&segments)?;

        let (log_start, log_end) = match (segments.first(), segments.last()) {
            (Some(first), Some(last)) => (first.start, last.end()),
            _ => (0, 0),
        };
        if from > log_end {
            return Err(WalError::InvalidOffset {
                offset: from,
                start: log_start,
                end: log_end,
            });
        }

        let from = from.max(log_start);
        let pending: VecDeque<_> = segments
            .into_iter()
            .filter(|span| span.end() > from)
            .collect();
        let first_local_start = pending
            .front()
            .map(|span| from - span.start)
            .unwrap_or(0);

        Ok(Self {
            pending,
            cursor: None,
            first_local_start,
            max_record_bytes,
            valid_end: from,
            torn_tail: None,
            finished: false,
        })
    }

    /// Set once the stream has hit a torn trailing write.
    pub fn torn_tail(&self) -> Option<TornTail> {
        self.torn_tail
    }

    /// Offset just past the last frame yielded so far.
    pub fn valid_end(&self) -> u64 {
        self.valid_end
    }

    fn read_next(&mut self) -> WalResult<Option<Frame>> {
        loop {
            if self.cursor.is_none() {
                let Some(span) = self.pending.pop_front() else {
                    return Ok(None);
                };
                let local_start = std::mem::take(&mut self.first_local_start);
                let reader = Reader::open(&span.source, local_start)?;
                self.cursor = Some(Cursor {
                    start: span.start,
                    len: span.len,
                    pos: local_start,
                    is_last: self.pending.is_empty(),
                    reader,
                });
            }
            let Some(cursor) = self.cursor.as_mut() else {
                return Ok(None);
            };

            match cursor.step(self.max_record_bytes)? {
                Step::Frame(frame) => {
                    self.valid_end = frame.end_offset();
                    return Ok(Some(frame));
                }
                Step::SegmentEnd => self.cursor = None,
                Step::Torn(torn) => {
                    debug!(
                        "[qc-18] Scan stopped at torn tail offset {} ({:?})",
                        torn.offset, torn.reason
                    );
                    self.torn_tail = Some(torn);
                    return Ok(None);
                }
            }
        }
    }
}

impl Iterator for FrameStream<'_> {
    type Item = WalResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Every segment must start where the previous one ends.
pub fn check_contiguous(segments: &[SegmentSpan<'_>]) -> WalResult<()> {
    for pair in segments.windows(2) {
        let expected = pair[0].end();
        if pair[1].start != expected {
            return Err(WalError::Corruption {
                offset: expected,
                kind: CorruptionKind::SegmentGap {
                    expected,
                    found: pair[1].start,
                },
            });
        }
    }
    Ok(())
}

//! Scans behind each subcommand and their plain-text rendering.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use qc_18_consensus_wal::adapters::storage::{segment_spans, SegmentSource, SegmentSpan};
use qc_18_consensus_wal::{
    decode, DecodedEntry, Envelope, Event, FrameStream, Height, Origin, TornTail, UnknownEntry,
    WalError,
};

use crate::Target;

#[derive(Debug)]
pub struct SegmentInfo {
    pub start: u64,
    pub len: u64,
    pub file: String,
}

/// Everything a full scan learned before it finished or failed.
#[derive(Debug, Default)]
pub struct Scan {
    pub frames: u64,
    pub by_kind: BTreeMap<&'static str, u64>,
    pub self_generated: u64,
    pub unknown: u64,
    /// (height, offset) of the last height-complete marker.
    pub last_marker: Option<(Height, u64)>,
    pub end_offset: u64,
    pub torn_tail: Option<TornTail>,
    pub failure: Option<WalError>,
}

impl Scan {
    pub fn is_healthy(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug)]
pub struct Inspection {
    pub segments: Vec<SegmentInfo>,
    pub scan: Scan,
}

pub fn inspect(target: &Target) -> Result<Inspection> {
    let spans = segment_spans(&target.dir)?;
    let segments = spans.iter().map(segment_info).collect();
    Ok(Inspection {
        segments,
        scan: scan(spans, target.max_record_bytes),
    })
}

pub fn verify(target: &Target) -> Result<Scan> {
    Ok(scan(segment_spans(&target.dir)?, target.max_record_bytes))
}

fn segment_info(span: &SegmentSpan<'_>) -> SegmentInfo {
    let file = match &span.source {
        SegmentSource::File(path) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        SegmentSource::Memory(_) => "<memory>".to_string(),
    };
    SegmentInfo {
        start: span.start,
        len: span.len,
        file,
    }
}

fn scan(spans: Vec<SegmentSpan<'static>>, max_record_bytes: usize) -> Scan {
    let mut result = Scan::default();
    let mut stream = match FrameStream::new(spans, 0, max_record_bytes) {
        Ok(stream) => stream,
        Err(e) => {
            result.failure = Some(e);
            return result;
        }
    };

    for frame in stream.by_ref() {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                result.failure = Some(e);
                break;
            }
        };
        result.frames += 1;
        match decode(&frame.body) {
            Ok(DecodedEntry::Known(envelope)) => {
                *result.by_kind.entry(envelope.event.kind()).or_default() += 1;
                if let Event::PeerMessage { origin, .. } = &envelope.event {
                    if origin.is_self() {
                        result.self_generated += 1;
                    }
                }
                if let Event::HeightComplete { height, .. } = envelope.event {
                    result.last_marker = Some((height, frame.offset));
                }
            }
            Ok(DecodedEntry::Unknown(entry)) => {
                debug!("Unknown entry at {}: {:?}", frame.offset, entry);
                result.unknown += 1;
            }
            Err(source) => {
                result.failure = Some(WalError::Decode {
                    offset: frame.offset,
                    source,
                });
                break;
            }
        }
    }
    result.end_offset = stream.valid_end();
    result.torn_tail = stream.torn_tail();
    result
}

pub fn write_inspection(out: &mut impl Write, inspection: &Inspection) -> Result<()> {
    writeln!(out, "{:<26} {:>20} {:>12}", "SEGMENT", "START", "BYTES")?;
    for segment in &inspection.segments {
        writeln!(
            out,
            "{:<26} {:>20} {:>12}",
            segment.file, segment.start, segment.len
        )?;
    }
    let total: u64 = inspection.segments.iter().map(|s| s.len).sum();
    writeln!(out, "{} segments, {} bytes", inspection.segments.len(), total)?;
    writeln!(out)?;

    let scan = &inspection.scan;
    writeln!(out, "frames: {}", scan.frames)?;
    for (kind, count) in &scan.by_kind {
        writeln!(out, "  {:<16} {}", kind, count)?;
    }
    writeln!(out, "  {:<16} {}", "(own messages)", scan.self_generated)?;
    if scan.unknown > 0 {
        writeln!(out, "  {:<16} {}", "unknown", scan.unknown)?;
    }
    match scan.last_marker {
        Some((height, offset)) => {
            writeln!(out, "last height complete: {} at offset {}", height, offset)?
        }
        None => writeln!(out, "last height complete: none")?,
    }
    write_tail(out, scan)
}

pub fn write_verdict(out: &mut impl Write, scan: &Scan) -> Result<()> {
    writeln!(out, "scanned {} frames up to offset {}", scan.frames, scan.end_offset)?;
    write_tail(out, scan)?;
    if scan.is_healthy() {
        writeln!(out, "OK")?;
    }
    Ok(())
}

fn write_tail(out: &mut impl Write, scan: &Scan) -> Result<()> {
    if let Some(torn) = scan.torn_tail {
        writeln!(
            out,
            "torn tail at offset {} ({:?}); cut on next open",
            torn.offset, torn.reason
        )?;
    }
    if let Some(failure) = &scan.failure {
        writeln!(out, "FAILED: {}", failure)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct DumpLine<'a> {
    offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<&'a Envelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unknown: Option<&'a UnknownEntry>,
}

/// Print every entry from `from` on. Stops with an error at the first bad frame.
pub fn dump(target: &Target, from: u64, json: bool, out: &mut impl Write) -> Result<()> {
    let stream = FrameStream::new(segment_spans(&target.dir)?, from, target.max_record_bytes)?;
    for frame in stream {
        let frame = frame?;
        let entry = decode(&frame.body).map_err(|source| WalError::Decode {
            offset: frame.offset,
            source,
        })?;
        if json {
            let line = match &entry {
                DecodedEntry::Known(envelope) => DumpLine {
                    offset: frame.offset,
                    entry: Some(envelope),
                    unknown: None,
                },
                DecodedEntry::Unknown(unknown) => DumpLine {
                    offset: frame.offset,
                    entry: None,
                    unknown: Some(unknown),
                },
            };
            serde_json::to_writer(&mut *out, &line)?;
            writeln!(out)?;
        } else {
            writeln!(out, "{:>12}  {}", frame.offset, describe(&entry))?;
        }
    }
    Ok(())
}

fn describe(entry: &DecodedEntry) -> String {
    let envelope = match entry {
        DecodedEntry::Known(envelope) => envelope,
        DecodedEntry::Unknown(unknown) => {
            return format!(
                "unknown event={} message={:?}",
                unknown.event_tag, unknown.message_tag
            )
        }
    };
    match &envelope.event {
        Event::PeerMessage { message, origin } => format!(
            "{} h={} r={} from={}",
            message.kind(),
            message.height(),
            message.round(),
            match origin {
                Origin::SelfGenerated => "self",
                Origin::Peer(peer) => peer.as_str(),
            }
        ),
        Event::Timeout(t) => format!(
            "timeout h={} r={} step={} after={}ms",
            t.height,
            t.round,
            t.step,
            t.duration.as_millis()
        ),
        Event::HeightComplete { height, block_id } => {
            format!("height_complete h={} block={}", height, block_id)
        }
        Event::DebugSnapshot(s) => {
            format!("snapshot h={} r={} step={}", s.height, s.round, s.step)
        }
    }
}

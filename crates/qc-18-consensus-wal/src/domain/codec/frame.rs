//! Length/checksum framing.
//!
//! ```text
//! ┌────────────┬──────────────┬─────────────┐
//! │ length u32 │ checksum u32 │ body        │
//! │ LE         │ LE, CRC-32   │ length bytes│
//! └────────────┴──────────────┴─────────────┘
//! ```

use crate::domain::errors::{WalError, WalResult};

/// Bytes preceding every body.
pub const FRAME_HEADER_LEN: usize = 8;

/// Fixed-size frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub checksum: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; FRAME_HEADER_LEN]) -> Self {
        Self {
            length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            checksum: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// A zero header is what a preallocated or zero-filled tail looks like.
    pub fn is_zero(&self) -> bool {
        self.length == 0 && self.checksum == 0
    }

    /// Total on-disk size of the frame this header introduces.
    pub fn frame_len(&self) -> u64 {
        FRAME_HEADER_LEN as u64 + u64::from(self.length)
    }
}

pub fn checksum(body: &[u8]) -> u32 {
    crc32fast::hash(body)
}

/// Wrap an entry body in a frame.
///
/// Empty bodies and bodies above `max_record_bytes` are rejected.
pub fn encode_frame(body: &[u8], max_record_bytes: usize) -> WalResult<Vec<u8>> {
    if body.is_empty() || body.len() > max_record_bytes || u32::try_from(body.len()).is_err() {
        return Err(WalError::RecordTooLarge {
            max_bytes: max_record_bytes,
            got_bytes: body.len(),
        });
    }
    let header = FrameHeader {
        length: body.len() as u32,
        checksum: checksum(body),
    };
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

/// One verified frame read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Global byte offset of the frame header.
    pub offset: u64,
    pub length: u32,
    pub checksum: u32,
    pub body: Vec<u8>,
}

impl Frame {
    /// Offset of the byte after this frame.
    pub fn end_offset(&self) -> u64 {
        self.offset + FRAME_HEADER_LEN as u64 + u64::from(self.length)
    }
}

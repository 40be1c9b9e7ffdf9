//! Frame codec for the encrypted channel.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 1 byte: frame type (1 = CONTROL, 2 = DATA)
//! - 4 bytes: payload length (big-endian)
//! - N bytes: payload verbatim
//!
//! A frame is the unit of transport-level delivery. Encoding is pure;
//! decoding is split into a header step and a caller-driven payload read so
//! readers pulling from a reliable stream can read exactly `len` payload
//! bytes after the 5-byte header. A short read before the expected count is
//! a transport condition, never a framing error.

use crate::error::{ProtocolError, Result};

/// Frame header size: 1 (type) + 4 (length) = 5 bytes.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MiB). Bounds memory use on both encode and
/// header decode; the wire format itself carries no limit.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Type tag of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Structured negotiation/administrative message (JSON payload).
    Control = 1,
    /// Raw session bytes (console or PTY payload).
    Data = 2,
}

impl FrameType {
    /// Parse a wire type byte. Unknown tags return `None`; readers skip
    /// such frames rather than failing, since the length field still
    /// delimits them.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(FrameType::Control),
            2 => Some(FrameType::Data),
            _ => None,
        }
    }

    /// Wire representation of the tag.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw type byte as received.
    pub raw_type: u8,
    /// Payload length in bytes.
    pub payload_len: usize,
}

impl FrameHeader {
    /// The typed tag, if the type byte is recognized.
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_byte(self.raw_type)
    }
}

/// A complete frame: type tag plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// The payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a DATA frame carrying `payload`.
    pub fn data(payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Data,
            payload,
        }
    }

    /// Create a CONTROL frame carrying `payload`.
    pub fn control(payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Control,
            payload,
        }
    }
}

/// Encode a frame into its wire representation.
///
/// Produces `1 + 4 + payload.len()` bytes. Payloads above [`MAX_FRAME_SIZE`]
/// are rejected.
pub fn encode(frame_type: FrameType, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut output = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    output.push(frame_type.as_byte());
    output.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    output.extend_from_slice(payload);
    Ok(output)
}

/// Decode a 5-byte frame header.
///
/// The caller is expected to follow up by reading exactly
/// `header.payload_len` payload bytes from the same stream. Lengths above
/// [`MAX_FRAME_SIZE`] are rejected before any payload allocation.
pub fn decode_header(header: &[u8; FRAME_HEADER_SIZE]) -> Result<FrameHeader> {
    let raw_type = header[0];
    let payload_len =
        u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload_len,
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(FrameHeader {
        raw_type,
        payload_len,
    })
}

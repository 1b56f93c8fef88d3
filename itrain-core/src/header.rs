//! Fixed 4-byte frame header.
//!
//! ```text
//! start:          u8   (1)   always 0xFF
//! message_type:   u8   (1)
//! payload_size:   u16  (2)   big-endian
//! ```

use crate::error::GatewayError;

/// Resynchronisation marker that opens every frame.
pub const START_MARKER: u8 = 0xFF;

/// Encoded header size on the wire.
pub const HEADER_SIZE: usize = 4;

/// Trailing XOR checksum size.
pub const CHECKSUM_SIZE: usize = 1;

/// Bytes a frame carries besides its payload.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + CHECKSUM_SIZE;

pub type FrameHeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    message_type: u8,
    payload_size: u16,
}

impl FrameHeader {
    pub fn new(message_type: u8, payload_size: u16) -> Self {
        Self {
            message_type,
            payload_size,
        }
    }

    pub fn to_bytes(&self) -> FrameHeaderBytes {
        let mut header: FrameHeaderBytes = [0; HEADER_SIZE];
        header[0] = START_MARKER;
        header[1] = self.message_type;
        header[2..4].copy_from_slice(&self.payload_size.to_be_bytes());
        header
    }

    pub fn from_bytes(bytes: &FrameHeaderBytes) -> Result<Self, GatewayError> {
        if bytes[0] != START_MARKER {
            return Err(GatewayError::InvalidStartMarker(bytes[0]));
        }
        Ok(Self {
            message_type: bytes[1],
            payload_size: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }

    /// Parse the header at the front of `data`, if enough bytes are present.
    pub fn peek(data: &[u8]) -> Option<Result<Self, GatewayError>> {
        let bytes: &FrameHeaderBytes = data.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self::from_bytes(bytes))
    }

    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    pub fn payload_size(&self) -> u16 {
        self.payload_size
    }

    /// Header + payload + checksum.
    pub fn frame_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload_size as usize
    }
}

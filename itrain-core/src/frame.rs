//! The wire PDU: header, payload and trailing XOR checksum.
//!
//! ```text
//! [start:1][type:1][len:2 BE][payload:len][checksum:1]
//! ```
//!
//! The checksum is a sequential XOR fold over every byte before it, in
//! wire order. It detects any single-bit flip; multi-bit flips that
//! cancel out within the same bit column go unnoticed.

use std::fmt::Debug;

use bytes::{Bytes, BytesMut};

use crate::error::{DecodeError, GatewayError};
use crate::header::{CHECKSUM_SIZE, FRAME_OVERHEAD, FrameHeader, HEADER_SIZE, START_MARKER};

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// XOR of every byte in `data`.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// One complete frame. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Build an outgoing frame; `payload` is copied verbatim and may be empty.
    pub fn encode(message_type: u8, payload: &[u8]) -> Result<Self, GatewayError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(GatewayError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = FrameHeader::new(message_type, payload.len() as u16);
        let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(payload);
        let checksum = xor_checksum(&buf);
        buf.extend_from_slice(&[checksum]);

        Ok(Self {
            bytes: buf.freeze(),
        })
    }

    /// Copy the frame at the front of `src` out of it.
    ///
    /// The checksum is not checked here; see [`checked`](Self::checked).
    pub fn try_decode(src: &[u8]) -> Result<Self, DecodeError> {
        if src.len() < HEADER_SIZE {
            return Err(DecodeError::NeedMoreData {
                needed: HEADER_SIZE - src.len(),
            });
        }
        if src[0] != START_MARKER {
            return Err(DecodeError::Corrupt("missing start marker"));
        }

        let payload_size = u16::from_be_bytes([src[2], src[3]]) as usize;
        let total = FRAME_OVERHEAD + payload_size;
        if src.len() < total {
            return Err(DecodeError::NeedMoreData {
                needed: total - src.len(),
            });
        }

        Ok(Self {
            bytes: Bytes::copy_from_slice(&src[..total]),
        })
    }

    /// Recompute the XOR over header and payload and compare with the trailer.
    pub fn verify_checksum(&self) -> bool {
        self.computed_checksum() == self.checksum()
    }

    /// Hand the frame back only if its trailer matches.
    pub fn checked(self) -> Result<Self, GatewayError> {
        let expected = self.computed_checksum();
        let actual = self.checksum();
        if expected != actual {
            return Err(GatewayError::ChecksumMismatch { expected, actual });
        }
        Ok(self)
    }

    pub fn computed_checksum(&self) -> u8 {
        xor_checksum(&self.bytes[..self.bytes.len() - CHECKSUM_SIZE])
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.message_type(), self.payload().len() as u16)
    }

    pub fn message_type(&self) -> u8 {
        self.bytes[1]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..self.bytes.len() - CHECKSUM_SIZE]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - CHECKSUM_SIZE]
    }

    /// The complete wire encoding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("message_type", &format_args!("{:#04x}", self.message_type()))
            .field("payload", &self.payload())
            .field("checksum", &format_args!("{:#04x}", self.checksum()))
            .finish()
    }
}

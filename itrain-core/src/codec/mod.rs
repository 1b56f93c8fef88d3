//! Stream framing for the device protocol.
//!
//! [`TrainCodec`] plugs the frame format into `tokio_util`'s `FramedRead` /
//! `FramedWrite`; [`FrameBuffer`] is the bounded accumulation buffer a
//! connection reader fills by hand. Both cut frames with the same
//! resynchronising scanner.

mod buffer;

pub use buffer::FrameBuffer;

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::error::GatewayError;
use crate::frame::Frame;
use crate::header::{FrameHeader, START_MARKER};

/// Default receive buffer capacity per connection.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Cut the next valid frame from the front of `buf`.
///
/// Leading bytes before a start marker are dropped. A frame whose checksum
/// does not match is skipped as a whole and scanning resumes after it, so
/// one corrupt frame never costs the ones behind it. A header announcing a
/// frame longer than `capacity` empties the buffer and is reported as
/// [`GatewayError::FrameTooLarge`].
pub(crate) fn next_frame(
    buf: &mut BytesMut,
    capacity: usize,
) -> Result<Option<Frame>, GatewayError> {
    loop {
        match buf.iter().position(|&b| b == START_MARKER) {
            Some(0) => {}
            Some(offset) => {
                trace!(skipped = offset, "resync: dropping bytes before start marker");
                buf.advance(offset);
            }
            None => {
                if !buf.is_empty() {
                    trace!(skipped = buf.len(), "resync: no start marker in buffer");
                    buf.clear();
                }
                return Ok(None);
            }
        }

        let header = match FrameHeader::peek(buf) {
            Some(header) => header?,
            None => return Ok(None),
        };

        let frame_len = header.frame_len();
        if frame_len > capacity {
            buf.clear();
            return Err(GatewayError::FrameTooLarge {
                size: frame_len,
                max: capacity,
            });
        }
        if buf.len() < frame_len {
            return Ok(None);
        }

        let frame = Frame::try_decode(&buf[..frame_len])?;
        buf.advance(frame_len);

        let message_type = frame.message_type();
        match frame.checked() {
            Ok(frame) => return Ok(Some(frame)),
            Err(e) => warn!(message_type, error = %e, "dropping frame"),
        }
    }
}

/// `tokio_util` codec for device frames.
#[derive(Debug, Clone, Copy)]
pub struct TrainCodec {
    max_frame_len: usize,
}

impl TrainCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for TrainCodec {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl tokio_util::codec::Decoder for TrainCodec {
    type Item = Frame;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        next_frame(src, self.max_frame_len)
    }
}

impl tokio_util::codec::Encoder<Frame> for TrainCodec {
    type Error = GatewayError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

//! Bounded per-connection accumulation buffer.

use bytes::BytesMut;

use super::next_frame;
use crate::error::GatewayError;
use crate::frame::Frame;

/// Bytes received from one peer that have not formed a frame yet.
///
/// The buffer never holds more than `capacity` bytes. Callers alternate
/// [`fill`](Self::fill) and [`take_frame`](Self::take_frame) until a read
/// chunk is fully consumed:
///
/// ```ignore
/// let mut rest = chunk;
/// while !rest.is_empty() {
///     let n = buffer.fill(rest);
///     rest = &rest[n..];
///     while let Some(frame) = buffer.take_frame()? {
///         handle(frame);
///     }
/// }
/// ```
///
/// A full buffer always makes progress on `take_frame`: it either yields a
/// frame, discards garbage, or fails with `FrameTooLarge`.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Append as much of `data` as fits; returns the number of bytes taken.
    pub fn fill(&mut self, data: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(self.buf.len());
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        n
    }

    /// Next checksum-valid frame, compacting consumed bytes away.
    pub fn take_frame(&mut self) -> Result<Option<Frame>, GatewayError> {
        next_frame(&mut self.buf, self.capacity)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(kind: u8, payload: &[u8]) -> Vec<u8> {
        Frame::encode(kind, payload).unwrap().as_bytes().to_vec()
    }

    fn drain(buffer: &mut FrameBuffer, mut data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        while !data.is_empty() {
            let n = buffer.fill(data);
            data = &data[n..];
            while let Some(frame) = buffer.take_frame().unwrap() {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut buffer = FrameBuffer::new(1024);
        let mut data = wire(0x01, &[]);
        data.extend(wire(0x08, &[]));

        let frames = drain(&mut buffer, &data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].message_type(), 0x01);
        assert_eq!(frames[1].message_type(), 0x08);
        assert!(buffer.is_empty());
    }

    #[test]
    fn frame_split_across_reads() {
        let mut buffer = FrameBuffer::new(1024);
        let data = wire(0x06, &[0x07, 0xE8, 5, 1, 12, 30, 0]);

        assert!(drain(&mut buffer, &data[..3]).is_empty());
        assert_eq!(buffer.len(), 3);
        let frames = drain(&mut buffer, &data[3..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload().len(), 7);
    }

    #[test]
    fn fill_respects_capacity() {
        let mut buffer = FrameBuffer::new(8);
        assert_eq!(buffer.fill(&[0u8; 20]), 8);
        assert_eq!(buffer.fill(&[0u8; 1]), 0);
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn chunk_larger_than_capacity_still_yields_frames() {
        let mut buffer = FrameBuffer::new(16);
        let mut data = Vec::new();
        for _ in 0..6 {
            data.extend(wire(0x01, &[]));
        }

        let frames = drain(&mut buffer, &data);
        assert_eq!(frames.len(), 6);
    }

    #[test]
    fn oversized_frame_is_fatal() {
        let mut buffer = FrameBuffer::new(16);
        buffer.fill(&[0xFF, 0x02, 0x00, 0x40]);
        assert!(matches!(
            buffer.take_frame(),
            Err(GatewayError::FrameTooLarge { size: 69, max: 16 })
        ));
        assert!(buffer.is_empty());
    }
}

//! Fixed-size frame reassembly for raw pixel streams.

use bytes::{Bytes, BytesMut};

/// Accumulates a byte stream and slices off complete frames of a fixed size.
///
/// Reads from a pipe or device node rarely line up with frame boundaries, so
/// partial frames are carried across calls to [`FrameAssembler::push`].
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    buffer: BytesMut,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            buffer: BytesMut::with_capacity(frame_size.max(1)),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Bytes of the next, still incomplete, frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::with_capacity(self.buffer.len() / self.frame_size);
        while self.buffer.len() >= self.frame_size {
            frames.push(self.buffer.split_to(self.frame_size).freeze());
        }
        if self.buffer.capacity() < self.frame_size {
            self.buffer.reserve(self.frame_size - self.buffer.len());
        }
        frames
    }

    /// Drop any partial frame, returning how many bytes were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }
}

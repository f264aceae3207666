//! Bounded outbound byte queue.
//!
//! Bytes destined for a client leg are staged here and drained by the
//! connection's flush action. Producers may only push as much as
//! `space()` allows; that is the backpressure signal.

use bytes::{Buf, BytesMut};

#[derive(Debug)]
pub struct OutboundBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl OutboundBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free room left.
    pub fn space(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Push up to `space()` bytes of `data`, returning how many were taken.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.space());
        self.buf.extend_from_slice(&data[..n]);
        n
    }

    /// Staged bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drop `n` bytes from the front after they were written out.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n.min(self.buf.len()));
    }
}

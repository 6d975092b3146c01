//! Growable byte queue used for channel input, output and extended data.

use core::fmt;

/// A FIFO byte buffer.
///
/// Data is appended at the end and consumed from the front. Consumed space
/// is reclaimed lazily once it dominates the allocation, so `peek()` can
/// always return one contiguous slice.
#[derive(Default)]
pub struct Buffer {
    buf: Vec<u8>,
    /// read position
    off: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len() - self.off
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append(&mut self, data: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(data);
    }

    /// All buffered data, contiguous
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.off..]
    }

    /// Mutable access to buffered data, for rewriting in place.
    pub fn peek_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.off..]
    }

    /// Discards `n` bytes from the front.
    ///
    /// Consuming more than is buffered empties the buffer.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len());
        self.off += n;
        if self.off == self.buf.len() {
            self.clear();
        }
    }

    /// Removes and returns `n` bytes from the front.
    ///
    /// Returns `None` (and consumes nothing) if fewer are buffered.
    pub fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        if n > self.len() {
            return None;
        }
        let v = self.peek()[..n].to_vec();
        self.consume(n);
        Some(v)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.off = 0;
    }

    /// Whether `add` more bytes can be buffered without exceeding `max`.
    pub fn check_alloc(&self, add: usize, max: usize) -> bool {
        self.len().saturating_add(add) <= max
    }

    fn compact(&mut self) {
        if self.off > 0 && self.off >= self.buf.len() / 2 {
            self.buf.drain(..self.off);
            self.off = 0;
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("len", &self.len()).finish()
    }
}

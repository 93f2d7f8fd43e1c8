//! Block-rounded byte queue backing both directions of session I/O.
//!
//! Storage grows and shrinks in whole [`BLOCK_SIZE`] blocks. Small appends
//! that fit in the current block count never reallocate.

/// Allocation granularity in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// FIFO byte buffer with append/peek/consume semantics.
#[derive(Debug, Default)]
pub struct ByteQueue {
    buf: Vec<u8>,
    blocks: usize,
}

impl ByteQueue {
    /// Empty queue with no storage reserved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Whether the queue holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Reserved capacity. Always a multiple of [`BLOCK_SIZE`] and at least
    /// [`size`](Self::size).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.blocks * BLOCK_SIZE
    }

    /// View the buffered bytes without consuming them.
    #[inline]
    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Append bytes at the back.
    pub fn append(&mut self, bytes: &[u8]) {
        let needed = self.buf.len() + bytes.len();
        if needed > self.capacity() {
            self.resize_blocks(needed.div_ceil(BLOCK_SIZE));
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Drop `n` bytes from the front. Asking for more than is buffered
    /// empties the queue.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        if n == 0 {
            return;
        }
        self.buf.drain(..n);

        let blocks = self.buf.len().div_ceil(BLOCK_SIZE);
        if blocks != self.blocks {
            self.resize_blocks(blocks);
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.consume(self.buf.len());
    }

    fn resize_blocks(&mut self, blocks: usize) {
        let target = blocks * BLOCK_SIZE;
        if target > self.buf.capacity() {
            self.buf.reserve_exact(target - self.buf.len());
        } else {
            self.buf.shrink_to(target);
        }
        self.blocks = blocks;
    }
}

//! The active receive buffer.
//!
//! In-order bytes accumulate here until a PSH arrives or the buffer
//! fills, at which point the connection hands the contents to the read
//! callback and the buffer starts over. Its free space is what the
//! connection advertises as the receive window.

#[derive(Debug)]
pub struct ReadRequest {
    buffer: Vec<u8>,
    capacity: usize,
}

impl ReadRequest {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Copies as much of `data` as fits; returns the number of bytes
    /// taken.
    pub fn insert(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        self.buffer.extend_from_slice(&data[..take]);
        take
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Free space left before the buffer must be delivered.
    pub fn remaining(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Hands out the buffered bytes and resets for the next batch.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity))
    }
}

//! Ring buffer between the flow controller and the transfer engine.
//!
//! The flow controller writes whole sectors (minus bytes outside the file) and
//! the transfer engine drains arbitrary byte counts. Offsets wrap modulo the
//! capacity. A write never overwrites unread bytes: it is cut short instead,
//! and the flow controller only writes a sector once all of it fits.
//!
//! ```ignore
//! let mut ring = RingBuffer::new(4096);
//! ring.write(&sector[..2048]);
//! let mut out = [0u8; 100];
//! ring.read(&mut out);
//! ```

use alloc::vec;
use alloc::vec::Vec;

/// Fixed-capacity circular byte buffer.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    storage: Vec<u8>,
    read_offset: usize,
    write_offset: usize,
    len: usize,
}

impl RingBuffer {
    /// Create a ring of `capacity` bytes (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity.max(1)],
            read_offset: 0,
            write_offset: 0,
            len: 0,
        }
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes waiting to be read
    pub fn len(&self) -> usize {
        self.len
    }

    /// Nothing to read
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// No room to write
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Room left for writing
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Next byte to read, as an offset into the storage
    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    /// Next byte to write, as an offset into the storage
    pub fn write_offset(&self) -> usize {
        self.write_offset
    }

    /// Append as much of `data` as fits; returns bytes written
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free());
        let first = n.min(self.capacity() - self.write_offset);
        self.storage[self.write_offset..self.write_offset + first].copy_from_slice(&data[..first]);
        self.storage[..n - first].copy_from_slice(&data[first..n]);
        self.write_offset = (self.write_offset + n) % self.capacity();
        self.len += n;
        n
    }

    /// Copy up to `buf.len()` bytes out and consume them; returns bytes read
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.peek(buf);
        self.consume(n);
        n
    }

    /// Copy up to `buf.len()` bytes out without consuming them
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        let (a, b) = self.readable();
        let n = buf.len().min(self.len);
        let first = n.min(a.len());
        buf[..first].copy_from_slice(&a[..first]);
        buf[first..n].copy_from_slice(&b[..n - first]);
        n
    }

    /// Readable bytes as two contiguous runs (the second is empty unless the data wraps)
    pub fn readable(&self) -> (&[u8], &[u8]) {
        let end = self.read_offset + self.len;
        if end <= self.capacity() {
            (&self.storage[self.read_offset..end], &[])
        } else {
            (
                &self.storage[self.read_offset..],
                &self.storage[..end - self.capacity()],
            )
        }
    }

    /// Drop up to `n` readable bytes; returns bytes dropped
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        self.read_offset = (self.read_offset + n) % self.capacity();
        self.len -= n;
        n
    }

    /// Discard everything
    pub fn clear(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;
        self.len = 0;
    }
}

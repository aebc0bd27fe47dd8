//! Fixed-capacity byte ring between the producer side and the broadcaster.
//!
//! The ring is the sole rendezvous between whichever producer currently
//! owns the write role and the broadcaster that owns the read role. All
//! operations take one lock; reads and writes are at most two contiguous
//! copies each (one on either side of the wrap point).
//!
//! Writes are all-or-nothing: a write that does not fit is rejected rather
//! than overwriting unread data, because a silent overwrite would corrupt
//! the bitstream mid-frame. The producer retries after a short pause;
//! sustained rejection just means the consumers are not draining.

use bytes::Bytes;
use parking_lot::Mutex;

/// A bounded byte ring with single-writer/single-reader discipline.
///
/// Invariants (checked in debug builds):
/// - `0 <= count <= capacity`
/// - `write == (read + count) % capacity`
pub struct RingBuffer {
    inner: Mutex<RingState>,
    capacity: usize,
}

struct RingState {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
    count: usize,
}

impl RingState {
    #[inline]
    fn debug_check(&self, capacity: usize) {
        debug_assert!(self.count <= capacity);
        debug_assert_eq!(self.write, (self.read + self.count) % capacity);
    }
}

impl RingBuffer {
    /// Creates a ring with the given capacity in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be nonzero");
        Self {
            inner: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                read: 0,
                write: 0,
                count: 0,
            }),
            capacity,
        }
    }

    /// Appends `data` if it fits entirely, returning whether it was
    /// accepted. The ring never partially writes.
    pub fn write(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        let mut state = self.inner.lock();
        if data.len() > self.capacity - state.count {
            return false;
        }

        let write = state.write;
        let first = (self.capacity - write).min(data.len());
        state.buf[write..write + first].copy_from_slice(&data[..first]);
        // Wrapped remainder, if any
        let rest = data.len() - first;
        state.buf[..rest].copy_from_slice(&data[first..]);

        state.write = (write + data.len()) % self.capacity;
        state.count += data.len();
        state.debug_check(self.capacity);
        true
    }

    /// Reads exactly `size` bytes, or returns `None` if fewer are
    /// populated. A zero-sized read returns an empty chunk without
    /// advancing offsets.
    pub fn read(&self, size: usize) -> Option<Bytes> {
        if size == 0 {
            return Some(Bytes::new());
        }
        let mut state = self.inner.lock();
        if state.count < size {
            return None;
        }

        let mut out = vec![0u8; size];
        let read = state.read;
        let first = (self.capacity - read).min(size);
        out[..first].copy_from_slice(&state.buf[read..read + first]);
        out[first..].copy_from_slice(&state.buf[..size - first]);

        state.read = (read + size) % self.capacity;
        state.count -= size;
        state.debug_check(self.capacity);
        Some(Bytes::from(out))
    }

    /// Bytes currently populated.
    pub fn available(&self) -> usize {
        self.inner.lock().count
    }

    /// Bytes that can still be written.
    pub fn space(&self) -> usize {
        self.capacity - self.inner.lock().count
    }

    /// Fill fraction, 0.0..=1.0.
    pub fn fill_percent(&self) -> f64 {
        self.inner.lock().count as f64 / self.capacity as f64
    }

    /// Drops all populated bytes and resets both offsets.
    ///
    /// Called on every producer switch so consumers never splice the tail
    /// of one bitstream onto the head of another.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.read = 0;
        state.write = 0;
        state.count = 0;
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

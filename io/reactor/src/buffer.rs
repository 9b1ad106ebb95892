//! Auto-compacting staging buffer for socket I/O.
//!
//! Used for per-connection send staging. The readable window lives between
//! `read_pos` and `write_pos`; consumed space in front of the window is
//! reclaimed by compaction rather than allocation where possible.

/// A growable buffer with a sliding readable window.
///
/// Invariants: `read_pos <= write_pos <= capacity`. Readable bytes are
/// `write_pos - read_pos`; the writable tail is `capacity - write_pos`.
///
/// The buffer is single-owner. Callers provide external synchronisation —
/// the connection guards its send instance with the send mutex.
#[derive(Debug)]
pub struct ByteBuffer {
    data: Vec<u8>,
    /// Read position: data before this has been consumed.
    read_pos: usize,
    /// Write position: data has been written up to here.
    write_pos: usize,
}

impl ByteBuffer {
    /// Create a buffer with the given starting capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Total capacity of the underlying region.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of readable bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Returns true if there is nothing to read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// The readable window.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Append `src` in full. Never partial: the buffer compacts and then
    /// grows to `max(capacity * 2, write_pos + src.len())` as needed.
    pub fn write(&mut self, src: &[u8]) {
        self.reserve(src.len());
        self.data[self.write_pos..self.write_pos + src.len()].copy_from_slice(src);
        self.write_pos += src.len();
    }

    /// Consume `n` bytes from the front of the readable window.
    ///
    /// An emptied buffer resets both positions to zero without freeing the
    /// region. When the read position passes half the capacity the window
    /// is shifted back to offset zero.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the readable bytes.
    pub fn advance(&mut self, n: usize) {
        assert!(
            n <= self.len(),
            "advance({}) exceeds readable bytes ({})",
            n,
            self.len()
        );
        self.read_pos += n;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        } else if self.read_pos > self.capacity() / 2 {
            self.compact();
        }
    }

    #[inline]
    fn spare(&self) -> usize {
        self.capacity() - self.write_pos
    }

    /// Ensure at least `n` bytes of writable tail, compacting first and
    /// reallocating only if compaction is not enough.
    fn reserve(&mut self, n: usize) {
        if self.spare() >= n {
            return;
        }
        if self.read_pos > 0 {
            self.compact();
        }
        if self.spare() >= n {
            return;
        }
        let required = self.write_pos + n;
        let new_capacity = (self.capacity() * 2).max(required);
        self.data.resize(new_capacity, 0);
    }

    /// Shift the readable window to the start of the region.
    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        let readable = self.len();
        if readable > 0 {
            self.data.copy_within(self.read_pos..self.write_pos, 0);
        }
        self.read_pos = 0;
        self.write_pos = readable;
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::with_capacity(4096)
    }
}

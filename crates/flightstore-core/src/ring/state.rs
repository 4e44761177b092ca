//! Ring geometry bookkeeping.

/// Geometry-only record of the ring buffer: head, tail, used size, entry
/// count and the flash region it lives in. Holds no I/O; the sole authority
/// on whether an append fits at a chosen offset.
///
/// `head == tail` with `size == 0` means empty; `size == capacity` means
/// full. The used region is `[head, head + size)` modulo capacity and the
/// free region is its complement.
#[derive(Debug, Clone)]
pub struct RingState {
    pub(crate) head: usize,
    pub(crate) tail: usize,
    pub(crate) size: usize,
    pub(crate) count: usize,
    flash_start: usize,
    capacity: usize,
}

impl RingState {
    /// Creates an empty ring over `capacity` bytes based at `flash_start`.
    #[must_use]
    pub fn new(flash_start: usize, capacity: usize) -> Self {
        Self {
            head: 0,
            tail: 0,
            size: 0,
            count: 0,
            flash_start,
            capacity,
        }
    }

    /// True when no entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Bytes of the region in use, including inter-entry alignment padding.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of stored entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Total bytes of the reserved region.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free bytes overall.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity - self.size
    }

    /// Ring offset of the oldest entry.
    #[must_use]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Ring offset of the next write.
    #[must_use]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Absolute address where the reserved region starts.
    #[must_use]
    pub fn flash_start(&self) -> usize {
        self.flash_start
    }

    /// Contiguous free bytes starting at ring offset `start` before hitting
    /// used data.
    ///
    /// The used region is `[head, head + size)` modulo capacity; this walks
    /// the two geometric cases (used region wrapping or not) and returns how
    /// far a write beginning at `start` may extend.
    #[must_use]
    pub fn available_from(&self, start: usize) -> usize {
        let cap = self.capacity;
        if cap == 0 {
            return 0;
        }
        if self.size == 0 {
            return cap;
        }

        let start = start % cap;
        let used_start = self.head;
        let used_end = (self.head + self.size) % cap;

        if used_start < used_end {
            // used = [used_start, used_end), free wraps around the end
            if start < used_start {
                return used_start - start;
            }
            if start >= used_end {
                return cap - start + used_start;
            }
            return 0;
        }

        // used wraps: free = [used_end, used_start)
        if start >= used_end && start < used_start {
            return used_start - start;
        }
        0
    }
}

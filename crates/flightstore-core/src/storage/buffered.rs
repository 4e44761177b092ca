//! Block-caching accessor wrapper.

use tracing::error;

use crate::error::AccessorError;
use crate::storage::StorageAccessor;

/// Page cache in front of a block-natural medium.
///
/// Holds one resident block of `BLOCK_SIZE` bytes and coalesces arbitrary
/// unaligned reads and writes into full-block transfers on the base
/// accessor. A dirty block is written back when a different block is
/// touched, on [`flush`](Self::flush), or on drop. Within one wrapper
/// instance, reads always observe preceding writes.
///
/// The wrapper reports alignment 1: callers may stream bytes and the cache
/// absorbs the sub-block traffic. `BLOCK_SIZE` must equal the base
/// accessor's program unit.
pub struct BufferedAccessor<A: StorageAccessor, const BLOCK_SIZE: usize> {
    base: A,
    cache: Box<[u8; BLOCK_SIZE]>,
    dirty: bool,
    valid: bool,
    // 0-based logical start of the resident block within the flash region
    block_start: usize,
    flush_error: Option<AccessorError>,
}

impl<A: StorageAccessor, const BLOCK_SIZE: usize> BufferedAccessor<A, BLOCK_SIZE> {
    /// Wraps `base` with an empty cache.
    pub fn new(base: A) -> Self {
        Self {
            base,
            cache: Box::new([0xFF; BLOCK_SIZE]),
            dirty: false,
            valid: false,
            block_start: 0,
            flush_error: None,
        }
    }

    /// Writes the resident block back to the base accessor if it is dirty.
    pub fn flush(&mut self) -> Result<(), AccessorError> {
        if !self.dirty || !self.valid {
            return Ok(());
        }

        let address = self.base.flash_start_address() + self.block_start;
        if let Err(e) = self.base.write(address, self.cache.as_slice()) {
            self.flush_error = Some(e);
            return Err(e);
        }
        self.dirty = false;
        Ok(())
    }

    /// Returns and clears the most recent flush failure.
    ///
    /// A flush error during drop cannot propagate; callers that care should
    /// invoke [`flush`](Self::flush) explicitly before dropping the wrapper.
    pub fn take_flush_error(&mut self) -> Option<AccessorError> {
        self.flush_error.take()
    }

    fn fill(&mut self, logical_block_start: usize) -> Result<(), AccessorError> {
        if logical_block_start + BLOCK_SIZE > self.base.flash_memory_size() {
            return Err(AccessorError::OutOfBounds);
        }

        self.flush()?;

        let address = self.base.flash_start_address() + logical_block_start;
        self.base.read(address, self.cache.as_mut_slice())?;
        self.block_start = logical_block_start;
        self.valid = true;
        Ok(())
    }

    fn check_range(&self, address: usize, len: usize) -> Result<usize, AccessorError> {
        let offset = address
            .checked_sub(self.base.flash_start_address())
            .ok_or(AccessorError::OutOfBounds)?;
        if offset + len > self.base.flash_memory_size() {
            return Err(AccessorError::OutOfBounds);
        }
        Ok(offset)
    }
}

impl<A: StorageAccessor, const BLOCK_SIZE: usize> StorageAccessor
    for BufferedAccessor<A, BLOCK_SIZE>
{
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), AccessorError> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut logical = self.check_range(address, buf.len())?;

        let mut done = 0;
        while done < buf.len() {
            let block_offset = logical % BLOCK_SIZE;
            let block_start = logical - block_offset;
            let chunk = (BLOCK_SIZE - block_offset).min(buf.len() - done);

            if !self.valid || block_start != self.block_start {
                self.fill(block_start)?;
            }

            buf[done..done + chunk]
                .copy_from_slice(&self.cache[block_offset..block_offset + chunk]);
            done += chunk;
            logical += chunk;
        }
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), AccessorError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut logical = self.check_range(address, data.len())?;

        let mut done = 0;
        while done < data.len() {
            let block_offset = logical % BLOCK_SIZE;
            let block_start = logical - block_offset;
            let chunk = (BLOCK_SIZE - block_offset).min(data.len() - done);

            if !self.valid || block_start != self.block_start {
                self.fill(block_start)?;
            }

            self.cache[block_offset..block_offset + chunk]
                .copy_from_slice(&data[done..done + chunk]);
            self.dirty = true;
            done += chunk;
            logical += chunk;
        }
        Ok(())
    }

    fn erase(&mut self, address: usize) -> Result<(), AccessorError> {
        // The flash changes underneath the cache; write back pending bytes
        // first, then invalidate.
        self.flush()?;
        self.valid = false;
        self.dirty = false;
        self.base.erase(address)
    }

    fn alignment(&self) -> usize {
        1
    }

    fn flash_memory_size(&self) -> usize {
        self.base.flash_memory_size()
    }

    fn flash_start_address(&self) -> usize {
        self.base.flash_start_address()
    }

    fn erase_block_size(&self) -> usize {
        self.base.erase_block_size()
    }

    fn format(&mut self) -> Result<(), AccessorError> {
        self.flush()?;
        self.valid = false;
        self.dirty = false;
        self.base.format()
    }
}

impl<A: StorageAccessor, const BLOCK_SIZE: usize> Drop for BufferedAccessor<A, BLOCK_SIZE> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!(?e, "failed to flush resident block in BufferedAccessor::drop");
        }
    }
}

//! RAM-backed mock medium.

use crate::error::AccessorError;
use crate::storage::StorageAccessor;

/// Vec-backed flash region with configurable geometry.
///
/// The default geometry (alignment 1, erase block 1) behaves like plain
/// memory; [`RamAccessor::with_geometry`] models page-aligned, block-erased
/// media for tests without involving a device driver. Erase fills the block
/// with `0xFF`, the erased state of real flash.
pub struct RamAccessor {
    flash_start: usize,
    alignment: usize,
    erase_block_size: usize,
    memory: Vec<u8>,
}

impl RamAccessor {
    /// Creates a byte-granular region of `size` bytes starting at
    /// `flash_start`.
    #[must_use]
    pub fn new(flash_start: usize, size: usize) -> Self {
        Self::with_geometry(flash_start, size, 1, 1)
    }

    /// Creates a region with explicit program alignment and erase-block
    /// size.
    #[must_use]
    pub fn with_geometry(
        flash_start: usize,
        size: usize,
        alignment: usize,
        erase_block_size: usize,
    ) -> Self {
        Self {
            flash_start,
            alignment: alignment.max(1),
            erase_block_size: erase_block_size.max(1),
            memory: vec![0xFF; size],
        }
    }

    /// Raw view of the backing memory.
    #[must_use]
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Mutable raw view, for corrupting bytes in tests.
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn offset_of(&self, address: usize, len: usize) -> Result<usize, AccessorError> {
        let offset = address
            .checked_sub(self.flash_start)
            .ok_or(AccessorError::OutOfBounds)?;
        if offset + len > self.memory.len() {
            return Err(AccessorError::OutOfBounds);
        }
        Ok(offset)
    }
}

impl StorageAccessor for RamAccessor {
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), AccessorError> {
        let offset = self.offset_of(address, buf.len())?;
        buf.copy_from_slice(&self.memory[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), AccessorError> {
        let offset = self.offset_of(address, data.len())?;
        self.memory[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, address: usize) -> Result<(), AccessorError> {
        let offset = self.offset_of(address, 0)?;
        if offset >= self.memory.len() {
            return Err(AccessorError::OutOfBounds);
        }
        let block_start = offset / self.erase_block_size * self.erase_block_size;
        let block_end = (block_start + self.erase_block_size).min(self.memory.len());
        self.memory[block_start..block_end].fill(0xFF);
        Ok(())
    }

    fn alignment(&self) -> usize {
        self.alignment
    }

    fn flash_memory_size(&self) -> usize {
        self.memory.len()
    }

    fn flash_start_address(&self) -> usize {
        self.flash_start
    }

    fn erase_block_size(&self) -> usize {
        self.erase_block_size
    }
}

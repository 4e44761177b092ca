//! File-backed flash image via memory mapping.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::MmapMut;
use tracing::error;

use crate::error::AccessorError;
use crate::storage::StorageAccessor;

/// Flash region persisted in a regular file.
///
/// Stands in for the real device on ground-test hardware: the file holds the
/// raw region contents, so a buffer written by one process run reconstructs
/// in the next. Erase fills the block with `0xFF` like real flash.
pub struct MmapAccessor {
    mmap: MmapMut,
    flash_start: usize,
    erase_block_size: usize,
}

impl MmapAccessor {
    /// Opens (or creates) `path` as a flash image of `size` bytes.
    ///
    /// A newly created image reads as all `0xFF`, matching a factory-erased
    /// part.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, sized or mapped.
    pub fn open<P: AsRef<Path>>(
        path: P,
        flash_start: usize,
        size: usize,
        erase_block_size: usize,
    ) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        let fresh = file.metadata()?.len() == 0;
        file.set_len(size as u64)?;

        // SAFETY: the file is open read+write and set_len() above guarantees
        // the mapped range is fully allocated.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        if fresh {
            mmap.fill(0xFF);
        }

        Ok(Self {
            mmap,
            flash_start,
            erase_block_size: erase_block_size.max(1),
        })
    }

    /// Flushes outstanding changes to the backing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush syscall fails.
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }

    fn offset_of(&self, address: usize, len: usize) -> Result<usize, AccessorError> {
        let offset = address
            .checked_sub(self.flash_start)
            .ok_or(AccessorError::OutOfBounds)?;
        if offset + len > self.mmap.len() {
            return Err(AccessorError::OutOfBounds);
        }
        Ok(offset)
    }
}

impl StorageAccessor for MmapAccessor {
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), AccessorError> {
        let offset = self.offset_of(address, buf.len())?;
        buf.copy_from_slice(&self.mmap[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), AccessorError> {
        let offset = self.offset_of(address, data.len())?;
        self.mmap[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, address: usize) -> Result<(), AccessorError> {
        let offset = self.offset_of(address, 0)?;
        if offset >= self.mmap.len() {
            return Err(AccessorError::OutOfBounds);
        }
        let block_start = offset / self.erase_block_size * self.erase_block_size;
        let block_end = (block_start + self.erase_block_size).min(self.mmap.len());
        self.mmap[block_start..block_end].fill(0xFF);
        Ok(())
    }

    fn alignment(&self) -> usize {
        1
    }

    fn flash_memory_size(&self) -> usize {
        self.mmap.len()
    }

    fn flash_start_address(&self) -> usize {
        self.flash_start
    }

    fn erase_block_size(&self) -> usize {
        self.erase_block_size
    }
}

impl Drop for MmapAccessor {
    fn drop(&mut self) {
        if let Err(e) = self.mmap.flush() {
            error!(?e, "failed to flush flash image in MmapAccessor::drop");
        }
    }
}

//! Block-addressable storage media.
//!
//! Everything above this module talks to flash through the
//! [`StorageAccessor`] trait: absolute addresses, explicit erase blocks, and
//! a declared write alignment. Implementations cover direct RAM
//! ([`RamAccessor`]), a file-backed flash image ([`MmapAccessor`]), a
//! page-programmed SPI NAND device ([`SpiNandAccessor`]) and the
//! write-coalescing [`BufferedAccessor`] that fronts page media.

mod buffered;
mod memory;
mod mmap;
mod nand;

pub use buffered::BufferedAccessor;
pub use memory::RamAccessor;
pub use mmap::MmapAccessor;
pub use nand::{SpiBus, SpiNandAccessor};

use crate::error::AccessorError;

/// Block-addressed access to a fixed flash region.
///
/// Addresses are absolute: the caller adds the region's start address.
/// `erase` always erases the whole erase block containing the address.
/// Implementations report their minimum program unit through `alignment`;
/// callers that stream unaligned writes must either respect it or wrap the
/// accessor in a [`BufferedAccessor`].
pub trait StorageAccessor {
    /// Reads `buf.len()` bytes starting at the absolute address.
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), AccessorError>;

    /// Writes `data` starting at the absolute address.
    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), AccessorError>;

    /// Erases the erase block containing the absolute address.
    fn erase(&mut self, address: usize) -> Result<(), AccessorError>;

    /// Minimum program unit in bytes (1 for RAM-like media).
    fn alignment(&self) -> usize;

    /// Size of the managed flash region in bytes.
    fn flash_memory_size(&self) -> usize;

    /// Absolute address where the managed region starts.
    fn flash_start_address(&self) -> usize;

    /// Erase granularity in bytes.
    fn erase_block_size(&self) -> usize;

    /// Erases the entire region, block by block.
    fn format(&mut self) -> Result<(), AccessorError> {
        let block = self.erase_block_size().max(1);
        let start = self.flash_start_address();
        let end = start + self.flash_memory_size();
        let mut address = start;
        while address < end {
            self.erase(address)?;
            address += block;
        }
        Ok(())
    }
}

/// A borrowed accessor is itself an accessor, so one medium can back several
/// consumers without giving up ownership.
impl<A: StorageAccessor + ?Sized> StorageAccessor for &mut A {
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), AccessorError> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), AccessorError> {
        (**self).write(address, data)
    }

    fn erase(&mut self, address: usize) -> Result<(), AccessorError> {
        (**self).erase(address)
    }

    fn alignment(&self) -> usize {
        (**self).alignment()
    }

    fn flash_memory_size(&self) -> usize {
        (**self).flash_memory_size()
    }

    fn flash_start_address(&self) -> usize {
        (**self).flash_start_address()
    }

    fn erase_block_size(&self) -> usize {
        (**self).erase_block_size()
    }

    fn format(&mut self) -> Result<(), AccessorError> {
        (**self).format()
    }
}

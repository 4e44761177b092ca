//! SPI NAND flash accessor for the 4 Gb payload store device.
//!
//! Drives the device through a byte-oriented [`SpiBus`] transport: commands
//! and data go out as plain byte strings, status and cache contents come
//! back on the same bus. The accessor exposes the data area only; the
//! 256-byte spare area per page is reserved for future ECC/bad-block
//! bookkeeping and never enters the logical address space.

use crate::error::AccessorError;
use crate::storage::StorageAccessor;

/// Byte-oriented SPI transport to the flash device.
///
/// Chip-select framing is the transport's business: each `write` or `read`
/// call is one bus transaction.
pub trait SpiBus {
    /// Sends `data` to the device.
    fn write(&mut self, data: &[u8]) -> Result<(), AccessorError>;
    /// Reads `buf.len()` bytes from the device.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), AccessorError>;
}

// Command opcodes (subset of the device command set)
const CMD_GET_FEATURE: u8 = 0x0F;
const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_PAGE_READ: u8 = 0x13;
const CMD_READ_FROM_CACHE: u8 = 0x03;
const CMD_PROGRAM_LOAD: u8 = 0x02;
const CMD_PROGRAM_EXECUTE: u8 = 0x10;
const CMD_BLOCK_ERASE: u8 = 0xD8;

/// Feature address of the status register.
const FEATURE_ADDR_STATUS: u8 = 0xC0;

// Status register bits
const STATUS_OIP: u8 = 0x01;
const STATUS_E_FAIL: u8 = 0x04;
const STATUS_P_FAIL: u8 = 0x08;

/// Status polls before an operation is declared hung.
const READY_POLL_LIMIT: u32 = 100_000;

// Device geometry (data area only; spare bytes never enter the logical
// address space)
const PAGE_SIZE: usize = 4096;
const SPARE_SIZE: usize = 256;
const PAGE_TOTAL_SIZE: usize = PAGE_SIZE + SPARE_SIZE;
const PAGES_PER_BLOCK: usize = 64;
const TOTAL_BLOCKS: usize = 2048;
const BLOCK_SIZE: usize = PAGE_SIZE * PAGES_PER_BLOCK;
const TOTAL_SIZE: usize = BLOCK_SIZE * TOTAL_BLOCKS;

/// Accessor for a 4 Gb SPI NAND device (4096 B pages + 256 B spare,
/// 64 pages per block, 2048 blocks).
pub struct SpiNandAccessor<T: SpiBus> {
    spi: T,
    flash_start: usize,
    page_scratch: Box<[u8; PAGE_TOTAL_SIZE]>,
}

impl<T: SpiBus> SpiNandAccessor<T> {
    /// Data bytes per page; also the program alignment.
    pub const PAGE_SIZE: usize = PAGE_SIZE;
    /// Pages per erase block.
    pub const PAGES_PER_BLOCK: usize = PAGES_PER_BLOCK;
    /// Erase blocks on the device.
    pub const TOTAL_BLOCKS: usize = TOTAL_BLOCKS;
    /// Data bytes per erase block.
    pub const BLOCK_SIZE: usize = BLOCK_SIZE;
    /// Data bytes on the device.
    pub const TOTAL_SIZE: usize = TOTAL_SIZE;

    /// Creates an accessor over `spi` with the region based at
    /// `flash_start`.
    pub fn new(spi: T, flash_start: usize) -> Self {
        Self {
            spi,
            flash_start,
            page_scratch: Box::new([0xFF; PAGE_TOTAL_SIZE]),
        }
    }

    fn offset_of(&self, address: usize, len: usize) -> Result<usize, AccessorError> {
        let offset = address
            .checked_sub(self.flash_start)
            .ok_or(AccessorError::OutOfBounds)?;
        if offset + len > Self::TOTAL_SIZE {
            return Err(AccessorError::OutOfBounds);
        }
        Ok(offset)
    }

    // 3-byte row address: row = block * 64 + page_in_block
    fn row_address(block: usize, page_in_block: usize) -> [u8; 3] {
        let row = (block * Self::PAGES_PER_BLOCK + page_in_block) as u32;
        [
            ((row >> 16) & 0xFF) as u8,
            ((row >> 8) & 0xFF) as u8,
            (row & 0xFF) as u8,
        ]
    }

    fn write_enable(&mut self) -> Result<(), AccessorError> {
        self.spi.write(&[CMD_WRITE_ENABLE])
    }

    fn read_status(&mut self) -> Result<u8, AccessorError> {
        self.spi.write(&[CMD_GET_FEATURE, FEATURE_ADDR_STATUS])?;
        let mut status = [0u8];
        self.spi.read(&mut status)?;
        Ok(status[0])
    }

    fn wait_ready(&mut self) -> Result<u8, AccessorError> {
        for _ in 0..READY_POLL_LIMIT {
            let status = self.read_status()?;
            if status & STATUS_OIP == 0 {
                return Ok(status);
            }
        }
        Err(AccessorError::Generic)
    }

    // array -> cache -> scratch buffer
    fn read_page(&mut self, block: usize, page_in_block: usize) -> Result<(), AccessorError> {
        let row = Self::row_address(block, page_in_block);
        self.spi
            .write(&[CMD_PAGE_READ, row[0], row[1], row[2]])?;
        self.wait_ready()?;

        // column 0, plus one dummy byte before data shifts out
        self.spi.write(&[CMD_READ_FROM_CACHE, 0x00, 0x00, 0x00])?;
        self.spi.read(self.page_scratch.as_mut_slice())
    }

    // scratch buffer -> cache -> array; the target page must be erased
    fn program_page(&mut self, block: usize, page_in_block: usize) -> Result<(), AccessorError> {
        let row = Self::row_address(block, page_in_block);

        self.write_enable()?;
        self.spi.write(&[CMD_PROGRAM_LOAD, 0x00, 0x00])?;
        self.spi.write(self.page_scratch.as_slice())?;
        self.spi
            .write(&[CMD_PROGRAM_EXECUTE, row[0], row[1], row[2]])?;

        let status = self.wait_ready()?;
        if status & STATUS_P_FAIL != 0 {
            return Err(AccessorError::Write);
        }
        Ok(())
    }

    fn erase_block(&mut self, block: usize) -> Result<(), AccessorError> {
        let row = Self::row_address(block, 0);

        self.write_enable()?;
        self.spi
            .write(&[CMD_BLOCK_ERASE, row[0], row[1], row[2]])?;

        let status = self.wait_ready()?;
        if status & STATUS_E_FAIL != 0 {
            return Err(AccessorError::Write);
        }
        Ok(())
    }
}

impl<T: SpiBus> StorageAccessor for SpiNandAccessor<T> {
    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), AccessorError> {
        let mut offset = self.offset_of(address, buf.len())?;

        let mut done = 0;
        while done < buf.len() {
            let page_index = offset / Self::PAGE_SIZE;
            let column = offset % Self::PAGE_SIZE;
            let block = page_index / Self::PAGES_PER_BLOCK;
            let page_in_block = page_index % Self::PAGES_PER_BLOCK;
            let chunk = (Self::PAGE_SIZE - column).min(buf.len() - done);

            if self.read_page(block, page_in_block).is_err() {
                return Err(AccessorError::Read);
            }
            buf[done..done + chunk].copy_from_slice(&self.page_scratch[column..column + chunk]);

            offset += chunk;
            done += chunk;
        }
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), AccessorError> {
        let mut offset = self.offset_of(address, data.len())?;

        let mut done = 0;
        while done < data.len() {
            let page_index = offset / Self::PAGE_SIZE;
            let column = offset % Self::PAGE_SIZE;
            let block = page_index / Self::PAGES_PER_BLOCK;
            let page_in_block = page_index % Self::PAGES_PER_BLOCK;
            let chunk = (Self::PAGE_SIZE - column).min(data.len() - done);

            // Program the full page with 0xFF filler around the chunk;
            // 0xFF cells stay erased, so untouched bytes keep their state.
            self.page_scratch.fill(0xFF);
            self.page_scratch[column..column + chunk].copy_from_slice(&data[done..done + chunk]);
            self.program_page(block, page_in_block)?;

            offset += chunk;
            done += chunk;
        }
        Ok(())
    }

    fn erase(&mut self, address: usize) -> Result<(), AccessorError> {
        let offset = self.offset_of(address, 0)?;
        if offset >= Self::TOTAL_SIZE {
            return Err(AccessorError::OutOfBounds);
        }
        self.erase_block(offset / Self::BLOCK_SIZE)
    }

    fn alignment(&self) -> usize {
        Self::PAGE_SIZE
    }

    fn flash_memory_size(&self) -> usize {
        Self::TOTAL_SIZE
    }

    fn flash_start_address(&self) -> usize {
        self.flash_start
    }

    fn erase_block_size(&self) -> usize {
        Self::BLOCK_SIZE
    }
}

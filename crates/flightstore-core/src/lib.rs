//! # flightstore core
//!
//! Persistent image storage and chunked file transfer for small-satellite
//! payloads.
//!
//! The crate is built around a wrap-around, CRC-protected ring buffer that
//! lives on an abstract block-addressable medium (RAM mock, file-backed
//! image, or a SPI NAND device) and survives arbitrary power loss: on boot it
//! rescans the medium and reconstructs its logical state from physical
//! evidence alone. On top of the buffer sit a resumable byte stream adapter
//! and a pair of cooperative state machines that drain or fill the stream
//! over a point-to-point request/response bus, 256 bytes per chunk.
//!
//! ## Features
//!
//! - **Power-loss safe**: entries become observable only when pushed;
//!   `initialize_from_flash` commits the longest validated prefix
//! - **Integrity**: CRC-32 over header, metadata and payload, checked on
//!   every read path
//! - **Media-agnostic**: one `StorageAccessor` trait covers RAM, mmap'd
//!   files, and page-programmed SPI NAND behind a block cache
//! - **Cooperative**: no threads, no locks; every state machine advances by
//!   at most one request and one response per tick
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use flightstore_core::ring::{ImageMetadata, ImageRingBuffer, Producer};
//! use flightstore_core::storage::RamAccessor;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut flash = RamAccessor::new(0, 64 * 1024);
//!     let mut ring = ImageRingBuffer::new(&mut flash);
//!     ring.initialize_from_flash()?;
//!
//!     let mut meta = ImageMetadata::new(Producer::Camera1);
//!     meta.timestamp = 1_700_000_000;
//!     meta.payload_size = 4;
//!
//!     ring.add_image(&meta)?;
//!     ring.add_data_chunk(&[0xDE, 0xAD, 0xBE, 0xEF])?;
//!     ring.push_image()?;
//!     assert_eq!(ring.count(), 1);
//!     # Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod checksum;
pub mod config;
#[cfg(test)]
mod config_tests;
pub mod error;
pub mod ring;
pub mod storage;
pub mod stream;
pub mod transfer;

pub use checksum::{Checksum, Crc32};
pub use config::{RingConfig, StoreConfig, TransferConfig};
pub use error::{AccessorError, ConfigError, RingError, TransferError, WireError};
pub use ring::{ImageMetadata, ImageRingBuffer, Producer, RingState, StorageHeader};
pub use storage::{
    BufferedAccessor, MmapAccessor, RamAccessor, SpiBus, SpiNandAccessor, StorageAccessor,
};
pub use stream::{ImageInputStream, ImageStore, InputStream, OutputStream, StreamName};
pub use transfer::{ReaderClient, RpcBus, WriterClient};

//! Error taxonomy for the storage and transfer layers.
//!
//! Each layer owns one enum: the medium (`AccessorError`), the ring buffer
//! and the streams above it (`RingError`), the RPC frame codec (`WireError`)
//! and the transfer state machines (`TransferError`). Medium failures surface
//! through the ring buffer unchanged as read or write errors; integrity and
//! structural failures are never retried automatically.

use thiserror::Error;

/// Errors reported by a [`StorageAccessor`](crate::storage::StorageAccessor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessorError {
    /// A program or erase operation failed on the medium.
    #[error("write to the medium failed")]
    Write,
    /// A read operation failed on the medium.
    #[error("read from the medium failed")]
    Read,
    /// The access falls outside the reserved flash region.
    #[error("access outside the flash region")]
    OutOfBounds,
    /// The underlying transport failed (SPI timeout, bus fault).
    #[error("medium transport failure")]
    Generic,
}

/// Errors reported by the image ring buffer and the streams built on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// A write to the backing medium failed.
    #[error("write to the backing medium failed")]
    Write,
    /// A read from the backing medium failed.
    #[error("read from the backing medium failed")]
    Read,
    /// Ring I/O was requested outside the buffer capacity.
    #[error("ring I/O outside the buffer capacity")]
    OutOfBounds,
    /// A header, metadata or payload CRC did not verify.
    #[error("checksum mismatch")]
    Checksum,
    /// The buffer holds no entry to consume. Normal flow control, not a bug.
    #[error("the buffer is empty")]
    EmptyBuffer,
    /// The entry does not fit in the remaining free space. Normal flow
    /// control, not a bug.
    #[error("the buffer is full")]
    FullBuffer,
    /// Size fields contradict each other or the buffer geometry.
    #[error("structural contradiction in stored data")]
    Data,
}

/// Errors from loading or validating a [`StoreConfig`](crate::StoreConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error(transparent)]
    Extract(#[from] figment::Error),
    /// A field value fails a semantic check.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from encoding or decoding RPC frame payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// The payload ends before the declared content.
    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required to finish decoding.
        need: usize,
        /// Bytes actually present.
        have: usize,
    },
    /// The path field exceeds the fixed 19-byte name length.
    #[error("path length {0} exceeds the 19-byte limit")]
    PathTooLong(usize),
    /// The data field exceeds the 256-byte protocol chunk cap.
    #[error("data length {0} exceeds the 256-byte chunk cap")]
    DataTooLong(usize),
}

/// Errors from the chunked-transfer state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The bus refused to accept an outgoing frame.
    #[error("transport rejected the outgoing frame")]
    Bus,
    /// A frame payload failed to encode or decode.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The local stream backing the transfer failed.
    #[error("stream failure: {0}")]
    Stream(#[from] RingError),
}

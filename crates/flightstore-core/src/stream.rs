//! Byte-stream adapters between image buffers and the transfer layer.
//!
//! An [`ImageInputStream`] turns a one-image-at-a-time buffer into a
//! resumable byte source: metadata first, then payload, then an empty chunk
//! as the end-of-stream sentinel that pops the image. [`OutputStream`] is
//! the receiving mirror. Streams are identified by a fixed 19-character
//! hex-ASCII [`StreamName`] stamped verbatim into the RPC path field.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::checksum::Checksum;
use crate::error::RingError;
use crate::ring::{ImageMetadata, ImageRingBuffer};
use crate::storage::StorageAccessor;

/// Length of a stream name in bytes.
pub const NAME_LENGTH: usize = 19;

/// Fixed-width logical name of an image stream.
///
/// Sixteen hex characters of the timestamp (least significant nibble
/// first), an underscore, and two hex characters of the producer (least
/// significant nibble first). The fixed width lets the RPC path field be
/// stamped without bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamName([u8; NAME_LENGTH]);

impl StreamName {
    /// The raw 19 bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NAME_LENGTH] {
        &self.0
    }

    /// Builds a name from a wire path, truncating past 19 bytes and
    /// zero-padding short ones.
    #[must_use]
    pub fn from_path(path: &[u8]) -> Self {
        let mut out = [0u8; NAME_LENGTH];
        let n = path.len().min(NAME_LENGTH);
        out[..n].copy_from_slice(&path[..n]);
        Self(out)
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // always hex-ASCII plus '_'
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Renders `(timestamp, producer)` into the fixed 19-byte name.
#[must_use]
pub fn format_name(timestamp: u64, producer: u8) -> StreamName {
    const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = [b'0'; NAME_LENGTH];
    out[16] = b'_';

    let mut value = timestamp;
    for slot in &mut out[..16] {
        *slot = HEX_DIGITS[(value & 0x0F) as usize];
        value >>= 4;
    }

    let mut value = producer;
    for slot in &mut out[17..] {
        *slot = HEX_DIGITS[(value & 0x0F) as usize];
        value >>= 4;
    }
    StreamName(out)
}

/// Producer/consumer surface of an image buffer.
///
/// Implemented by the persistent [`ImageRingBuffer`], the in-memory
/// [`SingleImageBuffer`] and the discarding [`NullImageBuffer`], so sensor
/// tasks and streams can be wired to any of them.
pub trait ImageStore {
    /// True when no image is stored.
    fn is_empty(&self) -> bool;
    /// Starts a new image described by `meta`.
    fn add_image(&mut self, meta: &ImageMetadata) -> Result<(), RingError>;
    /// Appends payload bytes to the image being added.
    fn add_data_chunk(&mut self, data: &[u8]) -> Result<(), RingError>;
    /// Seals the image being added.
    fn push_image(&mut self) -> Result<(), RingError>;
    /// Opens the oldest image for reading.
    fn get_image(&mut self) -> Result<ImageMetadata, RingError>;
    /// Reads payload bytes in order; returns the number read.
    fn get_data_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RingError>;
    /// Discards the image opened by `get_image`.
    fn pop_image(&mut self) -> Result<(), RingError>;
}

impl<A: StorageAccessor, C: Checksum> ImageStore for ImageRingBuffer<A, C> {
    fn is_empty(&self) -> bool {
        ImageRingBuffer::is_empty(self)
    }

    fn add_image(&mut self, meta: &ImageMetadata) -> Result<(), RingError> {
        ImageRingBuffer::add_image(self, meta)
    }

    fn add_data_chunk(&mut self, data: &[u8]) -> Result<(), RingError> {
        ImageRingBuffer::add_data_chunk(self, data)
    }

    fn push_image(&mut self) -> Result<(), RingError> {
        ImageRingBuffer::push_image(self)
    }

    fn get_image(&mut self) -> Result<ImageMetadata, RingError> {
        ImageRingBuffer::get_image(self)
    }

    fn get_data_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RingError> {
        ImageRingBuffer::get_data_chunk(self, buf)
    }

    fn pop_image(&mut self) -> Result<(), RingError> {
        ImageRingBuffer::pop_image(self)
    }
}

/// One-slot in-memory image buffer.
///
/// The cheap backing store for sensors that never persist: one image at a
/// time, held on the heap until a consumer drains it.
#[derive(Default)]
pub struct SingleImageBuffer {
    slot: Option<ImageMetadata>,
    sealed: bool,
    payload: Vec<u8>,
    read_offset: usize,
}

impl SingleImageBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageStore for SingleImageBuffer {
    fn is_empty(&self) -> bool {
        !self.sealed
    }

    fn add_image(&mut self, meta: &ImageMetadata) -> Result<(), RingError> {
        if self.sealed {
            return Err(RingError::FullBuffer);
        }
        self.slot = Some(meta.clone());
        self.payload.clear();
        self.read_offset = 0;
        Ok(())
    }

    fn add_data_chunk(&mut self, data: &[u8]) -> Result<(), RingError> {
        if self.sealed {
            return Err(RingError::FullBuffer);
        }
        self.payload.extend_from_slice(data);
        Ok(())
    }

    fn push_image(&mut self) -> Result<(), RingError> {
        if self.slot.is_none() {
            return Err(RingError::EmptyBuffer);
        }
        self.sealed = true;
        Ok(())
    }

    fn get_image(&mut self) -> Result<ImageMetadata, RingError> {
        if !self.sealed {
            return Err(RingError::EmptyBuffer);
        }
        self.read_offset = 0;
        self.slot.clone().ok_or(RingError::EmptyBuffer)
    }

    fn get_data_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RingError> {
        if !self.sealed {
            return Err(RingError::EmptyBuffer);
        }
        let n = buf.len().min(self.payload.len() - self.read_offset);
        buf[..n].copy_from_slice(&self.payload[self.read_offset..self.read_offset + n]);
        self.read_offset += n;
        Ok(n)
    }

    fn pop_image(&mut self) -> Result<(), RingError> {
        if !self.sealed {
            return Err(RingError::EmptyBuffer);
        }
        self.slot = None;
        self.sealed = false;
        self.payload.clear();
        self.read_offset = 0;
        Ok(())
    }
}

/// Image sink that behaves like `/dev/null`: all writes succeed, nothing is
/// stored, reads always report empty.
#[derive(Debug, Default)]
pub struct NullImageBuffer;

impl ImageStore for NullImageBuffer {
    fn is_empty(&self) -> bool {
        true
    }

    fn add_image(&mut self, meta: &ImageMetadata) -> Result<(), RingError> {
        debug!(
            timestamp = meta.timestamp,
            payload_size = meta.payload_size,
            producer = ?meta.producer,
            "NullImageBuffer: add_image"
        );
        Ok(())
    }

    fn add_data_chunk(&mut self, _data: &[u8]) -> Result<(), RingError> {
        Ok(())
    }

    fn push_image(&mut self) -> Result<(), RingError> {
        Ok(())
    }

    fn get_image(&mut self) -> Result<ImageMetadata, RingError> {
        Err(RingError::EmptyBuffer)
    }

    fn get_data_chunk(&mut self, _buf: &mut [u8]) -> Result<usize, RingError> {
        Err(RingError::EmptyBuffer)
    }

    fn pop_image(&mut self) -> Result<(), RingError> {
        Err(RingError::EmptyBuffer)
    }
}

/// Resumable byte source driven by the writer client.
///
/// `initialize` must be the first call per image and yields the metadata
/// bytes; `get_chunk` then streams the payload in order. An empty-buffer
/// `get_chunk` call is the end-of-stream sentinel: it finalizes the stream,
/// popping the underlying image. Single-use per image, not restartable.
pub trait InputStream {
    /// True when no image is waiting.
    fn is_empty(&self) -> bool;
    /// Fetches the image's metadata into `buf`; returns the byte count.
    fn initialize(&mut self, buf: &mut [u8]) -> Result<usize, RingError>;
    /// Total logical stream length (metadata plus payload).
    fn size(&self) -> usize;
    /// Stable handle for the stream.
    fn name(&self) -> StreamName;
    /// Streams the next bytes; an empty `buf` finalizes instead.
    fn get_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RingError>;
    /// Pops the underlying image.
    fn finalize(&mut self) -> Result<(), RingError>;
}

/// [`InputStream`] over any [`ImageStore`].
pub struct ImageInputStream<B: ImageStore> {
    buffer: B,
    size: usize,
    name: StreamName,
}

impl<B: ImageStore> ImageInputStream<B> {
    /// Wraps `buffer`; no image is opened until `initialize`.
    pub fn new(buffer: B) -> Self {
        Self {
            buffer,
            size: 0,
            name: StreamName::default(),
        }
    }
}

impl<B: ImageStore> InputStream for ImageInputStream<B> {
    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn initialize(&mut self, buf: &mut [u8]) -> Result<usize, RingError> {
        if buf.len() < ImageMetadata::SIZE {
            return Err(RingError::OutOfBounds);
        }
        let meta = self.buffer.get_image()?;
        self.size = ImageMetadata::SIZE + meta.payload_size as usize;
        self.name = format_name(u64::from(meta.timestamp), meta.producer as u8);
        buf[..ImageMetadata::SIZE].copy_from_slice(&meta.encode());
        Ok(ImageMetadata::SIZE)
    }

    fn size(&self) -> usize {
        self.size
    }

    fn name(&self) -> StreamName {
        self.name
    }

    fn get_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RingError> {
        if buf.is_empty() {
            self.finalize()?;
            return Ok(0);
        }
        self.buffer.get_data_chunk(buf)
    }

    fn finalize(&mut self) -> Result<(), RingError> {
        self.buffer.pop_image()
    }
}

/// Local sink the reader client and write responder feed.
pub trait OutputStream {
    /// Opens the sink for a stream called `name`.
    fn initialize(&mut self, name: &StreamName) -> Result<(), RingError>;
    /// Appends bytes to the sink.
    fn output(&mut self, data: &[u8]) -> Result<(), RingError>;
    /// Closes the stream.
    fn finalize(&mut self) -> Result<(), RingError>;
}

/// Collects stream bytes in memory; handy for tests and staging.
#[derive(Debug, Default)]
pub struct VecOutputStream {
    /// Name passed to the last `initialize`.
    pub name: Option<StreamName>,
    /// Everything written so far.
    pub data: Vec<u8>,
    /// Number of completed `finalize` calls.
    pub finalized: usize,
}

impl OutputStream for VecOutputStream {
    fn initialize(&mut self, name: &StreamName) -> Result<(), RingError> {
        self.name = Some(*name);
        self.data.clear();
        Ok(())
    }

    fn output(&mut self, data: &[u8]) -> Result<(), RingError> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), RingError> {
        self.finalized += 1;
        Ok(())
    }
}

/// Writes each stream to a file named after it inside a base directory.
pub struct FileOutputStream {
    base: PathBuf,
    file: Option<File>,
}

impl FileOutputStream {
    /// Streams will be created under `base`.
    #[must_use]
    pub fn new(base: PathBuf) -> Self {
        Self { base, file: None }
    }
}

impl OutputStream for FileOutputStream {
    fn initialize(&mut self, name: &StreamName) -> Result<(), RingError> {
        let path = self.base.join(name.to_string());
        match File::create(path) {
            Ok(file) => {
                self.file = Some(file);
                Ok(())
            }
            Err(_) => Err(RingError::Write),
        }
    }

    fn output(&mut self, data: &[u8]) -> Result<(), RingError> {
        match self.file.as_mut() {
            Some(file) => file.write_all(data).map_err(|_| RingError::Write),
            None => Err(RingError::Write),
        }
    }

    fn finalize(&mut self) -> Result<(), RingError> {
        // closing the handle flushes it
        self.file = None;
        Ok(())
    }
}

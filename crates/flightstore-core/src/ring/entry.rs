//! On-medium entry framing: storage header, image metadata, constants.
//!
//! Every entry is laid out as
//! `[StorageHeader | ImageMetadata | payload | crc32]`, little-endian and
//! packed. The codecs here hand-pack the two fixed-size records; CRC values
//! are computed and verified by the ring buffer over the encoded bytes.

use crate::error::RingError;

/// Magic value identifying a storage header (`'RCRD'`).
pub const STORAGE_MAGIC: u32 = (b'R' as u32) << 24 | (b'C' as u32) << 16 | (b'R' as u32) << 8 | b'D' as u32;

/// Current storage header format version.
pub const STORAGE_HEADER_VERSION: u16 = 1;

/// Current image metadata format version.
pub const METADATA_VERSION: u16 = 1;

/// Bytes of the trailing payload CRC tag.
pub const CRC_TAG_SIZE: usize = 4;

/// Semantic source of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Producer {
    /// Primary visible-light camera.
    Camera1 = 0,
    /// Secondary visible-light camera.
    Camera2 = 1,
    /// Tertiary visible-light camera.
    Camera3 = 2,
    /// Thermal imaging array.
    Thermal = 3,
}

impl TryFrom<u8> for Producer {
    type Error = RingError;

    fn try_from(value: u8) -> Result<Self, RingError> {
        match value {
            0 => Ok(Self::Camera1),
            1 => Ok(Self::Camera2),
            2 => Ok(Self::Camera3),
            3 => Ok(Self::Thermal),
            _ => Err(RingError::Data),
        }
    }
}

/// Fixed-size framing record preceding every entry on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHeader {
    /// Must equal [`STORAGE_MAGIC`].
    pub magic: u32,
    /// Format version, [`STORAGE_HEADER_VERSION`].
    pub version: u16,
    /// Header size at creation time.
    pub header_size: u16,
    /// Monotonic id stamped at append time; ground truth for boot ordering.
    pub sequence_id: u32,
    /// Bytes following the header: metadata + payload + trailing CRC.
    pub total_size: u32,
    /// Reserved for entry state flags.
    pub flags: u32,
    /// Reserved for future expansion.
    pub reserved: [u8; 16],
    /// CRC-32 over all preceding header bytes.
    pub header_crc: u32,
}

impl StorageHeader {
    /// Encoded size on the medium.
    pub const SIZE: usize = 40;
    /// Offset of `header_crc` in the encoded form.
    pub const CRC_OFFSET: usize = 36;

    /// Packs the header into its on-medium form.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.header_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.sequence_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.total_size.to_le_bytes());
        out[16..20].copy_from_slice(&self.flags.to_le_bytes());
        out[20..36].copy_from_slice(&self.reserved);
        out[36..40].copy_from_slice(&self.header_crc.to_le_bytes());
        out
    }

    /// Unpacks a header from its on-medium form. Field validation (magic,
    /// CRC) is the caller's business.
    #[must_use]
    pub fn decode(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            version: u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
            header_size: u16::from_le_bytes(bytes[6..8].try_into().unwrap()),
            sequence_id: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            total_size: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            flags: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            reserved: bytes[20..36].try_into().unwrap(),
            header_crc: u32::from_le_bytes(bytes[36..40].try_into().unwrap()),
        }
    }
}

/// Semantic image record: what producers and consumers care about.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    /// Format version, [`METADATA_VERSION`].
    pub version: u16,
    /// Metadata size at creation time.
    pub metadata_size: u16,
    /// Capture time, seconds since epoch.
    pub timestamp: u32,
    /// Payload length in bytes.
    pub payload_size: u32,
    /// Sub-satellite latitude at capture, degrees.
    pub latitude: f32,
    /// Sub-satellite longitude at capture, degrees.
    pub longitude: f32,
    /// Which instrument produced the image.
    pub producer: Producer,
    /// Reserved for future expansion.
    pub reserved: [u8; 8],
    /// CRC-32 over all preceding metadata bytes.
    pub meta_crc: u32,
}

impl ImageMetadata {
    /// Encoded size on the medium.
    pub const SIZE: usize = 33;
    /// Offset of `meta_crc` in the encoded form.
    pub const CRC_OFFSET: usize = 29;

    /// Creates a zeroed record for `producer` with current format stamps.
    #[must_use]
    pub fn new(producer: Producer) -> Self {
        Self {
            version: METADATA_VERSION,
            metadata_size: Self::SIZE as u16,
            timestamp: 0,
            payload_size: 0,
            latitude: 0.0,
            longitude: 0.0,
            producer,
            reserved: [0; 8],
            meta_crc: 0,
        }
    }

    /// Packs the record into its on-medium form.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.version.to_le_bytes());
        out[2..4].copy_from_slice(&self.metadata_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.latitude.to_le_bytes());
        out[16..20].copy_from_slice(&self.longitude.to_le_bytes());
        out[20] = self.producer as u8;
        out[21..29].copy_from_slice(&self.reserved);
        out[29..33].copy_from_slice(&self.meta_crc.to_le_bytes());
        out
    }

    /// Unpacks a record from its on-medium form.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Data`] for an unknown producer discriminant.
    pub fn decode(bytes: &[u8; Self::SIZE]) -> Result<Self, RingError> {
        Ok(Self {
            version: u16::from_le_bytes(bytes[0..2].try_into().unwrap()),
            metadata_size: u16::from_le_bytes(bytes[2..4].try_into().unwrap()),
            timestamp: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            payload_size: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            latitude: f32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            longitude: f32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            producer: Producer::try_from(bytes[20])?,
            reserved: bytes[21..29].try_into().unwrap(),
            meta_crc: u32::from_le_bytes(bytes[29..33].try_into().unwrap()),
        })
    }
}

/// Cursor for the entry currently streaming in or out.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EntryState {
    /// Ring offset of the next byte to transfer.
    pub offset: usize,
    /// Declared size of the whole entry, header included.
    pub entry_size: usize,
    /// Bytes transferred so far.
    pub consumed: usize,
    /// Declared payload length.
    pub payload_size: usize,
}

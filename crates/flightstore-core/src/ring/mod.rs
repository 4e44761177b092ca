//! Persistent, CRC-protected image ring buffer.
//!
//! Entries are framed as `[StorageHeader | ImageMetadata | payload | crc32]`
//! and stored contiguously (modulo ring wrap) on a block-addressable medium.
//! Appends and consumes are resumable: an image is streamed in with
//! `add_image` / `add_data_chunk` / `push_image` and out with `get_image` /
//! `get_data_chunk` / `pop_image`. Nothing becomes observable before
//! `push_image` succeeds, so a power cut mid-append costs at most the entry
//! being written.
//!
//! On boot, [`ImageRingBuffer::initialize_from_flash`] rebuilds head, tail,
//! size, count and the next sequence id purely from physical evidence,
//! committing only the longest validated, sequence-contiguous prefix.

mod entry;
mod state;
#[cfg(test)]
mod tests;

pub use entry::{
    ImageMetadata, Producer, StorageHeader, CRC_TAG_SIZE, METADATA_VERSION, STORAGE_HEADER_VERSION,
    STORAGE_MAGIC,
};
pub use state::RingState;

use tracing::{debug, warn};

use crate::checksum::{Checksum, Crc32};
use crate::error::RingError;
use crate::storage::StorageAccessor;
use entry::EntryState;

/// Scratch size for streaming payloads during entry validation.
const VALIDATE_CHUNK: usize = 64;

/// Wrap-aware, CRC-protected ring buffer of image entries.
///
/// Generic over the storage medium and the checksum engine. The buffer
/// borrows the accessor's geometry at construction: capacity is the
/// accessor's region size and every ring offset is translated by its start
/// address.
///
/// One entry may be streamed in and one streamed out at a time; the caller
/// must finish (or abandon) an `add_image` cycle before starting the next,
/// and likewise for reads.
pub struct ImageRingBuffer<A: StorageAccessor, C: Checksum = Crc32> {
    state: RingState,
    accessor: A,
    checksum: C,
    next_sequence_id: u32,
    write_state: EntryState,
    read_state: EntryState,
}

impl<A: StorageAccessor> ImageRingBuffer<A, Crc32> {
    /// Creates a buffer with the CRC-32 engine over the accessor's whole
    /// flash region. The logical state starts empty; call
    /// [`initialize_from_flash`](Self::initialize_from_flash) to adopt
    /// entries already on the medium.
    pub fn new(accessor: A) -> Self {
        Self::with_checksum(accessor)
    }
}

impl<A: StorageAccessor, C: Checksum> ImageRingBuffer<A, C> {
    /// Creates a buffer with an explicit checksum engine.
    pub fn with_checksum(accessor: A) -> Self {
        let state = RingState::new(accessor.flash_start_address(), accessor.flash_memory_size());
        Self {
            state,
            accessor,
            checksum: C::default(),
            next_sequence_id: 0,
            write_state: EntryState::default(),
            read_state: EntryState::default(),
        }
    }

    /// True when no entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Bytes in use, alignment padding included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.size()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.state.count()
    }

    /// Free bytes.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.available()
    }

    /// Capacity of the reserved region.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.capacity()
    }

    /// Ring offset of the oldest entry.
    #[must_use]
    pub fn head(&self) -> usize {
        self.state.head()
    }

    /// Ring offset of the next append.
    #[must_use]
    pub fn tail(&self) -> usize {
        self.state.tail()
    }

    #[cfg(test)]
    pub(crate) fn set_tail_for_test(&mut self, tail: usize) {
        self.state.tail = tail;
        self.state.head = tail;
    }

    // ------------------------------------------------------------------
    // Append path
    // ------------------------------------------------------------------

    /// Starts a new entry: writes the storage header and the stamped
    /// metadata record at the aligned tail, then leaves the payload checksum
    /// engine reset and the write cursor at the first payload byte.
    ///
    /// Nothing is committed until [`push_image`](Self::push_image); on error
    /// the logical state is unchanged and any bytes already written are
    /// abandoned scratch.
    pub fn add_image(&mut self, meta: &ImageMetadata) -> Result<(), RingError> {
        let cap = self.state.capacity();
        let total = StorageHeader::SIZE
            + ImageMetadata::SIZE
            + meta.payload_size as usize
            + CRC_TAG_SIZE;

        if self.state.available() < total {
            return Err(RingError::FullBuffer);
        }

        let tail = self.state.tail();
        let mut aligned_tail = self.align_up(tail);
        if aligned_tail >= cap {
            aligned_tail -= cap;
        }
        if self.state.available_from(aligned_tail) < total {
            return Err(RingError::FullBuffer);
        }
        let padding = if aligned_tail >= tail {
            aligned_tail - tail
        } else {
            cap - tail + aligned_tail
        };

        let mut st = EntryState {
            offset: aligned_tail,
            entry_size: total,
            consumed: 0,
            payload_size: meta.payload_size as usize,
        };

        let header = StorageHeader {
            magic: STORAGE_MAGIC,
            version: STORAGE_HEADER_VERSION,
            header_size: StorageHeader::SIZE as u16,
            sequence_id: self.next_sequence_id,
            total_size: (total - StorageHeader::SIZE) as u32,
            flags: 0,
            reserved: [0; 16],
            header_crc: 0,
        };
        let mut header_bytes = header.encode();
        self.write_record(&mut st, &mut header_bytes, StorageHeader::CRC_OFFSET)?;

        let mut stamped = meta.clone();
        stamped.version = METADATA_VERSION;
        stamped.metadata_size = ImageMetadata::SIZE as u16;
        let mut meta_bytes = stamped.encode();
        self.write_record(&mut st, &mut meta_bytes, ImageMetadata::CRC_OFFSET)?;

        // Both records are on the medium; commit the aligned tail and claim
        // the padding so the used region stays contiguous.
        self.next_sequence_id = self.next_sequence_id.wrapping_add(1);
        self.state.tail = aligned_tail;
        self.state.size += padding;
        self.write_state = st;
        self.checksum.reset();
        Ok(())
    }

    /// Streams payload bytes into the entry opened by
    /// [`add_image`](Self::add_image), folding them into the payload
    /// checksum. Does not touch the logical state.
    pub fn add_data_chunk(&mut self, data: &[u8]) -> Result<(), RingError> {
        let mut st = self.write_state;
        self.ring_write(&mut st, data, true)?;
        self.write_state = st;
        Ok(())
    }

    /// Seals the entry: writes the trailing payload CRC, then commits size,
    /// tail and count in one step.
    pub fn push_image(&mut self) -> Result<(), RingError> {
        let tag = self.checksum.get().to_le_bytes();
        let mut st = self.write_state;
        self.ring_write(&mut st, &tag, false)?;
        self.write_state = st;

        self.state.size += st.entry_size;
        self.state.tail = st.offset;
        self.state.count += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Consume path
    // ------------------------------------------------------------------

    /// Opens the oldest entry: validates header and metadata CRCs, resets
    /// the payload checksum and positions the read cursor at the first
    /// payload byte.
    pub fn get_image(&mut self) -> Result<ImageMetadata, RingError> {
        if self.state.is_empty() {
            return Err(RingError::EmptyBuffer);
        }

        let mut st = EntryState {
            offset: self.state.head(),
            ..EntryState::default()
        };

        let mut header_bytes = [0u8; StorageHeader::SIZE];
        self.read_record(&mut st, &mut header_bytes, StorageHeader::CRC_OFFSET)?;
        let header = StorageHeader::decode(&header_bytes);
        if header.magic != STORAGE_MAGIC {
            return Err(RingError::Data);
        }
        st.entry_size = StorageHeader::SIZE + header.total_size as usize;

        let mut meta_bytes = [0u8; ImageMetadata::SIZE];
        self.read_record(&mut st, &mut meta_bytes, ImageMetadata::CRC_OFFSET)?;
        let meta = ImageMetadata::decode(&meta_bytes)?;

        st.payload_size = meta.payload_size as usize;
        self.read_state = st;
        self.checksum.reset();
        Ok(meta)
    }

    /// Reads up to `buf.len()` payload bytes in order, folding them into
    /// the payload checksum. Returns the number of bytes read, which is
    /// less than requested once the payload is exhausted.
    pub fn get_data_chunk(&mut self, buf: &mut [u8]) -> Result<usize, RingError> {
        let overhead = StorageHeader::SIZE + ImageMetadata::SIZE;
        let payload_done = self.read_state.consumed.saturating_sub(overhead);
        let n = buf.len().min(self.read_state.payload_size - payload_done);

        let mut st = self.read_state;
        self.ring_read(&mut st, &mut buf[..n], true)?;
        self.read_state = st;
        Ok(n)
    }

    /// Closes the entry: verifies the trailing CRC against the checksum
    /// accumulated by the reads, then advances the head and erases the
    /// erase blocks that became fully free.
    ///
    /// On a checksum mismatch the entry stays in place and the logical
    /// state is unchanged, so a reader may retry.
    pub fn pop_image(&mut self) -> Result<(), RingError> {
        if self.state.is_empty() {
            return Err(RingError::EmptyBuffer);
        }

        let actual = self.checksum.get();
        let freed_start = self.state.head();
        let entry_size = self.read_state.entry_size;

        let mut st = self.read_state;
        let mut tag = [0u8; CRC_TAG_SIZE];
        self.ring_read(&mut st, &mut tag, false)?;
        self.read_state = st;

        if u32::from_le_bytes(tag) != actual {
            return Err(RingError::Checksum);
        }

        let freed = self.advance_head(entry_size);
        self.erase_freed_blocks(freed_start, freed)
    }

    // ------------------------------------------------------------------
    // Boot-time reconstruction
    // ------------------------------------------------------------------

    /// Rebuilds the logical state from the raw medium.
    ///
    /// Pass 1 sweeps the region at alignment steps collecting offsets whose
    /// storage header carries the magic and a valid CRC. Pass 2 walks the
    /// candidates in sequence-id order, fully validating each entry, and
    /// stops at the first failure. The surviving prefix is committed; the
    /// buffer is usable afterwards even when an error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered. The committed state
    /// is the validated prefix regardless.
    pub fn initialize_from_flash(&mut self) -> Result<(), RingError> {
        self.state.head = 0;
        self.state.tail = 0;
        self.state.size = 0;
        self.state.count = 0;
        self.next_sequence_id = 0;
        self.write_state = EntryState::default();
        self.read_state = EntryState::default();

        let cap = self.state.capacity();
        if cap == 0 {
            return Ok(());
        }

        // Pass 1: discovery sweep.
        let step = self.entry_alignment();
        let mut found: Vec<(usize, usize, u32)> = Vec::new();
        let mut scan = 0usize;
        while scan < cap {
            match self.probe_header(scan) {
                Some(header) => {
                    let entry_size = StorageHeader::SIZE + header.total_size as usize;
                    found.push((scan, entry_size, header.sequence_id));
                    let next = self.align_up(scan + entry_size);
                    if next >= cap {
                        // wrapped past the end of the region: sweep done
                        break;
                    }
                    scan = next;
                }
                None => scan += step,
            }
        }

        if found.is_empty() {
            return Ok(());
        }

        // Pass 2: validation in sequence order.
        found.sort_by_key(|&(_, _, seq)| seq);

        let mut good: Vec<(usize, usize, u32)> = Vec::new();
        let mut first_err = None;
        for &(offset, entry_size, seq) in &found {
            match self.validate_entry(offset) {
                Ok((validated_size, validated_seq, _)) => {
                    if validated_size != entry_size || validated_seq != seq {
                        first_err = Some(RingError::Data);
                        break;
                    }
                    if let Some(&(_, _, last_seq)) = good.last() {
                        if seq != last_seq.wrapping_add(1) {
                            warn!(
                                seq,
                                expected = last_seq.wrapping_add(1),
                                "sequence gap during recovery, dropping remainder"
                            );
                            first_err = Some(RingError::Data);
                            break;
                        }
                    }
                    good.push((offset, entry_size, seq));
                }
                Err(e) => {
                    warn!(offset, error = %e, "invalid entry during recovery, dropping remainder");
                    first_err = Some(e);
                    break;
                }
            }
        }

        if let (Some(&(first_offset, _, _)), Some(&(last_offset, last_size, last_seq))) =
            (good.first(), good.last())
        {
            self.state.head = first_offset;
            self.state.tail = (last_offset + last_size) % cap;
            self.state.size = (self.state.tail + cap - self.state.head) % cap;
            if self.state.size == 0 {
                self.state.size = cap;
            }
            self.state.count = good.len();
            self.next_sequence_id = last_seq.wrapping_add(1);
            debug!(
                count = self.state.count,
                head = self.state.head,
                tail = self.state.tail,
                "reconstructed ring state from flash"
            );
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Read-only validation of one entry: header, metadata, streamed
    /// payload, trailing CRC. Touches neither the read nor the write
    /// cursor. Returns the entry size, its sequence id and the metadata.
    fn validate_entry(
        &mut self,
        offset: usize,
    ) -> Result<(usize, u32, ImageMetadata), RingError> {
        let cap = self.state.capacity();
        if cap == 0 {
            return Err(RingError::Data);
        }

        let mut st = EntryState {
            offset,
            ..EntryState::default()
        };

        let mut header_bytes = [0u8; StorageHeader::SIZE];
        self.read_record(&mut st, &mut header_bytes, StorageHeader::CRC_OFFSET)?;
        let header = StorageHeader::decode(&header_bytes);
        if header.magic != STORAGE_MAGIC {
            return Err(RingError::Data);
        }

        let entry_size = StorageHeader::SIZE + header.total_size as usize;
        if entry_size > cap {
            return Err(RingError::Data);
        }

        let mut meta_bytes = [0u8; ImageMetadata::SIZE];
        self.read_record(&mut st, &mut meta_bytes, ImageMetadata::CRC_OFFSET)?;
        let meta = ImageMetadata::decode(&meta_bytes)?;

        let expected_total =
            ImageMetadata::SIZE + meta.payload_size as usize + CRC_TAG_SIZE;
        if header.total_size as usize != expected_total {
            return Err(RingError::Data);
        }

        self.checksum.reset();
        let mut remaining = meta.payload_size as usize;
        let mut scratch = [0u8; VALIDATE_CHUNK];
        while remaining > 0 {
            let chunk = remaining.min(VALIDATE_CHUNK);
            self.ring_read(&mut st, &mut scratch[..chunk], true)?;
            remaining -= chunk;
        }

        let mut tag = [0u8; CRC_TAG_SIZE];
        self.ring_read(&mut st, &mut tag, false)?;
        if u32::from_le_bytes(tag) != self.checksum.get() {
            return Err(RingError::Checksum);
        }

        Ok((entry_size, header.sequence_id, meta))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn entry_alignment(&self) -> usize {
        self.accessor.alignment().max(1)
    }

    fn align_up(&self, value: usize) -> usize {
        let align = self.entry_alignment();
        value.div_ceil(align) * align
    }

    /// Attempts to read a storage header at `offset`; Some only if the
    /// magic and the header CRC both verify.
    fn probe_header(&mut self, offset: usize) -> Option<StorageHeader> {
        let mut st = EntryState {
            offset,
            ..EntryState::default()
        };
        let mut bytes = [0u8; StorageHeader::SIZE];
        self.ring_read(&mut st, &mut bytes, false).ok()?;

        let header = StorageHeader::decode(&bytes);
        if header.magic != STORAGE_MAGIC {
            return None;
        }
        self.checksum.reset();
        self.checksum.update(&bytes[..StorageHeader::CRC_OFFSET]);
        if self.checksum.get() != header.header_crc {
            return None;
        }
        Some(header)
    }

    /// Stamps the record's CRC at `crc_offset` and writes it through the
    /// ring.
    fn write_record(
        &mut self,
        st: &mut EntryState,
        bytes: &mut [u8],
        crc_offset: usize,
    ) -> Result<(), RingError> {
        self.checksum.reset();
        self.checksum.update(&bytes[..crc_offset]);
        let crc = self.checksum.get();
        bytes[crc_offset..crc_offset + CRC_TAG_SIZE].copy_from_slice(&crc.to_le_bytes());
        self.ring_write(st, bytes, false)
    }

    /// Reads a record through the ring and verifies its embedded CRC.
    fn read_record(
        &mut self,
        st: &mut EntryState,
        bytes: &mut [u8],
        crc_offset: usize,
    ) -> Result<(), RingError> {
        self.ring_read(st, bytes, false)?;
        self.checksum.reset();
        self.checksum.update(&bytes[..crc_offset]);
        let stored = u32::from_le_bytes([
            bytes[crc_offset],
            bytes[crc_offset + 1],
            bytes[crc_offset + 2],
            bytes[crc_offset + 3],
        ]);
        if self.checksum.get() != stored {
            return Err(RingError::Checksum);
        }
        Ok(())
    }

    /// Writes `data` at the cursor, splitting across the capacity boundary
    /// into at most two linear spans. All modular arithmetic for the append
    /// path lives here.
    fn ring_write(
        &mut self,
        st: &mut EntryState,
        data: &[u8],
        update_crc: bool,
    ) -> Result<(), RingError> {
        if data.is_empty() {
            return Ok(());
        }
        let cap = self.state.capacity();
        if data.len() > cap {
            return Err(RingError::OutOfBounds);
        }

        let mut remaining = data;
        while !remaining.is_empty() {
            let chunk = remaining.len().min(cap - st.offset);
            let address = self.state.flash_start() + st.offset;
            self.accessor
                .write(address, &remaining[..chunk])
                .map_err(|_| RingError::Write)?;
            if update_crc {
                self.checksum.update(&remaining[..chunk]);
            }
            st.offset = (st.offset + chunk) % cap;
            remaining = &remaining[chunk..];
        }
        st.consumed += data.len();
        Ok(())
    }

    /// Reads into `buf` from the cursor; the mirror of
    /// [`ring_write`](Self::ring_write).
    fn ring_read(
        &mut self,
        st: &mut EntryState,
        buf: &mut [u8],
        update_crc: bool,
    ) -> Result<(), RingError> {
        if buf.is_empty() {
            return Ok(());
        }
        let cap = self.state.capacity();
        if buf.len() > cap {
            return Err(RingError::OutOfBounds);
        }

        let total = buf.len();
        let mut done = 0;
        while done < total {
            let chunk = (total - done).min(cap - st.offset);
            let address = self.state.flash_start() + st.offset;
            self.accessor
                .read(address, &mut buf[done..done + chunk])
                .map_err(|_| RingError::Read)?;
            if update_crc {
                self.checksum.update(&buf[done..done + chunk]);
            }
            st.offset = (st.offset + chunk) % cap;
            done += chunk;
        }
        st.consumed += total;
        Ok(())
    }

    /// Advances the head past the consumed entry, aligning it up the same
    /// way the tail aligns on append, and keeps `size` in step. Returns the
    /// freed span in bytes (entry plus padding).
    fn advance_head(&mut self, entry_size: usize) -> usize {
        let cap = self.state.capacity();

        self.state.size = self.state.size.saturating_sub(entry_size);
        self.state.count -= 1;

        if self.state.count == 0 {
            // no successor entry: the head meets the tail exactly
            self.state.head = self.state.tail;
            self.state.size = 0;
            return entry_size;
        }

        let head = (self.state.head + entry_size) % cap;
        let mut aligned = self.align_up(head);
        if aligned >= cap {
            aligned -= cap;
        }
        let padding = if aligned >= head {
            aligned - head
        } else {
            cap - head + aligned
        };
        self.state.size = self.state.size.saturating_sub(padding);
        self.state.head = aligned;
        entry_size + padding
    }

    /// Erases every erase block fully contained in the freed ring span
    /// `[start, start + len)`.
    fn erase_freed_blocks(&mut self, start: usize, len: usize) -> Result<(), RingError> {
        let cap = self.state.capacity();
        let block = self.accessor.erase_block_size().max(1);
        let flash_start = self.state.flash_start();

        // at most two linear segments
        let first_len = len.min(cap - start);
        let segments = [(start, first_len), (0, len - first_len)];

        for (seg_start, seg_len) in segments {
            if seg_len == 0 {
                continue;
            }
            let mut block_start = seg_start.div_ceil(block) * block;
            while block_start + block <= seg_start + seg_len {
                self.accessor
                    .erase(flash_start + block_start)
                    .map_err(|_| RingError::Write)?;
                block_start += block;
            }
        }
        Ok(())
    }
}

//! Volume header.
//!
//! The header occupies the first 2048-byte block. Only the magic is stored in
//! plaintext; the eight words after it are header-encrypted.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gtvol_common::little_endian::U32;
use gtvol_common::{BinaryReader, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::cipher;
use crate::{Error, Result};

/// Plaintext magic at offset 0.
pub const VOLUME_MAGIC: u32 = 0x71D3_19F3;

/// Fixed value stored in the word after the magic.
pub const HEADER_PLACEHOLDER: u32 = 0xDEAD_BEEF;

/// Size of a volume block. The header, the table of contents and the payload
/// area each start on a block boundary.
pub const BLOCK_SIZE: usize = 0x800;

/// Size of the fixed header region decoded by [`VolumeHeader::parse`].
pub const HEADER_SIZE: usize = 0x40;

/// Granularity of the data chunk count, and of the final volume length.
pub const DATA_CHUNK_SIZE: usize = 0x1_0000;

/// Serial dates count seconds from 2001-01-01T00:00:00Z.
const SERIAL_EPOCH_UNIX: u64 = 978_307_200;

/// Encrypted header fields start after the magic.
const ENCRYPTED_FIELDS: std::ops::Range<usize> = 0x04..0x24;

/// On-disk header layout (all fields little-endian).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct RawVolumeHeader {
    pub magic: U32,
    pub placeholder: U32,
    pub serial_date: U32,
    pub reserved: U32,
    pub toc_block_offset: U32,
    pub data_block_offset: U32,
    pub folder_count: U32,
    pub toc_length: U32,
    pub data_chunk_count: U32,
}

/// Decoded volume header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VolumeHeader {
    pub serial_date: u32,
    /// Block index of the table of contents, relative to the block after the header.
    pub toc_block_offset: u32,
    /// Block index of the payload area, relative to the table of contents.
    pub data_block_offset: u32,
    /// Number of pages in the table of contents.
    pub folder_count: u32,
    /// Length of the table of contents in bytes.
    pub toc_length: u32,
    /// Payload area length in 64 KiB chunks, rounded up.
    pub data_chunk_count: u32,
}

impl VolumeHeader {
    /// Parse the header from the start of a volume.
    ///
    /// The input is left untouched; encrypted fields are decoded on a copy.
    pub fn parse(volume: &[u8]) -> Result<Self> {
        if volume.len() < BLOCK_SIZE {
            return Err(Error::format(format!(
                "volume is {} bytes, smaller than its header block",
                volume.len()
            )));
        }

        let mut buf = [0u8; HEADER_SIZE];
        buf.copy_from_slice(&volume[..HEADER_SIZE]);

        let magic = BinaryReader::new(&buf).peek_u32()?;
        if magic != VOLUME_MAGIC {
            return Err(Error::format(format!(
                "bad magic {magic:#010x}, expected {VOLUME_MAGIC:#010x}"
            )));
        }

        cipher::decrypt_header(&mut buf[ENCRYPTED_FIELDS]);
        let raw: RawVolumeHeader = BinaryReader::new(&buf).read_struct()?;

        Ok(Self {
            serial_date: raw.serial_date.get(),
            toc_block_offset: raw.toc_block_offset.get(),
            data_block_offset: raw.data_block_offset.get(),
            folder_count: raw.folder_count.get(),
            toc_length: raw.toc_length.get(),
            data_chunk_count: raw.data_chunk_count.get(),
        })
    }

    /// Encode the header in plaintext.
    ///
    /// The builder encrypts everything after the magic together with the
    /// table of contents.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let raw = RawVolumeHeader {
            magic: U32::new(VOLUME_MAGIC),
            placeholder: U32::new(HEADER_PLACEHOLDER),
            serial_date: U32::new(self.serial_date),
            reserved: U32::new(0),
            toc_block_offset: U32::new(self.toc_block_offset),
            data_block_offset: U32::new(self.data_block_offset),
            folder_count: U32::new(self.folder_count),
            toc_length: U32::new(self.toc_length),
            data_chunk_count: U32::new(self.data_chunk_count),
        };

        let mut out = [0u8; HEADER_SIZE];
        let bytes = raw.as_bytes();
        out[..bytes.len()].copy_from_slice(bytes);
        out
    }

    /// Absolute byte offset of the table of contents.
    pub fn toc_offset(&self) -> u64 {
        (u64::from(self.toc_block_offset) + 1) * BLOCK_SIZE as u64
    }

    /// Absolute byte offset of the payload area.
    pub fn data_offset(&self) -> u64 {
        let blocks = 1 + u64::from(self.toc_block_offset) + u64::from(self.data_block_offset);
        blocks * BLOCK_SIZE as u64
    }

    /// The serial date as a point in time.
    pub fn serial_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(SERIAL_EPOCH_UNIX + u64::from(self.serial_date))
    }
}

/// Seconds between the serial epoch and `time`, saturating at both ends.
pub fn serial_date_at(time: SystemTime) -> u32 {
    let unix = time
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    u32::try_from(unix.saturating_sub(SERIAL_EPOCH_UNIX)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VolumeHeader {
        VolumeHeader {
            serial_date: 0x2B3C_4D5E,
            toc_block_offset: 0,
            data_block_offset: 3,
            folder_count: 7,
            toc_length: 0x1C0,
            data_chunk_count: 2,
        }
    }

    fn encrypted_volume(header: &VolumeHeader) -> Vec<u8> {
        let mut volume = vec![0u8; BLOCK_SIZE];
        volume[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        cipher::encrypt_header(&mut volume[4..]);
        volume
    }

    #[test]
    fn test_raw_header_size() {
        assert_eq!(std::mem::size_of::<RawVolumeHeader>(), 0x24);
    }

    #[test]
    fn test_parse_encrypted_header() {
        let header = sample();
        let volume = encrypted_volume(&header);

        assert_eq!(&volume[..4], &VOLUME_MAGIC.to_le_bytes());
        assert_eq!(VolumeHeader::parse(&volume).unwrap(), header);
    }

    #[test]
    fn test_offsets() {
        let header = sample();
        assert_eq!(header.toc_offset(), 0x800);
        assert_eq!(header.data_offset(), 0x2000);
    }

    #[test]
    fn test_bad_magic() {
        let volume = vec![0u8; BLOCK_SIZE];
        assert!(matches!(VolumeHeader::parse(&volume), Err(Error::Format(_))));
    }

    #[test]
    fn test_too_small() {
        let volume = VOLUME_MAGIC.to_le_bytes();
        assert!(matches!(VolumeHeader::parse(&volume), Err(Error::Format(_))));
    }

    #[test]
    fn test_serial_date() {
        let epoch = UNIX_EPOCH + Duration::from_secs(SERIAL_EPOCH_UNIX);
        assert_eq!(serial_date_at(epoch), 0);
        assert_eq!(serial_date_at(epoch + Duration::from_secs(86_400)), 86_400);
        assert_eq!(serial_date_at(UNIX_EPOCH), 0);

        let header = VolumeHeader {
            serial_date: 60,
            ..sample()
        };
        assert_eq!(header.serial_time(), epoch + Duration::from_secs(60));
    }
}

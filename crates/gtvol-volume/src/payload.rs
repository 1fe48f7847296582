//! Compressed payload framing.
//!
//! A compressed payload is an 8-byte frame header followed by a raw DEFLATE
//! stream:
//!
//! ```text
//! 0x00  C5 EE F7 FF   magic (big-endian 0xC5EEF7FF)
//! 0x04  i32 LE        negated uncompressed size
//! 0x08  ...           raw DEFLATE
//! ```
//!
//! Framing and encryption are independent; callers apply
//! [`crypt_stream`](crate::cipher::crypt_stream) to the whole frame.

use std::io::{Read, Write};

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use gtvol_common::BinaryReader;

use crate::{Error, Result};

/// Frame magic, stored big-endian.
pub const FRAME_MAGIC: u32 = 0xC5EE_F7FF;

/// Size of the frame header preceding the DEFLATE stream.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Upper bound on the DEFLATE expansion ratio.
const MAX_DEFLATE_RATIO: usize = 1032;

/// Compress `data` into a frame.
pub fn frame(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let size = i32::try_from(data.len()).map_err(|_| {
        Error::InvalidInput(format!("{} bytes is too large to compress", data.len()))
    })?;

    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + data.len() / 2);
    out.write_u32::<BigEndian>(FRAME_MAGIC)?;
    out.write_i32::<LittleEndian>(-size)?;

    let mut encoder = DeflateEncoder::new(out, Compression::new(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Validate a frame and inflate exactly `uncompressed_size` bytes.
pub fn unframe(frame: &[u8], uncompressed_size: u32) -> Result<Vec<u8>> {
    if frame.len() <= FRAME_HEADER_SIZE {
        return Err(Error::MalformedPayload(format!(
            "frame of {} bytes has no compressed body",
            frame.len()
        )));
    }

    let mut reader = BinaryReader::new(frame);
    let magic = reader.read_u32_be()?;
    if magic != FRAME_MAGIC {
        return Err(Error::MalformedPayload(format!(
            "bad frame magic {magic:#010x}"
        )));
    }

    let complement = reader.read_i32()?;
    if i64::from(uncompressed_size) + i64::from(complement) != 0 {
        return Err(Error::MalformedPayload(format!(
            "frame size {} does not match the recorded size {uncompressed_size}",
            -i64::from(complement)
        )));
    }

    let expected = uncompressed_size as usize;
    let body = reader.remaining_bytes();
    let mut output =
        Vec::with_capacity(expected.min(body.len().saturating_mul(MAX_DEFLATE_RATIO)));
    DeflateDecoder::new(body)
        .take(u64::from(uncompressed_size))
        .read_to_end(&mut output)
        .map_err(|e| Error::MalformedPayload(format!("inflate failed: {e}")))?;

    if output.len() != expected {
        return Err(Error::MalformedPayload(format!(
            "inflated {} bytes, expected {expected}",
            output.len()
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVEL: u32 = 6;

    #[test]
    fn test_frame_header() {
        let framed = frame(b"hello hello hello", LEVEL).unwrap();
        assert_eq!(&framed[..4], &[0xC5, 0xEE, 0xF7, 0xFF]);
        assert_eq!(i32::from_le_bytes([framed[4], framed[5], framed[6], framed[7]]), -17);
        assert_eq!(unframe(&framed, 17).unwrap(), b"hello hello hello");
    }

    #[test]
    fn test_empty_payload() {
        let framed = frame(b"", LEVEL).unwrap();
        assert!(framed.len() > FRAME_HEADER_SIZE);
        assert!(unframe(&framed, 0).unwrap().is_empty());
    }

    #[test]
    fn test_compresses_repetitive_data() {
        let data = vec![0x42u8; 64 * 1024];
        let framed = frame(&data, LEVEL).unwrap();
        assert!(framed.len() < data.len() / 10);
        assert_eq!(unframe(&framed, data.len() as u32).unwrap(), data);
    }

    #[test]
    fn test_size_mismatch() {
        let framed = frame(b"0123456789", LEVEL).unwrap();
        assert!(matches!(unframe(&framed, 11), Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn test_bad_magic() {
        let mut framed = frame(b"0123456789", LEVEL).unwrap();
        framed[0] = 0;
        let err = unframe(&framed, 10).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_header_only_frame() {
        let framed = frame(b"0123456789", LEVEL).unwrap();
        assert!(matches!(
            unframe(&framed[..FRAME_HEADER_SIZE], 10),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_inflated_size_claim_is_not_trusted() {
        let mut framed = frame(b"abc", LEVEL).unwrap();
        let claimed = i32::MAX as u32;
        framed[4..8].copy_from_slice(&(-i32::MAX).to_le_bytes());

        let err = unframe(&framed, claimed).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(ref msg) if msg.contains("inflated 3 bytes")));
    }

    #[test]
    fn test_truncated_stream() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let framed = frame(&data, LEVEL).unwrap();
        let truncated = &framed[..framed.len() / 2];
        assert!(matches!(
            unframe(truncated, data.len() as u32),
            Err(Error::MalformedPayload(_))
        ));
    }
}

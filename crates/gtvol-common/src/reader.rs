//! Byte cursor over plaintext buffers.
//!
//! Volume headers, folder-offset tables and payload frames are fixed-width
//! little-endian fields (the frame magic excepted), read through
//! [`BinaryReader`] after any header cipher has been undone.

use zerocopy::FromBytes;

use crate::{Error, Result};

/// A cursor over a byte slice that hands out borrowed sub-slices.
///
/// # Example
///
/// ```
/// use gtvol_common::BinaryReader;
///
/// let frame = [0xC5, 0xEE, 0xF7, 0xFF, 0xF6, 0xFF, 0xFF, 0xFF];
/// let mut reader = BinaryReader::new(&frame);
///
/// assert_eq!(reader.read_u32_be().unwrap(), 0xC5EE_F7FF);
/// assert_eq!(reader.read_i32().unwrap(), -10);
/// assert!(reader.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    #[inline]
    pub const fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Everything after the cursor.
    #[inline]
    pub fn remaining_bytes(&self) -> &'a [u8] {
        &self.data[self.position.min(self.data.len())..]
    }

    fn take(&self, count: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if available < count {
            return Err(Error::UnexpectedEof {
                needed: count,
                available,
            });
        }
        Ok(&self.data[self.position..self.position + count])
    }

    /// Borrow `count` bytes and move past them.
    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let bytes = self.take(count)?;
        self.position += count;
        Ok(bytes)
    }

    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Big-endian u32, as used by the payload frame magic.
    #[inline]
    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_array().map(i32::from_le_bytes)
    }

    /// Read `count` little-endian u16 values.
    pub fn read_u16_array(&mut self, count: usize) -> Result<Vec<u16>> {
        let bytes = self.read_bytes(count * 2)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Read an on-disk struct through zerocopy.
    #[inline]
    pub fn read_struct<T: FromBytes>(&mut self) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let bytes = self.read_bytes(size)?;
        T::read_from_bytes(bytes).map_err(|_| Error::UnexpectedEof {
            needed: size,
            available: bytes.len(),
        })
    }

    /// Little-endian u32 at the cursor, without moving it.
    #[inline]
    pub fn peek_u32(&self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_fields() {
        let data = [0xC5, 0xEE, 0xF7, 0xFF, 0x00, 0xF0, 0xFF, 0xFF, 0x78];
        let mut reader = BinaryReader::new(&data);

        assert_eq!(reader.read_u32_be().unwrap(), 0xC5EE_F7FF);
        assert_eq!(reader.read_i32().unwrap(), -0x1000);
        assert_eq!(reader.remaining_bytes(), &[0x78]);
    }

    #[test]
    fn test_u16_array() {
        let data = [0x01, 0x00, 0x20, 0x00, 0xFF, 0xFF];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_u16_array(3).unwrap(), vec![1, 0x20, 0xFFFF]);
        assert!(matches!(
            reader.read_u16_array(1),
            Err(Error::UnexpectedEof {
                needed: 2,
                available: 0
            })
        ));
    }

    #[test]
    fn test_peek_does_not_advance() {
        let data = 0x71D3_19F3u32.to_le_bytes();
        let mut reader = BinaryReader::new(&data);

        assert_eq!(reader.peek_u32().unwrap(), 0x71D3_19F3);
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_u32().unwrap(), 0x71D3_19F3);
        assert_eq!(reader.position(), 4);
    }

    #[test]
    fn test_short_read() {
        let mut reader = BinaryReader::new(&[0x01, 0x02]);
        assert!(reader.read_u32().is_err());
        assert_eq!(reader.read_u16().unwrap(), 0x0201);
    }
}

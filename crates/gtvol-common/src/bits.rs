//! MSB-first bit cursors.
//!
//! Table-of-contents pages are bit-packed: a page header mixes 1, 11 and
//! 12-bit fields, while records are byte-aligned runs of 8-bit fields,
//! variable-length integers and length-prefixed strings. Bits are consumed
//! and produced most-significant-bit first within each byte.
//!
//! A [`BitReader`] can be *keyed* with a [`ByteKey`]: every byte is passed
//! through the key as it is fetched, so a reader can walk a still-encrypted
//! buffer without decrypting it up front.

use crate::{Error, Result};

/// A per-byte transform applied to every byte a keyed [`BitReader`] fetches.
pub type ByteKey = fn(u8) -> u8;

/// Longest varint the grouped flavor accepts (5 x 7 bits covers a u32).
const MAX_GROUPED_VARINT_LEN: usize = 5;

/// Variable-length integer convention used by a table of contents.
///
/// Both conventions have been observed in volumes and nothing in the header
/// tells them apart, so the caller picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VarIntFlavor {
    /// 7-bit groups, most significant group first, continuation when the
    /// byte exceeds `0x7F`.
    #[default]
    Grouped,
    /// Length given by the leading one bits of the first byte, remaining
    /// bits big-endian.
    Prefixed,
}

/// Number of bytes `value` occupies as a varint.
pub fn varint_size(value: u32, flavor: VarIntFlavor) -> usize {
    match flavor {
        VarIntFlavor::Grouped => {
            let significant = 32 - value.leading_zeros() as usize;
            significant.max(1).div_ceil(7)
        }
        VarIntFlavor::Prefixed => match value {
            0..=0x7F => 1,
            0x80..=0x3FFF => 2,
            0x4000..=0x1F_FFFF => 3,
            0x20_0000..=0x0FFF_FFFF => 4,
            _ => 5,
        },
    }
}

/// Number of bytes a length-prefixed string occupies.
pub fn prefixed_string_size(value: &str, flavor: VarIntFlavor) -> usize {
    varint_size(value.len() as u32, flavor) + value.len()
}

/// Bit-level reader over a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_position: usize,
    key: Option<ByteKey>,
    flavor: VarIntFlavor,
}

impl<'a> BitReader<'a> {
    /// Create a reader over plain bytes.
    pub fn new(data: &'a [u8], flavor: VarIntFlavor) -> Self {
        Self {
            data,
            bit_position: 0,
            key: None,
            flavor,
        }
    }

    /// Create a reader that passes every fetched byte through `key`.
    pub fn keyed(data: &'a [u8], key: ByteKey, flavor: VarIntFlavor) -> Self {
        Self {
            data,
            bit_position: 0,
            key: Some(key),
            flavor,
        }
    }

    /// The varint convention in use.
    #[inline]
    pub fn flavor(&self) -> VarIntFlavor {
        self.flavor
    }

    /// Current position in bits.
    #[inline]
    pub fn bit_position(&self) -> usize {
        self.bit_position
    }

    /// Current position in whole bytes (rounded down).
    #[inline]
    pub fn byte_position(&self) -> usize {
        self.bit_position / 8
    }

    /// Length of the underlying buffer in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Move to an absolute byte position.
    pub fn seek_bytes(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(self.malformed("seek past end of buffer"));
        }
        self.bit_position = position * 8;
        Ok(())
    }

    /// Move to an absolute bit position.
    pub fn seek_bits(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() * 8 {
            return Err(self.malformed("seek past end of buffer"));
        }
        self.bit_position = position;
        Ok(())
    }

    /// Read `count` bits (at most 32) as an unsigned value.
    pub fn read_bits(&mut self, count: u32) -> Result<u32> {
        debug_assert!(count <= 32, "read_bits supports at most 32 bits");
        if self.bit_position + count as usize > self.data.len() * 8 {
            return Err(self.malformed("read past end of buffer"));
        }

        let mut value: u64 = 0;
        let mut remaining = count;
        while remaining > 0 {
            let byte = self.fetch(self.bit_position / 8);
            let available = 8 - (self.bit_position % 8) as u32;
            let take = available.min(remaining);
            let mask = ((1u16 << take) - 1) as u8;
            let bits = (byte >> (available - take)) & mask;

            value = (value << take) | u64::from(bits);
            remaining -= take;
            self.bit_position += take as usize;
        }

        Ok(value as u32)
    }

    /// Read a single bit as a boolean.
    #[inline]
    pub fn read_bool_bit(&mut self) -> Result<bool> {
        self.read_bits(1).map(|bit| bit != 0)
    }

    /// Read 8 bits.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bits(8).map(|value| value as u8)
    }

    /// Skip to the next byte boundary.
    #[inline]
    pub fn align_to_byte(&mut self) {
        self.bit_position = self.bit_position.next_multiple_of(8);
    }

    /// Read a variable-length integer in the reader's flavor.
    pub fn read_varint(&mut self) -> Result<u32> {
        match self.flavor {
            VarIntFlavor::Grouped => self.read_grouped_varint(),
            VarIntFlavor::Prefixed => self.read_prefixed_varint(),
        }
    }

    fn read_grouped_varint(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        for _ in 0..MAX_GROUPED_VARINT_LEN {
            let byte = self.read_u8()?;
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte <= 0x7F {
                return Ok(value);
            }
        }
        Err(self.malformed("varint longer than 5 bytes"))
    }

    fn read_prefixed_varint(&mut self) -> Result<u32> {
        let first = self.read_u8()?;
        let (extra, head) = match first {
            0x00..=0x7F => return Ok(u32::from(first)),
            0x80..=0xBF => (1, first & 0x3F),
            0xC0..=0xDF => (2, first & 0x1F),
            0xE0..=0xEF => (3, first & 0x0F),
            0xF0 => (4, 0),
            _ => return Err(self.malformed("invalid varint prefix")),
        };

        let mut value = u32::from(head);
        for _ in 0..extra {
            value = (value << 8) | u32::from(self.read_u8()?);
        }
        Ok(value)
    }

    /// Read a varint length followed by that many ASCII bytes.
    pub fn read_prefixed_string(&mut self) -> Result<String> {
        let length = self.read_varint()? as usize;
        if self.bit_position + length * 8 > self.data.len() * 8 {
            return Err(self.malformed("string runs past end of buffer"));
        }

        let mut value = String::with_capacity(length);
        for _ in 0..length {
            let byte = self.read_u8()?;
            if !byte.is_ascii() {
                return Err(Error::NonAscii { byte });
            }
            value.push(byte as char);
        }
        Ok(value)
    }

    #[inline]
    fn fetch(&self, index: usize) -> u8 {
        let byte = self.data[index];
        match self.key {
            Some(key) => key(byte),
            None => byte,
        }
    }

    fn malformed(&self, reason: &'static str) -> Error {
        Error::MalformedInput {
            bit_position: self.bit_position,
            reason,
        }
    }
}

/// Append-only bit-level writer.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bit_position: usize,
    flavor: VarIntFlavor,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new(flavor: VarIntFlavor) -> Self {
        Self {
            data: Vec::new(),
            bit_position: 0,
            flavor,
        }
    }

    /// Current position in bits.
    #[inline]
    pub fn bit_position(&self) -> usize {
        self.bit_position
    }

    /// Current length in whole bytes, counting a partially written byte.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Write the low `count` bits (at most 32) of `value`.
    pub fn write_bits(&mut self, value: u32, count: u32) {
        debug_assert!(count <= 32, "write_bits supports at most 32 bits");
        debug_assert!(
            count == 32 || value >> count == 0,
            "value {value:#x} does not fit in {count} bits"
        );

        let mut remaining = count;
        while remaining > 0 {
            let index = self.bit_position / 8;
            if index == self.data.len() {
                self.data.push(0);
            }

            let available = 8 - (self.bit_position % 8) as u32;
            let take = available.min(remaining);
            let bits = ((u64::from(value) >> (remaining - take)) & ((1u64 << take) - 1)) as u8;
            self.data[index] |= bits << (available - take);

            remaining -= take;
            self.bit_position += take as usize;
        }
    }

    /// Write a single bit.
    #[inline]
    pub fn write_bool_bit(&mut self, value: bool) {
        self.write_bits(u32::from(value), 1);
    }

    /// Write 8 bits.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(u32::from(value), 8);
    }

    /// Write whole bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.bit_position % 8 == 0 {
            self.data.extend_from_slice(bytes);
            self.bit_position += bytes.len() * 8;
        } else {
            for &byte in bytes {
                self.write_u8(byte);
            }
        }
    }

    /// Pad with zero bits up to the next byte boundary.
    #[inline]
    pub fn align_to_byte(&mut self) {
        self.bit_position = self.bit_position.next_multiple_of(8);
    }

    /// Pad with zero bytes up to a multiple of `alignment` bytes.
    pub fn align_to(&mut self, alignment: usize) {
        self.align_to_byte();
        let target = self.data.len().next_multiple_of(alignment);
        self.data.resize(target, 0);
        self.bit_position = target * 8;
    }

    /// Write a variable-length integer in the writer's flavor.
    pub fn write_varint(&mut self, value: u32) {
        match self.flavor {
            VarIntFlavor::Grouped => {
                let len = varint_size(value, VarIntFlavor::Grouped);
                for group in (0..len).rev() {
                    let mut byte = ((value >> (group * 7)) & 0x7F) as u8;
                    if group != 0 {
                        byte |= 0x80;
                    }
                    self.write_u8(byte);
                }
            }
            VarIntFlavor::Prefixed => match varint_size(value, VarIntFlavor::Prefixed) {
                1 => self.write_u8(value as u8),
                2 => self.write_bits(0x8000 | value, 16),
                3 => self.write_bits(0xC0_0000 | value, 24),
                4 => self.write_bits(0xE000_0000 | value, 32),
                _ => {
                    self.write_u8(0xF0);
                    self.write_bits(value, 32);
                }
            },
        }
    }

    /// Write a varint length followed by the string's bytes.
    ///
    /// The caller guarantees the string is ASCII.
    pub fn write_prefixed_string(&mut self, value: &str) {
        debug_assert!(value.is_ascii(), "prefixed strings must be ASCII");
        self.write_varint(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }

    /// Borrow the written bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer, returning the written bytes.
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_are_msb_first() {
        let mut writer = BitWriter::new(VarIntFlavor::Grouped);
        writer.write_bool_bit(true);
        writer.write_bits(0x5, 11);
        writer.write_bits(0xABC, 12);
        assert_eq!(writer.as_bytes(), &[0x80, 0x5A, 0xBC]);

        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes, VarIntFlavor::Grouped);
        assert!(reader.read_bool_bit().unwrap());
        assert_eq!(reader.read_bits(11).unwrap(), 0x5);
        assert_eq!(reader.read_bits(12).unwrap(), 0xABC);
    }

    #[test]
    fn test_align_pads_with_zero_bits() {
        let mut writer = BitWriter::new(VarIntFlavor::Grouped);
        writer.write_bits(0b101, 3);
        writer.align_to_byte();
        writer.write_u8(0xFF);
        assert_eq!(writer.as_bytes(), &[0b1010_0000, 0xFF]);

        writer.align_to(64);
        assert_eq!(writer.byte_len(), 64);
    }

    #[test]
    fn test_grouped_varint_boundaries() {
        for (value, encoded) in [
            (0u32, vec![0x00]),
            (127, vec![0x7F]),
            (128, vec![0x81, 0x00]),
            (16383, vec![0xFF, 0x7F]),
            (16384, vec![0x81, 0x80, 0x00]),
        ] {
            let mut writer = BitWriter::new(VarIntFlavor::Grouped);
            writer.write_varint(value);
            assert_eq!(writer.as_bytes(), encoded.as_slice(), "value {value}");
            assert_eq!(varint_size(value, VarIntFlavor::Grouped), encoded.len());

            let mut reader = BitReader::new(&encoded, VarIntFlavor::Grouped);
            assert_eq!(reader.read_varint().unwrap(), value);
        }
    }

    #[test]
    fn test_prefixed_varint_boundaries() {
        for value in [0u32, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, u32::MAX] {
            let mut writer = BitWriter::new(VarIntFlavor::Prefixed);
            writer.write_varint(value);
            assert_eq!(writer.byte_len(), varint_size(value, VarIntFlavor::Prefixed));

            let bytes = writer.into_bytes();
            let mut reader = BitReader::new(&bytes, VarIntFlavor::Prefixed);
            assert_eq!(reader.read_varint().unwrap(), value);
        }
    }

    #[test]
    fn test_prefixed_string() {
        let mut writer = BitWriter::new(VarIntFlavor::Grouped);
        writer.write_prefixed_string("race.mdl");
        assert_eq!(writer.byte_len(), prefixed_string_size("race.mdl", VarIntFlavor::Grouped));

        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes, VarIntFlavor::Grouped);
        assert_eq!(reader.read_prefixed_string().unwrap(), "race.mdl");
    }

    #[test]
    fn test_keyed_reader_transforms_each_byte() {
        fn invert(byte: u8) -> u8 {
            !byte
        }

        let stored = [!0x03u8, !b'a', !b'b', !b'c'];
        let mut reader = BitReader::keyed(&stored, invert, VarIntFlavor::Grouped);
        assert_eq!(reader.read_prefixed_string().unwrap(), "abc");
    }

    #[test]
    fn test_read_past_end_is_malformed() {
        let mut reader = BitReader::new(&[0xFF], VarIntFlavor::Grouped);
        assert!(reader.read_bits(4).is_ok());
        assert!(matches!(
            reader.read_bits(5),
            Err(Error::MalformedInput { bit_position: 4, .. })
        ));

        let mut reader = BitReader::new(&[0x05, b'a'], VarIntFlavor::Grouped);
        assert!(reader.read_prefixed_string().is_err());

        let mut reader = BitReader::new(&[0x80, 0x80], VarIntFlavor::Grouped);
        assert!(reader.read_varint().is_err());
    }

    #[test]
    fn test_non_ascii_string_rejected() {
        let mut reader = BitReader::new(&[0x01, 0xC3], VarIntFlavor::Grouped);
        assert!(matches!(
            reader.read_prefixed_string(),
            Err(Error::NonAscii { byte: 0xC3 })
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn varint_round_trips(value in any::<u32>(), prefixed in any::<bool>()) {
                let flavor = if prefixed { VarIntFlavor::Prefixed } else { VarIntFlavor::Grouped };
                let mut writer = BitWriter::new(flavor);
                writer.write_bits(0b1, 1);
                writer.align_to_byte();
                writer.write_varint(value);
                prop_assert_eq!(writer.byte_len(), 1 + varint_size(value, flavor));

                let bytes = writer.into_bytes();
                let mut reader = BitReader::new(&bytes, flavor);
                prop_assert!(reader.read_bool_bit().unwrap());
                reader.align_to_byte();
                prop_assert_eq!(reader.read_varint().unwrap(), value);
            }

            #[test]
            fn bit_fields_round_trip(fields in proptest::collection::vec((1u32..=32, any::<u32>()), 1..40)) {
                let mut writer = BitWriter::new(VarIntFlavor::Grouped);
                for &(width, raw) in &fields {
                    let value = if width == 32 { raw } else { raw & ((1 << width) - 1) };
                    writer.write_bits(value, width);
                }

                let bytes = writer.into_bytes();
                let mut reader = BitReader::new(&bytes, VarIntFlavor::Grouped);
                for &(width, raw) in &fields {
                    let value = if width == 32 { raw } else { raw & ((1 << width) - 1) };
                    prop_assert_eq!(reader.read_bits(width).unwrap(), value);
                }
            }
        }
    }
}

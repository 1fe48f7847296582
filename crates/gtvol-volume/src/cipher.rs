//! Volume obfuscation using a fixed substitution box.
//!
//! Two transforms share one 256-entry table:
//!
//! - The *header* transform substitutes every byte through the table. It
//!   covers the header fields, the folder-offset table and the whole table of
//!   contents. [`SBOX_ENCRYPT`] is the inverse permutation of [`SBOX_DECRYPT`].
//! - The *stream* transform XORs every payload byte with the table entry at
//!   `(file_offset + i) % 256`. It is its own inverse.

/// Decryption substitution table. Hardcoded in the game executable.
pub const SBOX_DECRYPT: [u8; 256] = [
    0x00, 0x06, 0x86, 0x57, 0x97, 0x69, 0x6C, 0xB5, 0xBD, 0xD6, 0xBE, 0x34, 0xC2, 0x35, 0xCE, 0xFA,
    0x0E, 0x7E, 0x2F, 0xD0, 0x9A, 0x8E, 0xB4, 0x82, 0x25, 0x58, 0x1F, 0x6D, 0x90, 0xF5, 0x8B, 0xA5,
    0xE5, 0x96, 0x56, 0xFF, 0x3B, 0x2B, 0x6B, 0xAE, 0x98, 0x32, 0x2D, 0x60, 0x45, 0xFE, 0x81, 0xA7,
    0xEC, 0x1B, 0xDA, 0xC9, 0xDC, 0x3C, 0x52, 0xF9, 0x7B, 0x04, 0x63, 0xC6, 0xDB, 0xCA, 0x1C, 0x3D,
    0xD1, 0x7A, 0xFD, 0x6F, 0xF1, 0xCD, 0x9C, 0x4D, 0x78, 0x74, 0x0D, 0x40, 0x51, 0x8D, 0x64, 0x5C,
    0xCB, 0x49, 0xF8, 0x39, 0x24, 0x30, 0x3A, 0xE2, 0x22, 0x61, 0xA4, 0x89, 0x09, 0x65, 0xAD, 0x1D,
    0xEF, 0x4E, 0xC8, 0xB8, 0x10, 0xA2, 0xDF, 0x0F, 0xFB, 0x66, 0x54, 0xA6, 0x1E, 0x11, 0x73, 0x62,
    0x13, 0x21, 0x46, 0xB9, 0x33, 0x9D, 0x88, 0xB2, 0xE3, 0x37, 0x0C, 0x4F, 0x84, 0x3E, 0xF0, 0x16,
    0x70, 0x36, 0xDE, 0x8A, 0x1A, 0xEE, 0x28, 0xBC, 0x9F, 0x05, 0x80, 0x67, 0x4A, 0x7C, 0xE0, 0x53,
    0x2E, 0xE7, 0xA3, 0x6A, 0xFC, 0x03, 0x41, 0x6E, 0xD8, 0x14, 0x38, 0xBB, 0xF6, 0xEB, 0x19, 0xAC,
    0x48, 0xD4, 0x27, 0x44, 0xC4, 0x08, 0x95, 0x07, 0x43, 0xD5, 0x18, 0x26, 0xF4, 0x20, 0x75, 0x77,
    0xC0, 0xA1, 0x99, 0x0B, 0xC3, 0x85, 0xE1, 0xBA, 0x4C, 0xB3, 0x9B, 0x47, 0x23, 0xAF, 0x8C, 0x72,
    0x68, 0xA8, 0xCC, 0xC7, 0xAB, 0x5F, 0x5D, 0x93, 0x3F, 0x5E, 0x87, 0x9E, 0xCF, 0xD7, 0xB0, 0x4B,
    0x76, 0xD9, 0x71, 0x31, 0xB6, 0x7D, 0x50, 0x0A, 0x5B, 0xE8, 0x83, 0x2A, 0xB7, 0x7F, 0xDD, 0x59,
    0xC5, 0x79, 0x5A, 0xF7, 0xA9, 0xE9, 0xD2, 0xED, 0xE6, 0xBF, 0xF3, 0xB1, 0x29, 0x01, 0x12, 0xAA,
    0x91, 0x92, 0xF2, 0x15, 0xE4, 0xD3, 0x17, 0x42, 0x02, 0xA0, 0x8F, 0xC1, 0x2C, 0x94, 0x55, 0xEA,
];

/// Encryption substitution table, the inverse permutation of [`SBOX_DECRYPT`].
pub const SBOX_ENCRYPT: [u8; 256] = invert(&SBOX_DECRYPT);

/// Stream key as native-endian words, for XORing 64-byte blocks a word at a time.
const STREAM_KEY_WORDS: [u32; 64] = key_words(&SBOX_DECRYPT);

/// Payload runs aligned to this many bytes take the word-wise path.
const STREAM_BLOCK: usize = 0x40;

const fn invert(table: &[u8; 256]) -> [u8; 256] {
    let mut inverse = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        inverse[table[i] as usize] = i as u8;
        i += 1;
    }
    inverse
}

const fn key_words(table: &[u8; 256]) -> [u32; 64] {
    let mut words = [0u32; 64];
    let mut i = 0;
    while i < 64 {
        words[i] = u32::from_ne_bytes([
            table[i * 4],
            table[i * 4 + 1],
            table[i * 4 + 2],
            table[i * 4 + 3],
        ]);
        i += 1;
    }
    words
}

/// Decrypt a single header-transformed byte.
#[inline]
pub fn decrypt_byte(byte: u8) -> u8 {
    SBOX_DECRYPT[byte as usize]
}

/// Encrypt a single byte with the header transform.
#[inline]
pub fn encrypt_byte(byte: u8) -> u8 {
    SBOX_ENCRYPT[byte as usize]
}

/// Decrypt the header-transformed byte at `index` without touching the buffer.
///
/// Used while searching pages, which stay encrypted in memory.
#[inline]
pub fn decrypt_byte_at(data: &[u8], index: usize) -> u8 {
    decrypt_byte(data[index])
}

/// Decrypt a header-transformed buffer in place.
pub fn decrypt_header(data: &mut [u8]) {
    for byte in data {
        *byte = decrypt_byte(*byte);
    }
}

/// Encrypt a buffer in place with the header transform.
pub fn encrypt_header(data: &mut [u8]) {
    for byte in data {
        *byte = encrypt_byte(*byte);
    }
}

/// Apply the payload stream transform in place.
///
/// `offset` is the position of `data[0]` within the volume (or within the
/// payload blob; the blob starts on a 2048-byte boundary, so both give the
/// same key). Unaligned head bytes are handled one at a time, whole 64-byte
/// blocks sixteen words at a time, and the tail one byte at a time again.
pub fn crypt_stream(offset: u64, data: &mut [u8]) {
    let misalignment = (offset % STREAM_BLOCK as u64) as usize;
    let head_len = ((STREAM_BLOCK - misalignment) % STREAM_BLOCK).min(data.len());
    let (head, body) = data.split_at_mut(head_len);
    crypt_stream_bytewise(offset, head);

    let body_offset = offset + head_len as u64;
    let body_len = body.len();
    let mut key_index = (body_offset % 256) as usize;
    let mut blocks = body.chunks_exact_mut(STREAM_BLOCK);
    for block in &mut blocks {
        let key = &STREAM_KEY_WORDS[key_index / 4..key_index / 4 + STREAM_BLOCK / 4];
        for (chunk, word) in block.chunks_exact_mut(4).zip(key) {
            let value = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
            chunk.copy_from_slice(&value.to_ne_bytes());
        }
        key_index = (key_index + STREAM_BLOCK) % 256;
    }

    let tail = blocks.into_remainder();
    let tail_offset = body_offset + (body_len - tail.len()) as u64;
    crypt_stream_bytewise(tail_offset, tail);
}

/// Reference form of [`crypt_stream`], one byte at a time.
pub fn crypt_stream_bytewise(offset: u64, data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= SBOX_DECRYPT[((offset + i as u64) % 256) as usize];
    }
}

/// Decrypt payload bytes read from `offset`.
#[inline]
pub fn decrypt_stream(offset: u64, data: &mut [u8]) {
    crypt_stream(offset, data);
}

/// Encrypt payload bytes to be written at `offset`.
#[inline]
pub fn encrypt_stream(offset: u64, data: &mut [u8]) {
    crypt_stream(offset, data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_table_is_inverse() {
        for value in 0..=255u8 {
            assert_eq!(decrypt_byte(encrypt_byte(value)), value);
            assert_eq!(encrypt_byte(decrypt_byte(value)), value);
        }
    }

    #[test]
    fn test_header_round_trip() {
        let original: Vec<u8> = (0..=255u8).collect();
        let mut data = original.clone();
        encrypt_header(&mut data);
        assert_ne!(data, original);
        decrypt_header(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_zero_is_fixed_point() {
        assert_eq!(SBOX_DECRYPT[0], 0);
        assert_eq!(SBOX_ENCRYPT[0], 0);
    }

    #[test]
    fn test_word_path_matches_bytewise() {
        let original: Vec<u8> = (0..1000u32).map(|i| (i * 7 + 3) as u8).collect();
        for offset in [0u64, 1, 63, 64, 65, 191, 255, 256, 0x800, 0x12345] {
            for len in [0usize, 1, 5, 63, 64, 65, 127, 128, 300, 1000] {
                let mut fast = original[..len].to_vec();
                let mut slow = original[..len].to_vec();
                crypt_stream(offset, &mut fast);
                crypt_stream_bytewise(offset, &mut slow);
                assert_eq!(fast, slow, "offset {offset} len {len}");
            }
        }
    }

    #[test]
    fn test_stream_is_involution() {
        let original = b"GT PSP payload bytes, not aligned to anything".to_vec();
        let mut data = original.clone();
        encrypt_stream(0x1F3, &mut data);
        assert_ne!(data, original);
        decrypt_stream(0x1F3, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_decrypt_byte_at() {
        let data = [encrypt_byte(b'a'), encrypt_byte(b'z')];
        assert_eq!(decrypt_byte_at(&data, 0), b'a');
        assert_eq!(decrypt_byte_at(&data, 1), b'z');
    }
}

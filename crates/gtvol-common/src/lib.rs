//! Common utilities for gtvol.
//!
//! This crate provides the low-level cursors used by the volume codec:
//!
//! - [`BinaryReader`] - Zero-copy little-endian reading from byte slices
//! - [`BitReader`] / [`BitWriter`] - MSB-first bit cursors with varints and
//!   length-prefixed strings, optionally keyed by a per-byte transform
//! - [`VarIntFlavor`] - The two variable-length integer conventions seen in
//!   volume tables of contents

mod error;
mod reader;

pub mod bits;

pub use bits::{prefixed_string_size, varint_size, BitReader, BitWriter, ByteKey, VarIntFlavor};
pub use error::{Error, Result};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Re-export zerocopy's fixed-endian integer types used by on-disk structs.
pub use zerocopy::byteorder::little_endian;

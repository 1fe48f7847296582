//! Reader and builder configuration.

use gtvol_common::VarIntFlavor;

/// Options for opening a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadOptions {
    /// Varint convention of the table of contents.
    pub flavor: VarIntFlavor,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flavor(mut self, flavor: VarIntFlavor) -> Self {
        self.flavor = flavor;
        self
    }
}

/// Options for building a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildOptions {
    /// Varint convention of the table of contents.
    pub flavor: VarIntFlavor,
    /// DEFLATE level, 0 to 9.
    pub compression_level: u32,
    /// Fixed header date; the current time when unset.
    pub serial_date: Option<u32>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            flavor: VarIntFlavor::default(),
            compression_level: 6,
            serial_date: None,
        }
    }
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flavor(mut self, flavor: VarIntFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Set the DEFLATE level. Values above 9 are clamped.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    pub fn serial_date(mut self, serial_date: u32) -> Self {
        self.serial_date = Some(serial_date);
        self
    }
}

//! gtvol - Gran Turismo PSP volume (`GT.VOL`) packing and unpacking library.
//!
//! This crate provides a unified interface to the gtvol crates.
//!
//! # Crates
//!
//! - [`gtvol_common`] - Byte and bit cursors, variable-length integers
//! - [`gtvol_volume`] - Volume cipher, table of contents codec, reader and builder
//!
//! # Example
//!
//! ```no_run
//! use gtvol::prelude::*;
//!
//! // Open a volume
//! let volume = Volume::open("GT.VOL")?;
//!
//! // Find and read a file
//! if let Some(file) = volume.find("crs/race.mdl")? {
//!     let data = volume.read(&file)?;
//!     println!("{}: {} bytes", file.path, data.len());
//! }
//!
//! // Rebuild it from an extracted tree
//! let mut builder = VolumeBuilder::new(BuildOptions::default());
//! builder.import("GT.extracted")?;
//! builder.build("GT_new.VOL")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use gtvol_common as common;
pub use gtvol_volume as volume;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use gtvol_common::{BinaryReader, BitReader, BitWriter, VarIntFlavor};
    pub use gtvol_volume::{
        is_compressible, write_manifest, BuildOptions, BuildSummary, DirNode, DirTree, Entry,
        ExtractSummary, ReadOptions, Volume, VolumeBuilder, VolumeFile, VolumeHeader,
    };
}

// Re-export commonly used types at the crate root
pub use gtvol_volume::{Error, Result};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

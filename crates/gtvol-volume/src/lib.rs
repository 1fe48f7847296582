//! GT.VOL volume reader and builder.
//!
//! GT.VOL is the game data volume of Gran Turismo for the PSP. A volume is a
//! single file laid out in 2048-byte blocks:
//!
//! - A header block. The magic is plaintext, the remaining fields are
//!   obfuscated with a byte substitution.
//! - A table of contents: a folder-offset table followed by bit-packed
//!   directory pages forming one B+tree per directory. Also substituted.
//! - The payload area. Every file is XOR-keyed by its offset and optionally
//!   DEFLATE-compressed behind a small frame header.
//!
//! # Example
//!
//! ```no_run
//! use gtvol_volume::Volume;
//!
//! let volume = Volume::open("GT.VOL")?;
//!
//! for file in volume.files() {
//!     println!("{}: {} bytes", file.path, file.uncompressed_size);
//! }
//!
//! if let Some(file) = volume.find("crs/race.mdl")? {
//!     let data = volume.read(&file)?;
//! }
//! # Ok::<(), gtvol_volume::Error>(())
//! ```
//!
//! Building goes the other way:
//!
//! ```no_run
//! use gtvol_volume::{BuildOptions, VolumeBuilder};
//!
//! let mut builder = VolumeBuilder::new(BuildOptions::default());
//! builder.import("GT.extracted")?;
//! let summary = builder.build("GT_new.VOL")?;
//! println!("{} files in {} pages", summary.files, summary.pages);
//! # Ok::<(), gtvol_volume::Error>(())
//! ```

pub mod builder;
pub mod cipher;
pub mod entry;
mod error;
pub mod header;
pub mod manifest;
mod options;
pub mod page;
pub mod payload;
mod tree;
mod volume;

pub use builder::{is_compressible, BuildSummary, VolumeBuilder};
pub use entry::{Entry, VolumeFile};
pub use error::{Error, Result};
pub use header::VolumeHeader;
pub use manifest::write_manifest;
pub use options::{BuildOptions, ReadOptions};
pub use page::{Lookup, Page, PageView};
pub use tree::{DirNode, DirTree};
pub use volume::{ExtractSummary, Volume};

pub use gtvol_common::VarIntFlavor;

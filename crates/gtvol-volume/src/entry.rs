//! Table of contents records and the file metadata exposed to callers.
//!
//! Every record starts with one flag byte, read MSB first:
//!
//! ```text
//! bit 7     is_directory (always 0 in index records)
//! bit 6     is_compressed (always 0 in index records and directories)
//! bits 5-0  high six bits of the child page id (0 for files)
//! ```
//!
//! followed by a length-prefixed ASCII name. Directories and index records
//! then store the low byte of the child page id. Files store their payload
//! offset in 64-byte units, the compressed size (only when compressed) and
//! the uncompressed size, all as varints.

use std::fmt;
use std::path::PathBuf;

use gtvol_common::{prefixed_string_size, varint_size, BitReader, BitWriter, VarIntFlavor};

use crate::{Error, Result};

/// Largest page id that fits the 14-bit child reference.
pub const MAX_PAGE_ID: usize = 0x3FFF;

/// Payload offsets are stored in units of this many bytes.
pub const PAYLOAD_ALIGNMENT: u64 = 0x40;

/// A record on an entry page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File(FileRecord),
    Directory(DirectoryRecord),
}

/// A file record: where the payload lives and how big it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    /// Byte offset from the start of the payload area. Always 64-byte aligned.
    pub offset: u64,
    pub compressed: bool,
    /// Stored size. Equal to `uncompressed_size` for stored files.
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

/// A directory record pointing at the first page of the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub name: String,
    pub page: u16,
}

/// A record on an index page: the smallest name reachable through `page`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: String,
    pub page: u16,
}

impl Entry {
    /// Name of the entry within its directory.
    pub fn name(&self) -> &str {
        match self {
            Entry::File(file) => &file.name,
            Entry::Directory(dir) => &dir.name,
        }
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        matches!(self, Entry::Directory(_))
    }

    /// Decode one entry record at the reader's position.
    pub fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        let is_directory = reader.read_bool_bit()?;
        let compressed = reader.read_bool_bit()?;
        let page_high = reader.read_bits(6)?;
        let name = reader.read_prefixed_string()?;
        check_record_name(&name).map_err(Error::Format)?;

        if is_directory {
            if compressed {
                return Err(Error::format(format!(
                    "directory '{name}' is flagged as compressed"
                )));
            }
            let page_low = u32::from(reader.read_u8()?);
            return Ok(Entry::Directory(DirectoryRecord {
                name,
                page: ((page_high << 8) | page_low) as u16,
            }));
        }

        if page_high != 0 {
            return Err(Error::format(format!(
                "file '{name}' carries page bits {page_high:#04x}"
            )));
        }

        let offset = u64::from(reader.read_varint()?) * PAYLOAD_ALIGNMENT;
        let (compressed_size, uncompressed_size) = if compressed {
            let compressed_size = reader.read_varint()?;
            (compressed_size, reader.read_varint()?)
        } else {
            let size = reader.read_varint()?;
            (size, size)
        };

        Ok(Entry::File(FileRecord {
            name,
            offset,
            compressed,
            compressed_size,
            uncompressed_size,
        }))
    }

    /// Encode the record at the writer's position.
    pub fn write(&self, writer: &mut BitWriter) -> Result<()> {
        match self {
            Entry::Directory(dir) => {
                let page = check_page_id(dir.page)?;
                writer.write_bool_bit(true);
                writer.write_bool_bit(false);
                writer.write_bits(page >> 8, 6);
                writer.write_prefixed_string(&dir.name);
                writer.write_u8(page as u8);
            }
            Entry::File(file) => {
                let units = file.offset_units()?;
                writer.write_bool_bit(false);
                writer.write_bool_bit(file.compressed);
                writer.write_bits(0, 6);
                writer.write_prefixed_string(&file.name);
                writer.write_varint(units);
                if file.compressed {
                    writer.write_varint(file.compressed_size);
                }
                writer.write_varint(file.uncompressed_size);
            }
        }
        Ok(())
    }

    /// Bytes the record occupies once encoded.
    pub fn serialized_size(&self, flavor: VarIntFlavor) -> usize {
        match self {
            Entry::Directory(dir) => 1 + prefixed_string_size(&dir.name, flavor) + 1,
            Entry::File(file) => {
                let units = (file.offset / PAYLOAD_ALIGNMENT).min(u64::from(u32::MAX)) as u32;
                let mut size = 1 + prefixed_string_size(&file.name, flavor);
                size += varint_size(units, flavor);
                if file.compressed {
                    size += varint_size(file.compressed_size, flavor);
                }
                size + varint_size(file.uncompressed_size, flavor)
            }
        }
    }
}

impl FileRecord {
    fn offset_units(&self) -> Result<u32> {
        if self.offset % PAYLOAD_ALIGNMENT != 0 {
            return Err(Error::InvalidInput(format!(
                "payload offset {:#x} of '{}' is not 64-byte aligned",
                self.offset, self.name
            )));
        }
        let units = self.offset / PAYLOAD_ALIGNMENT;
        u32::try_from(units).map_err(|_| Error::CapacityExceeded {
            field: "payload offset",
            value: units as usize,
            max: u32::MAX as usize,
        })
    }
}

impl IndexRecord {
    /// Decode one index record at the reader's position.
    pub fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        let flags = reader.read_bits(2)?;
        let page_high = reader.read_bits(6)?;
        let key = reader.read_prefixed_string()?;
        if flags != 0 {
            return Err(Error::format(format!(
                "index record '{key}' carries entry flags {flags:#b}"
            )));
        }
        let page_low = u32::from(reader.read_u8()?);
        Ok(Self {
            key,
            page: ((page_high << 8) | page_low) as u16,
        })
    }

    /// Encode the record at the writer's position.
    pub fn write(&self, writer: &mut BitWriter) -> Result<()> {
        let page = check_page_id(self.page)?;
        writer.write_bits(0, 2);
        writer.write_bits(page >> 8, 6);
        writer.write_prefixed_string(&self.key);
        writer.write_u8(page as u8);
        Ok(())
    }

    /// Bytes the record occupies once encoded.
    pub fn serialized_size(&self, flavor: VarIntFlavor) -> usize {
        index_record_size(&self.key, flavor)
    }
}

/// Encoded size of an index record with the given key.
pub fn index_record_size(key: &str, flavor: VarIntFlavor) -> usize {
    1 + prefixed_string_size(key, flavor) + 1
}

fn check_page_id(page: u16) -> Result<u32> {
    if usize::from(page) > MAX_PAGE_ID {
        return Err(Error::CapacityExceeded {
            field: "page id",
            value: usize::from(page),
            max: MAX_PAGE_ID,
        });
    }
    Ok(u32::from(page))
}

/// Reject names that cannot be a single path component.
pub(crate) fn check_record_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(format!("invalid entry name '{name}'"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(format!("entry name '{name}' contains a path separator"));
    }
    Ok(())
}

/// A file stored in a volume.
///
/// This holds metadata only; use [`Volume::read`](crate::Volume::read) for
/// the contents.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VolumeFile {
    /// Full path with `/` separators, without a leading slash.
    pub path: String,
    /// Byte offset from the start of the payload area.
    pub offset: u64,
    pub compressed: bool,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl VolumeFile {
    pub(crate) fn from_record(parent: &str, record: &FileRecord) -> Self {
        Self {
            path: join_path(parent, &record.name),
            offset: record.offset,
            compressed: record.compressed,
            compressed_size: record.compressed_size,
            uncompressed_size: record.uncompressed_size,
        }
    }

    /// The last path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// The extension of the file name, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name();
        name.rfind('.').map(|dot| &name[dot + 1..])
    }

    /// Relative output path for extraction.
    pub fn output_path(&self) -> PathBuf {
        self.path.split('/').collect()
    }
}

impl fmt::Display for VolumeFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | Offset: {:08X} | Compressed: {} | ZSize: {:08X} | Size: {:08X}",
            self.path,
            self.offset,
            self.compressed,
            self.compressed_size,
            self.uncompressed_size
        )
    }
}

/// Join a parent path and a name with `/`.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

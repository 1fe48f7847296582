//! Directory pages.
//!
//! A page holds either index records or entry records:
//!
//! ```text
//! 1 bit       is_index
//! 11 bits     record_count
//! 12 bits     byte offset of record i, for i in 1..record_count
//! ...         pad to a byte boundary; record 0 starts here
//! records     byte-aligned, in name order
//! ...         pad to 64 bytes
//! ```
//!
//! Record offsets are measured from the start of the page. Pages stay
//! encrypted in memory; [`PageView`] searches them by decrypting only the
//! bytes it compares.

use std::cmp::Ordering;

use gtvol_common::{BitReader, BitWriter, VarIntFlavor};

use crate::cipher;
use crate::entry::{Entry, IndexRecord};
use crate::{Error, Result};

/// Maximum encoded page size before padding.
pub const MAX_PAGE_PAYLOAD: usize = 0x1000;

/// Largest record count the 11-bit header field can hold.
pub const MAX_RECORD_COUNT: usize = 0x7FF;

/// Largest record offset a 12-bit slot can hold.
pub const MAX_RECORD_OFFSET: usize = 0xFFF;

/// Pages are padded to this many bytes.
pub const PAGE_ALIGNMENT: usize = 0x40;

/// Bytes taken by the page header and offset table for `count` records.
#[inline]
pub fn offset_table_size(count: usize) -> usize {
    (12 * count.max(1)).div_ceil(8)
}

/// Whether a record of `size` bytes fits a page already holding
/// `record_count` records totalling `record_bytes`.
///
/// Accounts for the offset slot the new record adds to the table.
#[inline]
pub fn record_fits(record_count: usize, record_bytes: usize, size: usize) -> bool {
    record_count < MAX_RECORD_COUNT
        && offset_table_size(record_count + 1) + record_bytes + size <= MAX_PAGE_PAYLOAD
}

/// A decoded directory page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Index(Vec<IndexRecord>),
    Entries(Vec<Entry>),
}

impl Page {
    #[inline]
    pub fn is_index(&self) -> bool {
        matches!(self, Page::Index(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Page::Index(records) => records.len(),
            Page::Entries(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode a page. When `keyed` is set the bytes are still header-encrypted.
    pub fn decode(bytes: &[u8], keyed: bool, flavor: VarIntFlavor) -> Result<Self> {
        let mut reader = if keyed {
            BitReader::keyed(bytes, cipher::decrypt_byte, flavor)
        } else {
            BitReader::new(bytes, flavor)
        };

        let is_index = reader.read_bool_bit()?;
        let count = reader.read_bits(11)? as usize;

        let mut starts = Vec::with_capacity(count);
        if count > 0 {
            starts.push(offset_table_size(count));
        }
        for _ in 1..count {
            starts.push(reader.read_bits(12)? as usize);
        }
        if starts.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(Error::format("page record offsets are not ascending"));
        }
        if let Some(&last) = starts.last() {
            if last >= bytes.len() {
                return Err(Error::format(format!(
                    "record offset {last:#x} outside a {}-byte page",
                    bytes.len()
                )));
            }
        }

        if is_index {
            let mut records = Vec::with_capacity(count);
            for start in starts {
                reader.seek_bytes(start)?;
                records.push(IndexRecord::read(&mut reader)?);
            }
            Ok(Page::Index(records))
        } else {
            let mut entries = Vec::with_capacity(count);
            for start in starts {
                reader.seek_bytes(start)?;
                entries.push(Entry::read(&mut reader)?);
            }
            Ok(Page::Entries(entries))
        }
    }

    /// Encode the page in plaintext, padded to [`PAGE_ALIGNMENT`].
    pub fn encode(&self, flavor: VarIntFlavor) -> Result<Vec<u8>> {
        let mut writer = PageWriter::new(self.is_index(), flavor);
        match self {
            Page::Index(records) => {
                for record in records {
                    writer.push_index(record)?;
                }
            }
            Page::Entries(entries) => {
                for entry in entries {
                    writer.push_entry(entry)?;
                }
            }
        }
        writer.finish()
    }
}

/// Serializes records into a page, enforcing the header field limits.
#[derive(Debug)]
pub struct PageWriter {
    is_index: bool,
    flavor: VarIntFlavor,
    body: BitWriter,
    starts: Vec<usize>,
}

impl PageWriter {
    pub fn new(is_index: bool, flavor: VarIntFlavor) -> Self {
        Self {
            is_index,
            flavor,
            body: BitWriter::new(flavor),
            starts: Vec::new(),
        }
    }

    /// Number of records pushed so far.
    pub fn record_count(&self) -> usize {
        self.starts.len()
    }

    /// Size of the page so far, before padding.
    pub fn encoded_len(&self) -> usize {
        offset_table_size(self.starts.len()) + self.body.byte_len()
    }

    /// Whether a record of `size` bytes still fits.
    pub fn fits(&self, size: usize) -> bool {
        record_fits(self.starts.len(), self.body.byte_len(), size)
    }

    pub fn push_entry(&mut self, entry: &Entry) -> Result<()> {
        if self.is_index {
            return Err(Error::InvalidInput(format!(
                "entry '{}' pushed onto an index page",
                entry.name()
            )));
        }
        self.starts.push(self.body.byte_len());
        entry.write(&mut self.body)?;
        self.body.align_to_byte();
        Ok(())
    }

    pub fn push_index(&mut self, record: &IndexRecord) -> Result<()> {
        if !self.is_index {
            return Err(Error::InvalidInput(format!(
                "index key '{}' pushed onto an entry page",
                record.key
            )));
        }
        self.starts.push(self.body.byte_len());
        record.write(&mut self.body)?;
        self.body.align_to_byte();
        Ok(())
    }

    /// Assemble header, offset table and records.
    pub fn finish(self) -> Result<Vec<u8>> {
        let count = self.starts.len();
        if count > MAX_RECORD_COUNT {
            return Err(Error::CapacityExceeded {
                field: "record count",
                value: count,
                max: MAX_RECORD_COUNT,
            });
        }

        let table = offset_table_size(count);
        if table + self.body.byte_len() > MAX_PAGE_PAYLOAD {
            return Err(Error::CapacityExceeded {
                field: "page size",
                value: table + self.body.byte_len(),
                max: MAX_PAGE_PAYLOAD,
            });
        }

        let mut page = BitWriter::new(self.flavor);
        page.write_bool_bit(self.is_index);
        page.write_bits(count as u32, 11);
        for &start in self.starts.iter().skip(1) {
            let offset = table + start;
            if offset > MAX_RECORD_OFFSET {
                return Err(Error::CapacityExceeded {
                    field: "record offset",
                    value: offset,
                    max: MAX_RECORD_OFFSET,
                });
            }
            page.write_bits(offset as u32, 12);
        }
        page.align_to_byte();
        page.write_bytes(self.body.as_bytes());
        page.align_to(PAGE_ALIGNMENT);
        Ok(page.into_bytes())
    }
}

/// Outcome of searching a page for a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Record `i` carries exactly the name.
    Found(usize),
    /// The name sorts after index key `i`; continue in that child.
    Descend(usize),
    NotFound,
}

/// Read-only view over an encrypted page.
#[derive(Debug, Clone, Copy)]
pub struct PageView<'a> {
    bytes: &'a [u8],
    flavor: VarIntFlavor,
    is_index: bool,
    count: usize,
}

impl<'a> PageView<'a> {
    pub fn new(bytes: &'a [u8], flavor: VarIntFlavor) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::format("page shorter than its header"));
        }
        let header = (u16::from(cipher::decrypt_byte_at(bytes, 0)) << 8)
            | u16::from(cipher::decrypt_byte_at(bytes, 1));
        Ok(Self {
            bytes,
            flavor,
            is_index: header & 0x8000 != 0,
            count: usize::from((header >> 4) & 0x7FF),
        })
    }

    #[inline]
    pub fn is_index(&self) -> bool {
        self.is_index
    }

    #[inline]
    pub fn record_count(&self) -> usize {
        self.count
    }

    /// Byte offset of record `index` from the start of the page.
    pub fn record_offset(&self, index: usize) -> Result<usize> {
        if index >= self.count {
            return Err(Error::format(format!(
                "record {index} out of range for a page of {}",
                self.count
            )));
        }
        if index == 0 {
            return Ok(offset_table_size(self.count));
        }

        let mut reader = self.reader();
        reader.seek_bits(12 * index)?;
        Ok(reader.read_bits(12)? as usize)
    }

    /// Compare `key` with the name of record `index`, as `key.cmp(name)`.
    ///
    /// Bytes are compared one at a time; when one name is a prefix of the
    /// other the shorter sorts first.
    pub fn record_name_cmp(&self, index: usize, key: &[u8]) -> Result<Ordering> {
        let start = self.record_offset(index)?;
        let mut reader = self.reader();
        reader.seek_bytes(start + 1)?;
        let stored_len = reader.read_varint()? as usize;
        let name_start = reader.byte_position();
        if name_start + stored_len > self.bytes.len() {
            return Err(Error::format(format!(
                "name of record {index} runs past the end of its page"
            )));
        }

        for (i, &input) in key.iter().take(stored_len).enumerate() {
            let stored = cipher::decrypt_byte_at(self.bytes, name_start + i);
            if input != stored {
                return Ok(input.cmp(&stored));
            }
        }
        Ok(key.len().cmp(&stored_len))
    }

    /// Binary-search the page for `key`.
    pub fn find(&self, key: &str) -> Result<Lookup> {
        let key = key.as_bytes();
        let mut min = 0;
        let mut max = self.count;

        while min < max {
            let mid = (min + max) / 2;
            match self.record_name_cmp(mid, key)? {
                Ordering::Less => max = mid,
                Ordering::Greater => min = mid + 1,
                Ordering::Equal => return Ok(Lookup::Found(mid)),
            }
        }

        if min == 0 || !self.is_index {
            Ok(Lookup::NotFound)
        } else {
            Ok(Lookup::Descend(min - 1))
        }
    }

    /// Decode entry record `index`.
    pub fn entry(&self, index: usize) -> Result<Entry> {
        if self.is_index {
            return Err(Error::format("entry requested from an index page"));
        }
        let mut reader = self.reader();
        reader.seek_bytes(self.record_offset(index)?)?;
        Entry::read(&mut reader)
    }

    /// Decode index record `index`.
    pub fn index_record(&self, index: usize) -> Result<IndexRecord> {
        if !self.is_index {
            return Err(Error::format("index record requested from an entry page"));
        }
        let mut reader = self.reader();
        reader.seek_bytes(self.record_offset(index)?)?;
        IndexRecord::read(&mut reader)
    }

    fn reader(&self) -> BitReader<'a> {
        BitReader::keyed(self.bytes, cipher::decrypt_byte, self.flavor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{DirectoryRecord, FileRecord};

    fn file(name: &str, offset: u64, size: u32) -> Entry {
        Entry::File(FileRecord {
            name: name.to_string(),
            offset,
            compressed: false,
            compressed_size: size,
            uncompressed_size: size,
        })
    }

    fn encrypted(page: &Page) -> Vec<u8> {
        let mut bytes = page.encode(VarIntFlavor::Grouped).unwrap();
        cipher::encrypt_header(&mut bytes);
        bytes
    }

    fn sample_entries() -> Page {
        Page::Entries(vec![
            file("a.txt", 0, 10),
            Entry::Directory(DirectoryRecord {
                name: "dir".to_string(),
                page: 1,
            }),
            file("dir2", 0x40, 3),
            file("zeta", 0x80, 7),
        ])
    }

    #[test]
    fn test_offset_table_size() {
        assert_eq!(offset_table_size(0), 2);
        assert_eq!(offset_table_size(1), 2);
        assert_eq!(offset_table_size(2), 3);
        assert_eq!(offset_table_size(3), 5);
    }

    #[test]
    fn test_single_record_layout() {
        let page = Page::Entries(vec![file("a", 0, 1)]);
        let bytes = page.encode(VarIntFlavor::Grouped).unwrap();
        assert_eq!(bytes.len(), PAGE_ALIGNMENT);
        assert_eq!(&bytes[..7], &[0x00, 0x10, 0x00, 1, b'a', 0, 1]);
    }

    #[test]
    fn test_round_trip_plain_and_keyed() {
        let page = sample_entries();
        let plain = page.encode(VarIntFlavor::Grouped).unwrap();
        assert_eq!(plain.len() % PAGE_ALIGNMENT, 0);
        assert_eq!(Page::decode(&plain, false, VarIntFlavor::Grouped).unwrap(), page);

        let keyed = encrypted(&page);
        assert_eq!(Page::decode(&keyed, true, VarIntFlavor::Grouped).unwrap(), page);
    }

    #[test]
    fn test_empty_page() {
        let page = Page::Entries(Vec::new());
        let bytes = encrypted(&page);
        assert_eq!(Page::decode(&bytes, true, VarIntFlavor::Grouped).unwrap(), page);

        let view = PageView::new(&bytes, VarIntFlavor::Grouped).unwrap();
        assert_eq!(view.record_count(), 0);
        assert_eq!(view.find("anything").unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_view_finds_every_name() {
        let page = sample_entries();
        let bytes = encrypted(&page);
        let view = PageView::new(&bytes, VarIntFlavor::Grouped).unwrap();

        assert!(!view.is_index());
        assert_eq!(view.record_count(), 4);
        for (i, name) in ["a.txt", "dir", "dir2", "zeta"].iter().enumerate() {
            assert_eq!(view.find(name).unwrap(), Lookup::Found(i));
        }
        assert_eq!(view.entry(3).unwrap(), file("zeta", 0x80, 7));
    }

    #[test]
    fn test_view_misses_prefixes_and_extensions() {
        let bytes = encrypted(&sample_entries());
        let view = PageView::new(&bytes, VarIntFlavor::Grouped).unwrap();

        for name in ["", "a", "a.tx", "a.txt2", "di", "dir22", "zeta0", "zz", "0"] {
            assert_eq!(view.find(name).unwrap(), Lookup::NotFound, "{name}");
        }
    }

    #[test]
    fn test_index_page_descends() {
        let page = Page::Index(vec![
            IndexRecord {
                key: "alpha".to_string(),
                page: 2,
            },
            IndexRecord {
                key: "mango".to_string(),
                page: 3,
            },
        ]);
        let bytes = encrypted(&page);
        let view = PageView::new(&bytes, VarIntFlavor::Grouped).unwrap();

        assert!(view.is_index());
        assert_eq!(view.find("aardvark").unwrap(), Lookup::NotFound);
        assert_eq!(view.find("alpha").unwrap(), Lookup::Found(0));
        assert_eq!(view.find("banana").unwrap(), Lookup::Descend(0));
        assert_eq!(view.find("mango").unwrap(), Lookup::Found(1));
        assert_eq!(view.find("zebra").unwrap(), Lookup::Descend(1));
        assert_eq!(view.index_record(1).unwrap().page, 3);
        assert!(view.entry(0).is_err());
    }

    #[test]
    fn test_writer_capacity_accounting() {
        let mut writer = PageWriter::new(false, VarIntFlavor::Grouped);
        let mut pushed = 0;
        loop {
            let entry = file(&format!("file_{pushed:05}.bin"), 0, 1);
            if !writer.fits(entry.serialized_size(VarIntFlavor::Grouped)) {
                break;
            }
            writer.push_entry(&entry).unwrap();
            pushed += 1;
        }
        assert!(pushed > 100);
        assert!(writer.encoded_len() <= MAX_PAGE_PAYLOAD);
        let bytes = writer.finish().unwrap();
        assert!(bytes.len() <= MAX_PAGE_PAYLOAD);
    }

    #[test]
    fn test_writer_rejects_oversized_page() {
        let mut writer = PageWriter::new(false, VarIntFlavor::Grouped);
        for i in 0..400 {
            writer
                .push_entry(&file(&format!("file_{i:05}.bin"), 0, 1))
                .unwrap();
        }
        assert!(matches!(
            writer.finish(),
            Err(Error::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_writer_rejects_mixed_records() {
        let mut writer = PageWriter::new(true, VarIntFlavor::Grouped);
        assert!(writer.push_entry(&file("a", 0, 1)).is_err());
    }

    #[test]
    fn test_decode_rejects_descending_offsets() {
        // Two records, second offset pointing before the first.
        let bytes = [0x00, 0x20, 0x01, 0, 0, 0, 0, 0];
        assert!(matches!(
            Page::decode(&bytes, false, VarIntFlavor::Grouped),
            Err(Error::Format(_))
        ));
    }
}

//! Page layout.
//!
//! Directories are laid out in pre-order, the root first so it lands on
//! page 0. Each directory becomes a contiguous group of pages:
//!
//! ```text
//! [top index] [lower index levels ...] [entry pages ...]
//! ```
//!
//! A directory that fits one entry page gets no index. Otherwise the first
//! name of every entry page is indexed, and index pages are indexed in turn
//! until a single top page remains. A directory record points at the first
//! page of its group.
//!
//! Page ids are not known while a group is built, so references are kept as
//! [`PageRef`] placeholders and rewritten by a backpatch pass once every
//! group has its base id.

use gtvol_common::VarIntFlavor;
use log::debug;

use super::{NodeId, NodeKind, VolumeBuilder};
use crate::entry::{index_record_size, DirectoryRecord, Entry, FileRecord, IndexRecord, MAX_PAGE_ID};
use crate::page::{offset_table_size, record_fits, Page, MAX_PAGE_PAYLOAD};
use crate::{Error, Result};

/// A page reference awaiting its final id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRef {
    /// A page of the same directory group, by position in the group.
    Local(usize),
    /// The first page of another directory.
    Directory(NodeId),
}

#[derive(Debug, Clone)]
enum PendingEntry {
    File(FileRecord),
    Directory { name: String, node: NodeId },
}

impl PendingEntry {
    fn name(&self) -> &str {
        match self {
            PendingEntry::File(file) => &file.name,
            PendingEntry::Directory { name, .. } => name,
        }
    }

    fn serialized_size(&self, flavor: VarIntFlavor) -> usize {
        match self {
            PendingEntry::File(file) => Entry::File(file.clone()).serialized_size(flavor),
            PendingEntry::Directory { name, .. } => Entry::Directory(DirectoryRecord {
                name: name.clone(),
                page: 0,
            })
            .serialized_size(flavor),
        }
    }
}

#[derive(Debug, Clone)]
enum PendingPage {
    Index(Vec<(String, PageRef)>),
    Entries(Vec<PendingEntry>),
}

/// Lay out every directory and resolve all page references.
///
/// Must run after [`VolumeBuilder::write_payloads`], which fixes the file
/// offsets stored in entry records.
pub fn build_pages(builder: &VolumeBuilder) -> Result<Vec<Page>> {
    let flavor = builder.options().flavor;
    let directories = builder.directories_pre_order();

    let mut first_page = vec![None; builder.nodes.len()];
    let mut groups = Vec::with_capacity(directories.len());
    let mut next_id = 0usize;
    for &dir in &directories {
        let group = layout_directory(builder, dir, flavor)?;
        first_page[dir] = Some(next_id);
        next_id += group.len();
        groups.push((dir, group));
    }

    if next_id > MAX_PAGE_ID + 1 {
        return Err(Error::CapacityExceeded {
            field: "page count",
            value: next_id,
            max: MAX_PAGE_ID + 1,
        });
    }

    let resolve = |base: usize, reference: PageRef| -> Result<u16> {
        let id = match reference {
            PageRef::Local(index) => base + index,
            PageRef::Directory(node) => first_page[node].ok_or_else(|| {
                Error::InvalidInput(format!("directory node {node} was never laid out"))
            })?,
        };
        if id > MAX_PAGE_ID {
            return Err(Error::CapacityExceeded {
                field: "page id",
                value: id,
                max: MAX_PAGE_ID,
            });
        }
        Ok(id as u16)
    };

    let mut pages = Vec::with_capacity(next_id);
    for (dir, group) in groups {
        let base = first_page[dir].unwrap_or_default();
        for page in group {
            pages.push(match page {
                PendingPage::Index(records) => Page::Index(
                    records
                        .into_iter()
                        .map(|(key, reference)| -> Result<IndexRecord> {
                            Ok(IndexRecord {
                                key,
                                page: resolve(base, reference)?,
                            })
                        })
                        .collect::<Result<_>>()?,
                ),
                PendingPage::Entries(entries) => Page::Entries(
                    entries
                        .into_iter()
                        .map(|entry| -> Result<Entry> {
                            match entry {
                                PendingEntry::File(file) => Ok(Entry::File(file)),
                                PendingEntry::Directory { name, node } => {
                                    Ok(Entry::Directory(DirectoryRecord {
                                        name,
                                        page: resolve(base, PageRef::Directory(node))?,
                                    }))
                                }
                            }
                        })
                        .collect::<Result<_>>()?,
                ),
            });
        }
    }

    debug!(
        "laid out {} directories in {} pages",
        directories.len(),
        pages.len()
    );
    Ok(pages)
}

/// Build the page group of one directory with unresolved references.
fn layout_directory(
    builder: &VolumeBuilder,
    dir: NodeId,
    flavor: VarIntFlavor,
) -> Result<Vec<PendingPage>> {
    let entries = builder
        .children(dir)
        .iter()
        .map(|&child| pending_entry(builder, child))
        .collect::<Result<Vec<_>>>()?;

    let entry_pages = split_into_pages(entries, |entry| entry.serialized_size(flavor))?;
    if entry_pages.len() == 1 {
        return Ok(entry_pages.into_iter().map(PendingPage::Entries).collect());
    }

    // levels[0] indexes the entry pages, levels[k] indexes levels[k - 1].
    let mut levels: Vec<Vec<Vec<(String, usize)>>> = Vec::new();
    let mut keys: Vec<String> = entry_pages
        .iter()
        .map(|page| page.first().map(|e| e.name().to_string()).unwrap_or_default())
        .collect();
    loop {
        let count = keys.len();
        let items: Vec<(String, usize)> = keys.into_iter().enumerate().map(|(i, k)| (k, i)).collect();
        let level = split_into_pages(items, |(key, _)| index_record_size(key, flavor))?;
        if level.len() >= count {
            return Err(Error::CapacityExceeded {
                field: "index pages per level",
                value: level.len(),
                max: count - 1,
            });
        }

        keys = level
            .iter()
            .map(|page| page.first().map(|(key, _)| key.clone()).unwrap_or_default())
            .collect();
        let done = level.len() == 1;
        levels.push(level);
        if done {
            break;
        }
    }

    // Emission order is top level first, entry pages last.
    let mut level_start = vec![0; levels.len()];
    let mut position = 0;
    for k in (0..levels.len()).rev() {
        level_start[k] = position;
        position += levels[k].len();
    }
    let entry_start = position;

    let mut group = Vec::with_capacity(entry_start + entry_pages.len());
    for (k, level) in levels.into_iter().enumerate().rev() {
        let child_start = if k == 0 { entry_start } else { level_start[k - 1] };
        for page in level {
            group.push(PendingPage::Index(
                page.into_iter()
                    .map(|(key, child)| (key, PageRef::Local(child_start + child)))
                    .collect(),
            ));
        }
    }
    group.extend(entry_pages.into_iter().map(PendingPage::Entries));
    Ok(group)
}

fn pending_entry(builder: &VolumeBuilder, id: NodeId) -> Result<PendingEntry> {
    let node = builder.node(id);
    match &node.kind {
        NodeKind::Directory(_) => Ok(PendingEntry::Directory {
            name: node.name.clone(),
            node: id,
        }),
        NodeKind::File(file) => {
            let placement = file.placement.ok_or_else(|| {
                Error::InvalidInput(format!(
                    "'{}' has no payload; write payloads before laying out pages",
                    node.name
                ))
            })?;
            Ok(PendingEntry::File(FileRecord {
                name: node.name.clone(),
                offset: placement.offset,
                compressed: file.compressed,
                compressed_size: placement.stored_size,
                uncompressed_size: placement.size,
            }))
        }
    }
}

/// Greedily fill pages in order. Always returns at least one (possibly
/// empty) page.
fn split_into_pages<T>(items: Vec<T>, size_of: impl Fn(&T) -> usize) -> Result<Vec<Vec<T>>> {
    let mut pages = Vec::new();
    let mut current = Vec::new();
    let mut used = 0;

    for item in items {
        let size = size_of(&item);
        if offset_table_size(1) + size > MAX_PAGE_PAYLOAD {
            return Err(Error::CapacityExceeded {
                field: "record size",
                value: size,
                max: MAX_PAGE_PAYLOAD - offset_table_size(1),
            });
        }
        if !current.is_empty() && !record_fits(current.len(), used, size) {
            pages.push(std::mem::take(&mut current));
            used = 0;
        }
        used += size;
        current.push(item);
    }

    if !current.is_empty() || pages.is_empty() {
        pages.push(current);
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(builder: &mut VolumeBuilder) -> Vec<Page> {
        builder.write_payloads(&mut Vec::<u8>::new()).unwrap();
        build_pages(builder).unwrap()
    }

    #[test]
    fn test_split_respects_capacity() {
        let items: Vec<usize> = vec![1000; 9];
        let pages = split_into_pages(items, |&size| size).unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|page| page.len() <= 4));
    }

    #[test]
    fn test_split_empty() {
        let pages = split_into_pages(Vec::<usize>::new(), |&size| size).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].is_empty());
    }

    #[test]
    fn test_small_tree_layout() {
        let mut builder = VolumeBuilder::default();
        builder.add_bytes("a.txt", vec![0u8; 10]).unwrap();
        builder.add_bytes("dir/b.bin", vec![0u8; 5000]).unwrap();

        let pages = built(&mut builder);
        assert_eq!(pages.len(), 2);
        let Page::Entries(root) = &pages[0] else {
            panic!("root is not an entry page");
        };
        assert_eq!(root.len(), 2);
        assert_eq!(
            root[1],
            Entry::Directory(DirectoryRecord {
                name: "dir".to_string(),
                page: 1,
            })
        );
    }

    #[test]
    fn test_large_directory_gets_index() {
        let mut builder = VolumeBuilder::default();
        for i in 0..600 {
            builder
                .add_bytes(&format!("big/file_{i:04}.png"), vec![i as u8])
                .unwrap();
        }
        builder.add_bytes("small/only.png", vec![1]).unwrap();

        let pages = built(&mut builder);
        let Page::Entries(root) = &pages[0] else {
            panic!("root is not an entry page");
        };
        let big = match &root[0] {
            Entry::Directory(dir) => usize::from(dir.page),
            other => panic!("unexpected {other:?}"),
        };
        let small = match &root[1] {
            Entry::Directory(dir) => usize::from(dir.page),
            other => panic!("unexpected {other:?}"),
        };

        let Page::Index(index) = &pages[big] else {
            panic!("large directory does not start with an index page");
        };
        assert!(index.len() > 1);
        assert_eq!(index[0].key, "file_0000.png");

        let mut reached = 0;
        for record in index {
            let Page::Entries(entries) = &pages[usize::from(record.page)] else {
                panic!("index child is not an entry page");
            };
            assert_eq!(entries[0].name(), record.key);
            reached += entries.len();
        }
        assert_eq!(reached, 600);
        assert_eq!(small, big + 1 + index.len());
    }

    #[test]
    fn test_every_page_encodes_within_capacity() {
        let mut builder = VolumeBuilder::default();
        for i in 0..3000 {
            builder
                .add_bytes(&format!("d/{i:05}_a_rather_long_file_name_for_packing.png"), vec![0])
                .unwrap();
        }
        let pages = built(&mut builder);
        for page in &pages {
            let bytes = page.encode(VarIntFlavor::Grouped).unwrap();
            assert!(bytes.len() <= MAX_PAGE_PAYLOAD);
        }
    }

    #[test]
    fn test_layout_requires_payloads() {
        let mut builder = VolumeBuilder::default();
        builder.add_bytes("a.txt", vec![1]).unwrap();
        assert!(matches!(build_pages(&builder), Err(Error::InvalidInput(_))));
    }
}

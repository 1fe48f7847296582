//! Volume reader.
//!
//! The file is memory-mapped. The table of contents stays encrypted in the
//! map; pages are decoded through a keyed bit reader during the initial walk
//! and searched in place by [`Volume::find`].

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use gtvol_common::BinaryReader;
use log::{debug, info, warn};
use memmap2::Mmap;

use crate::cipher;
use crate::entry::{join_path, Entry, VolumeFile};
use crate::header::VolumeHeader;
use crate::options::ReadOptions;
use crate::page::{Lookup, Page, PageView, PAGE_ALIGNMENT};
use crate::payload;
use crate::tree::{DirNode, DirTree};
use crate::{Error, Result};

/// Outcome of a bulk extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtractSummary {
    /// Files written successfully.
    pub extracted: usize,
    /// Paths of files skipped because their payload was malformed.
    pub skipped: Vec<String>,
}

impl ExtractSummary {
    fn record(&mut self, file: &VolumeFile, outcome: Result<PathBuf>) -> Result<()> {
        match outcome {
            Ok(_) => self.extracted += 1,
            Err(e) if e.is_recoverable() => {
                warn!("skipping {}: {e}", file.path);
                self.skipped.push(file.path.clone());
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// A GT.VOL volume opened for reading.
pub struct Volume {
    mmap: Mmap,
    name: String,
    header: VolumeHeader,
    folder_offsets: Vec<u16>,
    options: ReadOptions,
    files: Vec<VolumeFile>,
    tree: DirTree,
}

impl Volume {
    /// Open a volume with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    /// Open a volume, parse its header and walk its table of contents.
    pub fn open_with<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let header = VolumeHeader::parse(&mmap)?;
        let folder_offsets = Self::read_folder_offsets(&mmap, &header)?;
        debug!(
            "{name}: toc at {:#x} ({} bytes, {} pages), data at {:#x}",
            header.toc_offset(),
            header.toc_length,
            header.folder_count,
            header.data_offset()
        );

        let mut volume = Self {
            mmap,
            name,
            header,
            folder_offsets,
            options,
            files: Vec::new(),
            tree: DirTree::new(),
        };
        let (files, tree) = volume.walk()?;
        volume.files = files;
        volume.tree = tree;

        info!(
            "opened {} with {} files in {} directories",
            volume.name,
            volume.files.len(),
            volume.tree.len()
        );
        Ok(volume)
    }

    /// Get the volume file name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    #[inline]
    pub fn options(&self) -> ReadOptions {
        self.options
    }

    /// Page boundaries in 64-byte units, one more than the page count.
    #[inline]
    pub fn folder_offsets(&self) -> &[u16] {
        &self.folder_offsets
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.folder_offsets.len() - 1
    }

    /// Every file, in traversal order.
    #[inline]
    pub fn files(&self) -> &[VolumeFile] {
        &self.files
    }

    #[inline]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    #[inline]
    pub fn tree(&self) -> &DirTree {
        &self.tree
    }

    #[inline]
    pub fn root(&self) -> &DirNode {
        self.tree.root()
    }

    /// Files sorted by payload offset, the order they sit on disk.
    pub fn files_by_offset(&self) -> Vec<&VolumeFile> {
        let mut files: Vec<&VolumeFile> = self.files.iter().collect();
        files.sort_by_key(|file| file.offset);
        files
    }

    /// Decode page `id`.
    pub fn page(&self, id: usize) -> Result<Page> {
        Page::decode(self.page_bytes(id)?, true, self.options.flavor)
    }

    /// Resolve a `/`-separated path by searching the encrypted pages.
    ///
    /// Returns `None` when a component is missing or names a directory.
    pub fn find(&self, path: &str) -> Result<Option<VolumeFile>> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let Some((file_name, dirs)) = components.split_last() else {
            return Ok(None);
        };

        let mut page = 0;
        let mut parent = String::new();
        for dir in dirs {
            match self.lookup(page, dir)? {
                Some(Entry::Directory(record)) => {
                    page = usize::from(record.page);
                    parent = join_path(&parent, dir);
                }
                _ => return Ok(None),
            }
        }

        match self.lookup(page, file_name)? {
            Some(Entry::File(record)) => Ok(Some(VolumeFile::from_record(&parent, &record))),
            _ => Ok(None),
        }
    }

    /// Read and decode the contents of a file.
    pub fn read(&self, file: &VolumeFile) -> Result<Vec<u8>> {
        let start = self.header.data_offset() + file.offset;
        let end = start + u64::from(file.compressed_size);
        if end > self.mmap.len() as u64 {
            return Err(Error::MalformedPayload(format!(
                "{}: payload {start:#x}..{end:#x} extends past the end of the volume",
                file.path
            )));
        }

        let mut data = self.mmap[start as usize..end as usize].to_vec();
        cipher::decrypt_stream(start, &mut data);

        if !file.compressed {
            return Ok(data);
        }
        payload::unframe(&data, file.uncompressed_size).map_err(|e| match e {
            Error::MalformedPayload(reason) => {
                Error::MalformedPayload(format!("{}: {reason}", file.path))
            }
            other => other,
        })
    }

    /// Read a file by path.
    pub fn read_path(&self, path: &str) -> Result<Vec<u8>> {
        let file = self
            .find(path)?
            .ok_or_else(|| Error::EntryNotFound(path.to_string()))?;
        self.read(&file)
    }

    /// Extract one file below `dest`, creating parent directories.
    pub fn extract(&self, file: &VolumeFile, dest: &Path) -> Result<PathBuf> {
        let data = self.read(file)?;
        let output = dest.join(file.output_path());
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&output, data)?;
        Ok(output)
    }

    /// Extract every file in offset order.
    ///
    /// Files with malformed payloads are logged and skipped; any other
    /// error aborts. `progress` is called once per file.
    pub fn extract_all<F>(&self, dest: &Path, progress: F) -> Result<ExtractSummary>
    where
        F: FnMut(&VolumeFile),
    {
        self.extract_files(&self.files_by_offset(), dest, progress)
    }

    /// Extract a selection of files in offset order.
    pub fn extract_files<F>(
        &self,
        files: &[&VolumeFile],
        dest: &Path,
        mut progress: F,
    ) -> Result<ExtractSummary>
    where
        F: FnMut(&VolumeFile),
    {
        let mut ordered = files.to_vec();
        ordered.sort_by_key(|file| file.offset);

        let mut summary = ExtractSummary::default();
        for file in ordered {
            summary.record(file, self.extract(file, dest))?;
            progress(file);
        }
        Ok(summary)
    }

    /// Parallel form of [`extract_files`](Self::extract_files).
    #[cfg(feature = "parallel")]
    pub fn extract_parallel<F>(
        &self,
        files: &[&VolumeFile],
        dest: &Path,
        progress: F,
    ) -> Result<ExtractSummary>
    where
        F: FnMut(&VolumeFile) + Send,
    {
        use parking_lot::Mutex;
        use rayon::prelude::*;

        let state = Mutex::new((ExtractSummary::default(), progress));

        files.par_iter().try_for_each(|&file| {
            let outcome = self.extract(file, dest);
            let mut guard = state.lock();
            let (summary, progress) = &mut *guard;
            summary.record(file, outcome)?;
            progress(file);
            Ok::<(), Error>(())
        })?;

        Ok(state.into_inner().0)
    }

    /// Header block and table of contents with the header transform undone.
    ///
    /// The magic is left as stored.
    pub fn raw_header_and_toc(&self) -> Vec<u8> {
        let end = self.toc_end();
        let mut raw = self.mmap[..end].to_vec();
        cipher::decrypt_header(&mut raw[4..]);
        raw
    }

    // Internal methods

    fn toc_start(&self) -> usize {
        self.header.toc_offset() as usize
    }

    fn toc_end(&self) -> usize {
        self.toc_start() + self.header.toc_length as usize
    }

    fn page_bytes(&self, id: usize) -> Result<&[u8]> {
        if id >= self.page_count() {
            return Err(Error::format(format!(
                "page id {id} past the end of a {}-page table",
                self.page_count()
            )));
        }
        let start = self.toc_start() + usize::from(self.folder_offsets[id]) * PAGE_ALIGNMENT;
        let end = self.toc_start() + usize::from(self.folder_offsets[id + 1]) * PAGE_ALIGNMENT;
        Ok(&self.mmap[start..end])
    }

    fn read_folder_offsets(data: &[u8], header: &VolumeHeader) -> Result<Vec<u16>> {
        let toc_start = header.toc_offset();
        let toc_length = u64::from(header.toc_length);
        if toc_start + toc_length > data.len() as u64 {
            return Err(Error::format(format!(
                "table of contents {toc_start:#x}+{toc_length:#x} extends past the end of the volume"
            )));
        }
        if header.folder_count == 0 {
            return Err(Error::format("volume has no pages"));
        }

        let count = header.folder_count as usize + 1;
        let table_len = count * 2;
        if table_len as u64 > toc_length {
            return Err(Error::format(format!(
                "folder offset table of {count} entries does not fit a {toc_length}-byte table of contents"
            )));
        }

        let start = toc_start as usize;
        let mut table = data[start..start + table_len].to_vec();
        cipher::decrypt_header(&mut table);
        let mut offsets = BinaryReader::new(&table).read_u16_array(count)?;

        match check_folder_offsets(&offsets, toc_length) {
            Ok(()) => Ok(offsets),
            // Some packers count the terminator in folder_count, so the last
            // slot is read from padding.
            Err(e) if count > 2 && check_folder_offsets(&offsets[..count - 1], toc_length).is_ok() => {
                debug!("ignoring trailing folder offset {:#x}: {e}", offsets[count - 1]);
                offsets.truncate(count - 1);
                Ok(offsets)
            }
            Err(e) => Err(e),
        }
    }

    /// Descend from `page` through index pages to the entry named `name`.
    fn lookup(&self, mut page: usize, name: &str) -> Result<Option<Entry>> {
        for _ in 0..=self.page_count() {
            let view = PageView::new(self.page_bytes(page)?, self.options.flavor)?;
            match view.find(name)? {
                Lookup::Found(i) | Lookup::Descend(i) if view.is_index() => {
                    page = usize::from(view.index_record(i)?.page);
                }
                Lookup::Found(i) => return Ok(Some(view.entry(i)?)),
                _ => return Ok(None),
            }
        }
        Err(Error::format("index pages form a cycle"))
    }

    /// Walk every page reachable from the root.
    fn walk(&self) -> Result<(Vec<VolumeFile>, DirTree)> {
        let pages = (0..self.page_count())
            .map(|id| self.page(id))
            .collect::<Result<Vec<_>>>()?;

        let mut referenced = vec![false; pages.len()];
        for page in &pages {
            for child in child_pages(page) {
                if let Some(slot) = referenced.get_mut(child) {
                    *slot = true;
                }
            }
        }

        let mut visited = vec![false; pages.len()];
        let mut files = Vec::new();
        let mut tree = DirTree::new();
        let mut pending = vec![(0usize, DirTree::ROOT)];

        while let Some((id, node)) = pending.pop() {
            let page = pages.get(id).ok_or_else(|| {
                Error::format(format!(
                    "page id {id} past the end of a {}-page table",
                    pages.len()
                ))
            })?;
            if std::mem::replace(&mut visited[id], true) {
                return Err(Error::format(format!("page {id} is reachable twice")));
            }

            match page {
                Page::Entries(entries) => {
                    let mut subdirs = Vec::new();
                    for entry in entries {
                        match entry {
                            Entry::File(record) => {
                                tree.add_file(node, files.len());
                                files.push(VolumeFile::from_record(tree.path(node), record));
                            }
                            Entry::Directory(record) => {
                                let child = tree.add_dir(node, &record.name, record.page);
                                subdirs.push((usize::from(record.page), child));
                            }
                        }
                    }
                    pending.extend(subdirs.into_iter().rev());
                }
                Page::Index(records) => {
                    let mut children: Vec<(usize, usize)> = records
                        .iter()
                        .map(|record| (usize::from(record.page), node))
                        .collect();
                    if let Some(last) = records.last() {
                        let terminator = usize::from(last.page) + 1;
                        if terminator < pages.len() && !referenced[terminator] {
                            children.push((terminator, node));
                        }
                    }
                    pending.extend(children.into_iter().rev());
                }
            }
        }

        let unvisited = visited.iter().filter(|seen| !**seen).count();
        if unvisited > 0 {
            debug!("{}: {unvisited} pages not reachable from the root", self.name);
        }
        Ok((files, tree))
    }
}

/// Validate a folder-offset table of `offsets.len() - 1` pages.
fn check_folder_offsets(offsets: &[u16], toc_length: u64) -> Result<()> {
    if offsets.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(Error::format("folder offsets are not ascending"));
    }
    let table_len = offsets.len() * 2;
    let first = offsets.first().map_or(0, |&o| usize::from(o) * PAGE_ALIGNMENT);
    let last = offsets.last().map_or(0, |&o| usize::from(o) * PAGE_ALIGNMENT);
    if first < table_len || last as u64 > toc_length {
        return Err(Error::format(format!(
            "pages span {first:#x}..{last:#x} outside the table of contents"
        )));
    }
    Ok(())
}

/// Page ids referenced by the records of `page`.
fn child_pages(page: &Page) -> Vec<usize> {
    match page {
        Page::Index(records) => records.iter().map(|r| usize::from(r.page)).collect(),
        Page::Entries(entries) => entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Directory(record) => Some(usize::from(record.page)),
                Entry::File(_) => None,
            })
            .collect(),
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("name", &self.name)
            .field("pages", &self.page_count())
            .field("files", &self.files.len())
            .finish()
    }
}

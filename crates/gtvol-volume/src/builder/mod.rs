//! Volume builder.
//!
//! Building runs in three phases over one arena tree:
//!
//! 1. Payloads: files are read in depth-first order, framed when
//!    compressible, stream-encrypted at their blob offset and appended to a
//!    temporary blob.
//! 2. Pages: every directory is split into entry pages, topped with index
//!    levels when it needs more than one, and the cross-page references are
//!    backpatched once all pages have ids (see [`layout`]).
//! 3. Output: header and table of contents are header-encrypted, then the
//!    blob is appended and the file padded to a whole data chunk.

mod import;
pub mod layout;
pub mod toc;

pub use import::is_compressible;

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::cipher;
use crate::entry::{check_record_name, join_path, PAYLOAD_ALIGNMENT};
use crate::header::{serial_date_at, VolumeHeader, BLOCK_SIZE, DATA_CHUNK_SIZE, HEADER_SIZE};
use crate::options::BuildOptions;
use crate::payload;
use crate::{Error, Result};

/// Files placed per batch. With `parallel` a whole batch is read and
/// compressed before any of it is written.
const PAYLOAD_BATCH: usize = 64;

/// Index of a node in the builder arena.
pub type NodeId = usize;

/// Where a file's bytes come from.
#[derive(Debug, Clone)]
pub(crate) enum PayloadSource {
    Path(PathBuf),
    Memory(Vec<u8>),
}

/// Position of a payload in the blob, known after the payload phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub offset: u64,
    pub stored_size: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct FileNode {
    pub source: PayloadSource,
    pub compressed: bool,
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Directory(Vec<NodeId>),
    File(FileNode),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub name: String,
    pub kind: NodeKind,
}

/// Statistics of a finished build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildSummary {
    pub files: usize,
    pub directories: usize,
    pub pages: usize,
    pub toc_length: usize,
    /// Size of the payload area before the final padding.
    pub data_size: u64,
}

struct PreparedPayload {
    bytes: Vec<u8>,
    size: u32,
}

/// Builds a volume from a directory tree or from files added one by one.
#[derive(Debug, Clone)]
pub struct VolumeBuilder {
    options: BuildOptions,
    nodes: Vec<Node>,
}

impl Default for VolumeBuilder {
    fn default() -> Self {
        Self::new(BuildOptions::default())
    }
}

impl VolumeBuilder {
    /// Id of the root directory.
    pub const ROOT: NodeId = 0;

    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            nodes: vec![Node {
                name: String::new(),
                kind: NodeKind::Directory(Vec::new()),
            }],
        }
    }

    #[inline]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn file_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node.kind, NodeKind::File(_)))
            .count()
    }

    /// Number of directories, including the root.
    pub fn directory_count(&self) -> usize {
        self.nodes.len() - self.file_count()
    }

    /// Add a file read from `source` at `volume_path`.
    ///
    /// Missing parent directories are created. Compression follows
    /// [`is_compressible`].
    pub fn add_file<P: Into<PathBuf>>(&mut self, volume_path: &str, source: P) -> Result<()> {
        let source = source.into();
        let size = fs::metadata(&source)?.len();
        check_payload_size(size, volume_path)?;
        self.add_source(volume_path, PayloadSource::Path(source))
    }

    /// Add a file with in-memory contents at `volume_path`.
    pub fn add_bytes<D: Into<Vec<u8>>>(&mut self, volume_path: &str, data: D) -> Result<()> {
        let data = data.into();
        check_payload_size(data.len() as u64, volume_path)?;
        self.add_source(volume_path, PayloadSource::Memory(data))
    }

    /// Add an (initially empty) directory at `volume_path`.
    pub fn add_directory(&mut self, volume_path: &str) -> Result<NodeId> {
        let components = split_volume_path(volume_path)?;
        self.ensure_directory(&components)
    }

    /// Run the payload phase, appending every payload to `blob`.
    ///
    /// Returns the number of bytes written.
    pub fn write_payloads<W: Write>(&mut self, blob: &mut W) -> Result<u64> {
        let files = self.files_depth_first();
        let mut position = 0u64;

        for batch in files.chunks(PAYLOAD_BATCH) {
            let mut placed = Vec::with_capacity(batch.len());
            for (&id, payload) in batch.iter().zip(self.prepare_batch(batch)) {
                let mut payload = payload?;
                if position / PAYLOAD_ALIGNMENT > u64::from(u32::MAX) {
                    return Err(Error::CapacityExceeded {
                        field: "payload offset",
                        value: (position / PAYLOAD_ALIGNMENT) as usize,
                        max: u32::MAX as usize,
                    });
                }
                let stored_size = u32::try_from(payload.bytes.len()).map_err(|_| {
                    Error::CapacityExceeded {
                        field: "stored size",
                        value: payload.bytes.len(),
                        max: u32::MAX as usize,
                    }
                })?;

                cipher::encrypt_stream(position, &mut payload.bytes);
                blob.write_all(&payload.bytes)?;
                let padded = u64::from(stored_size).next_multiple_of(PAYLOAD_ALIGNMENT);
                write_zeros(blob, padded - u64::from(stored_size))?;

                placed.push((
                    id,
                    Placement {
                        offset: position,
                        stored_size,
                        size: payload.size,
                    },
                ));
                position += padded;
            }
            for (id, placement) in placed {
                self.set_placement(id, placement);
            }
            debug!("placed {} payloads, blob at {position:#x}", batch.len());
        }

        Ok(position)
    }

    /// Build the volume at `output`.
    pub fn build<P: AsRef<Path>>(&mut self, output: P) -> Result<BuildSummary> {
        let output = output.as_ref();

        let mut blob = tempfile::tempfile()?;
        let data_size = {
            let mut writer = BufWriter::new(&mut blob);
            let written = self.write_payloads(&mut writer)?;
            writer.flush()?;
            written
        };

        let pages = layout::build_pages(self)?;
        let toc = toc::write_toc(&pages, self.options.flavor)?;

        let prefix_len = BLOCK_SIZE + toc.len().next_multiple_of(BLOCK_SIZE);
        let header = VolumeHeader {
            serial_date: self
                .options
                .serial_date
                .unwrap_or_else(|| serial_date_at(std::time::SystemTime::now())),
            toc_block_offset: 0,
            data_block_offset: header_field("data block offset", (prefix_len - BLOCK_SIZE) / BLOCK_SIZE)?,
            folder_count: header_field("folder count", pages.len())?,
            toc_length: header_field("table of contents length", toc.len())?,
            data_chunk_count: header_field(
                "data chunk count",
                data_size.div_ceil(DATA_CHUNK_SIZE as u64) as usize,
            )?,
        };

        let mut prefix = vec![0u8; prefix_len];
        prefix[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        prefix[BLOCK_SIZE..BLOCK_SIZE + toc.len()].copy_from_slice(&toc);
        cipher::encrypt_header(&mut prefix[4..]);

        let mut out = BufWriter::new(File::create(output)?);
        out.write_all(&prefix)?;
        blob.seek(SeekFrom::Start(0))?;
        io::copy(&mut blob, &mut out)?;

        let written = prefix_len as u64 + data_size;
        write_zeros(&mut out, written.next_multiple_of(DATA_CHUNK_SIZE as u64) - written)?;
        out.flush()?;

        let summary = BuildSummary {
            files: self.file_count(),
            directories: self.directory_count(),
            pages: pages.len(),
            toc_length: toc.len(),
            data_size,
        };
        info!(
            "built {} with {} files, {} directories, {} pages",
            output.display(),
            summary.files,
            summary.directories,
            summary.pages
        );
        Ok(summary)
    }

    // Arena access

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub(crate) fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id].kind {
            NodeKind::Directory(children) => children,
            NodeKind::File(_) => &[],
        }
    }

    /// Directories in pre-order, root first.
    pub(crate) fn directories_pre_order(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut pending = vec![Self::ROOT];
        while let Some(id) = pending.pop() {
            order.push(id);
            let subdirs = self
                .children(id)
                .iter()
                .copied()
                .filter(|&child| matches!(self.nodes[child].kind, NodeKind::Directory(_)));
            let start = pending.len();
            pending.extend(subdirs);
            pending[start..].reverse();
        }
        order
    }

    /// Files in depth-first order, siblings in name order.
    pub(crate) fn files_depth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut pending = vec![Self::ROOT];
        while let Some(id) = pending.pop() {
            match &self.nodes[id].kind {
                NodeKind::File(_) => order.push(id),
                NodeKind::Directory(children) => pending.extend(children.iter().rev()),
            }
        }
        order
    }

    pub(crate) fn insert_child(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
    ) -> Result<NodeId> {
        if !name.is_ascii() {
            return Err(Error::InvalidInput(format!("name '{name}' is not ASCII")));
        }
        check_record_name(name).map_err(Error::InvalidInput)?;

        let position = match self
            .children(parent)
            .binary_search_by(|&child| self.nodes[child].name.as_bytes().cmp(name.as_bytes()))
        {
            Ok(_) => {
                return Err(Error::InvalidInput(format!(
                    "'{}' already exists",
                    join_path(&self.path_of(parent), name)
                )))
            }
            Err(position) => position,
        };

        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
        });
        if let NodeKind::Directory(children) = &mut self.nodes[parent].kind {
            children.insert(position, id);
        }
        Ok(id)
    }

    fn add_source(&mut self, volume_path: &str, source: PayloadSource) -> Result<()> {
        let components = split_volume_path(volume_path)?;
        let Some((name, dirs)) = components.split_last() else {
            return Err(Error::InvalidInput("empty volume path".to_string()));
        };
        let parent = self.ensure_directory(dirs)?;
        let file = FileNode {
            source,
            compressed: is_compressible(volume_path.trim_matches('/')),
            placement: None,
        };
        self.insert_child(parent, name, NodeKind::File(file))?;
        Ok(())
    }

    fn ensure_directory(&mut self, components: &[&str]) -> Result<NodeId> {
        let mut node = Self::ROOT;
        for component in components {
            let existing = self
                .children(node)
                .iter()
                .copied()
                .find(|&child| self.nodes[child].name == *component);
            node = match existing {
                Some(child) if matches!(self.nodes[child].kind, NodeKind::Directory(_)) => child,
                Some(child) => {
                    return Err(Error::InvalidInput(format!(
                        "'{}' is a file, not a directory",
                        self.path_of(child)
                    )))
                }
                None => self.insert_child(node, component, NodeKind::Directory(Vec::new()))?,
            };
        }
        Ok(node)
    }

    /// Full path of a node. Walks the arena, so only used for error messages.
    fn path_of(&self, id: NodeId) -> String {
        let mut chain = vec![id];
        while let Some(&last) = chain.last() {
            match self.parent_of(last) {
                Some(parent) if parent != Self::ROOT => chain.push(parent),
                _ => break,
            }
        }
        chain
            .iter()
            .rev()
            .filter(|&&node| node != Self::ROOT)
            .map(|&node| self.nodes[node].name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        (0..self.nodes.len()).find(|&candidate| self.children(candidate).contains(&id))
    }

    fn set_placement(&mut self, id: NodeId, placement: Placement) {
        if let NodeKind::File(file) = &mut self.nodes[id].kind {
            file.placement = Some(placement);
        }
    }

    fn prepare_payload(&self, id: NodeId) -> Result<PreparedPayload> {
        let NodeKind::File(file) = &self.nodes[id].kind else {
            return Err(Error::InvalidInput(format!(
                "node '{}' is not a file",
                self.nodes[id].name
            )));
        };

        let data = match &file.source {
            PayloadSource::Path(path) => fs::read(path)?,
            PayloadSource::Memory(bytes) => bytes.clone(),
        };
        let size = check_payload_size(data.len() as u64, &self.nodes[id].name)?;

        let bytes = if file.compressed {
            payload::frame(&data, self.options.compression_level)?
        } else {
            data
        };
        Ok(PreparedPayload { bytes, size })
    }

    /// Read and frame a batch in parallel; the whole batch is held in memory.
    #[cfg(feature = "parallel")]
    fn prepare_batch<'a>(
        &'a self,
        batch: &'a [NodeId],
    ) -> impl Iterator<Item = Result<PreparedPayload>> + 'a {
        use rayon::prelude::*;

        batch
            .par_iter()
            .map(|&id| self.prepare_payload(id))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Read and frame one payload at a time, as the writer asks for it.
    #[cfg(not(feature = "parallel"))]
    fn prepare_batch<'a>(
        &'a self,
        batch: &'a [NodeId],
    ) -> impl Iterator<Item = Result<PreparedPayload>> + 'a {
        batch.iter().map(move |&id| self.prepare_payload(id))
    }
}

fn split_volume_path(volume_path: &str) -> Result<Vec<&str>> {
    let components: Vec<&str> = volume_path.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Err(Error::InvalidInput(format!(
            "'{volume_path}' is not a volume path"
        )));
    }
    Ok(components)
}

/// Payload sizes are stored as signed 32-bit counts by the game.
fn check_payload_size(size: u64, name: &str) -> Result<u32> {
    if size > i32::MAX as u64 {
        return Err(Error::InvalidInput(format!(
            "'{name}' is {size} bytes, larger than a volume can hold"
        )));
    }
    Ok(size as u32)
}

fn header_field(field: &'static str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::CapacityExceeded {
        field,
        value,
        max: u32::MAX as usize,
    })
}

fn write_zeros<W: Write>(writer: &mut W, count: u64) -> Result<()> {
    io::copy(&mut io::repeat(0).take(count), writer)?;
    Ok(())
}

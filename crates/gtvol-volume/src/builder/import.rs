//! Importing a directory tree from disk.

use std::io;
use std::path::Path;

use log::{debug, info};
use walkdir::WalkDir;

use super::{check_payload_size, FileNode, NodeId, NodeKind, PayloadSource, VolumeBuilder};
use crate::entry::join_path;
use crate::manifest::MANIFEST_NAME;
use crate::{Error, Result};

/// Path prefixes of content the game streams without inflating.
const STORED_PREFIXES: &[&str] = &["sound_gt", "carsound", "movie", "replay"];

/// File name suffixes of already-compressed formats.
const STORED_SUFFIXES: &[&str] = &[".at3", ".sgd", "esgx", ".pmf", ".tbd", ".png"];

/// Individual files the game expects stored.
const STORED_PATHS: &[&str] = &["piece_gt5m/env/env2.txs", "crs/race.mdl"];

/// Whether the file at `volume_path` (forward slashes, no leading slash)
/// is stored compressed.
pub fn is_compressible(volume_path: &str) -> bool {
    !(STORED_PREFIXES
        .iter()
        .any(|prefix| volume_path.starts_with(prefix))
        || STORED_SUFFIXES
            .iter()
            .any(|suffix| volume_path.ends_with(suffix))
        || STORED_PATHS.contains(&volume_path))
}

impl VolumeBuilder {
    /// Add everything below `dir` to the volume root.
    ///
    /// Entries are taken in byte order of their names. A `files.txt` manifest
    /// at the top level is skipped.
    pub fn import<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        self.import_dir(dir, Self::ROOT, "")?;
        info!(
            "imported {} files in {} directories from {}",
            self.file_count(),
            self.directory_count(),
            dir.display()
        );
        Ok(())
    }

    fn import_dir(&mut self, dir: &Path, node: NodeId, prefix: &str) -> Result<()> {
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by(|a, b| {
                a.file_name()
                    .as_encoded_bytes()
                    .cmp(b.file_name().as_encoded_bytes())
            });

        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            let name = entry
                .file_name()
                .to_str()
                .filter(|name| name.is_ascii())
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "{} has a non-ASCII name",
                        entry.path().display()
                    ))
                })?
                .to_string();
            let volume_path = join_path(prefix, &name);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let child = self.insert_child(node, &name, NodeKind::Directory(Vec::new()))?;
                self.import_dir(entry.path(), child, &volume_path)?;
            } else if file_type.is_file() {
                if prefix.is_empty() && name == MANIFEST_NAME {
                    debug!("skipping manifest {}", entry.path().display());
                    continue;
                }
                let size = entry.metadata().map_err(io::Error::from)?.len();
                check_payload_size(size, &volume_path)?;

                let file = FileNode {
                    source: PayloadSource::Path(entry.into_path()),
                    compressed: is_compressible(&volume_path),
                    placement: None,
                };
                self.insert_child(node, &name, NodeKind::File(file))?;
            } else {
                debug!("skipping {}: not a regular file", entry.path().display());
            }
        }
        Ok(())
    }
}

//! gtvol CLI - Command-line tool for Gran Turismo PSP volume files.
//!
//! This is the main entry point for the gtvol command-line application.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use gtvol::prelude::*;
use gtvol::volume::manifest::MANIFEST_NAME;

/// Name of the decrypted header and table of contents dump.
const HEADER_TOC_DUMP: &str = "volume_toc_header.bin";

/// gtvol - Gran Turismo PSP volume packing tool
#[derive(Parser)]
#[command(name = "gtvol")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a folder into a volume file
    Pack {
        /// Folder to pack, usually an extracted game tree
        #[arg(short, long, env = "GTVOL_INPUT")]
        input: PathBuf,

        /// Output volume path (default: <input>_new.VOL next to the input)
        #[arg(short, long, env = "GTVOL_OUTPUT")]
        output: Option<PathBuf>,

        /// DEFLATE level for compressed files (0-9)
        #[arg(short, long, default_value_t = 6)]
        level: u32,

        /// Variable-length integer convention of the table of contents
        #[arg(long, value_enum, default_value_t = Flavor::Grouped)]
        varint: Flavor,
    },

    /// Unpack a volume file
    Unpack {
        /// Volume file, usually GT.VOL
        #[arg(short, long, env = "GTVOL_INPUT")]
        input: PathBuf,

        /// Output folder (default: <stem>.extracted next to the input)
        #[arg(short, long, env = "GTVOL_OUTPUT")]
        output: Option<PathBuf>,

        /// Filter pattern (glob-style) on volume paths
        #[arg(short, long)]
        filter: Option<String>,

        /// Save the decrypted header and table of contents next to the output folder
        #[arg(long)]
        save_volume_header_toc: bool,

        /// Variable-length integer convention of the table of contents
        #[arg(long, value_enum, default_value_t = Flavor::Grouped)]
        varint: Flavor,
    },

    /// List contents of a volume file
    List {
        /// Volume file, usually GT.VOL
        #[arg(short, long, env = "GTVOL_INPUT")]
        input: PathBuf,

        /// Filter pattern (glob-style) on volume paths
        #[arg(short, long)]
        filter: Option<String>,

        /// Show header and per-file details
        #[arg(short, long)]
        detailed: bool,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,

        /// Variable-length integer convention of the table of contents
        #[arg(long, value_enum, default_value_t = Flavor::Grouped)]
        varint: Flavor,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Flavor {
    /// Continuation bit in the top bit of every byte
    Grouped,
    /// Byte count in the leading bits of the first byte
    Prefixed,
}

impl From<Flavor> for VarIntFlavor {
    fn from(flavor: Flavor) -> Self {
        match flavor {
            Flavor::Grouped => VarIntFlavor::Grouped,
            Flavor::Prefixed => VarIntFlavor::Prefixed,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Pack {
            input,
            output,
            level,
            varint,
        } => {
            cmd_pack(&input, output, level, varint.into())?;
        }
        Commands::Unpack {
            input,
            output,
            filter,
            save_volume_header_toc,
            varint,
        } => {
            cmd_unpack(
                &input,
                output,
                filter.as_deref(),
                save_volume_header_toc,
                varint.into(),
            )?;
        }
        Commands::List {
            input,
            filter,
            detailed,
            json,
            varint,
        } => {
            cmd_list(&input, filter.as_deref(), detailed, json, varint.into())?;
        }
    }

    Ok(())
}

fn cmd_pack(input: &Path, output: Option<PathBuf>, level: u32, flavor: VarIntFlavor) -> Result<()> {
    if !input.is_dir() {
        anyhow::bail!("Input directory {} does not exist", input.display());
    }
    let output = output.unwrap_or_else(|| sibling(input, "_new.VOL"));

    println!("Packing {} -> {}", input.display(), output.display());

    let start = Instant::now();
    let options = BuildOptions::default()
        .flavor(flavor)
        .compression_level(level);
    let mut builder = VolumeBuilder::new(options);
    builder
        .import(input)
        .with_context(|| format!("Failed to scan {}", input.display()))?;

    println!(
        "Registered {} files in {} directories",
        builder.file_count(),
        builder.directory_count()
    );

    let summary = builder.build(&output).context("Failed to build volume")?;

    println!(
        "Built {} in {:?}: {} pages, ToC 0x{:X} bytes, data 0x{:X} bytes",
        output.display(),
        start.elapsed(),
        summary.pages,
        summary.toc_length,
        summary.data_size
    );

    Ok(())
}

fn cmd_unpack(
    input: &Path,
    output: Option<PathBuf>,
    filter: Option<&str>,
    save_header_toc: bool,
    flavor: VarIntFlavor,
) -> Result<()> {
    println!("Opening volume: {}", input.display());

    let start = Instant::now();
    let volume = open_volume(input, flavor)?;
    let output = output.unwrap_or_else(|| {
        let absolute = fs::canonicalize(input).unwrap_or_else(|_| input.to_path_buf());
        absolute.with_extension("extracted")
    });

    println!(
        "Loaded {} files in {} directories in {:?}",
        volume.file_count(),
        volume.tree().len(),
        start.elapsed()
    );
    print_header(&volume);

    if save_header_toc {
        let dump = output
            .parent()
            .map(|parent| parent.join(HEADER_TOC_DUMP))
            .unwrap_or_else(|| PathBuf::from(HEADER_TOC_DUMP));
        fs::write(&dump, volume.raw_header_and_toc())
            .with_context(|| format!("Failed to write {}", dump.display()))?;
        info!("saved header and table of contents to {}", dump.display());
    }

    let selected = select_files(&volume, filter)?;
    println!("Extracting {} files to {}...", selected.len(), output.display());

    fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let pb = ProgressBar::new(selected.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    #[cfg(feature = "parallel")]
    let summary = volume.extract_parallel(&selected, &output, |_| pb.inc(1))?;
    #[cfg(not(feature = "parallel"))]
    let summary = volume.extract_files(&selected, &output, |_| pb.inc(1))?;
    pb.finish_with_message("Done");

    let manifest_path = output.join(MANIFEST_NAME);
    let mut manifest = BufWriter::new(
        File::create(&manifest_path)
            .with_context(|| format!("Failed to create {}", manifest_path.display()))?,
    );
    write_manifest(&mut manifest, selected.iter().copied())?;
    manifest.flush()?;

    for path in &summary.skipped {
        warn!("not extracted: {path}");
    }
    println!(
        "Extracted {} files in {:?} ({} skipped)",
        summary.extracted,
        start.elapsed(),
        summary.skipped.len()
    );

    Ok(())
}

fn cmd_list(
    input: &Path,
    filter: Option<&str>,
    detailed: bool,
    json: bool,
    flavor: VarIntFlavor,
) -> Result<()> {
    let volume = open_volume(input, flavor)?;
    let selected = select_files(&volume, filter)?;

    if json {
        let listing = serde_json::json!({
            "volume": volume.name(),
            "header": volume.header(),
            "files": selected,
        });
        let stdout = io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &listing)?;
        writeln!(out)?;
        return Ok(());
    }

    if detailed {
        print_header(&volume);
    }
    for file in &selected {
        if detailed {
            println!(
                "{:>10} {:>10} {} {}",
                file.compressed_size,
                file.uncompressed_size,
                if file.compressed { "Z" } else { " " },
                file.path
            );
        } else {
            println!("{}", file.path);
        }
    }

    println!("\nTotal: {} files", selected.len());

    Ok(())
}

fn open_volume(input: &Path, flavor: VarIntFlavor) -> Result<Volume> {
    if !input.is_file() {
        anyhow::bail!("Input volume {} does not exist", input.display());
    }
    Volume::open_with(input, ReadOptions::new().flavor(flavor))
        .with_context(|| format!("Failed to read volume {}", input.display()))
}

/// Files matching `filter`, or all of them.
fn select_files<'a>(volume: &'a Volume, filter: Option<&str>) -> Result<Vec<&'a VolumeFile>> {
    let Some(pattern) = filter else {
        return Ok(volume.files().iter().collect());
    };
    let pattern = glob::Pattern::new(pattern)
        .with_context(|| format!("Invalid filter pattern '{pattern}'"))?;
    Ok(volume
        .files()
        .iter()
        .filter(|file| pattern.matches(&file.path))
        .collect())
}

fn print_header(volume: &Volume) {
    let header = volume.header();
    let since_epoch = header
        .serial_time()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    println!("Volume Header:");
    println!("- Serial Date: {} (unix {since_epoch})", header.serial_date);
    println!("- ToC Block Offset: {}", header.toc_block_offset);
    println!("- File Data Block Offset: {}", header.data_block_offset);
    println!("- Folder Count: {}", header.folder_count);
    println!("- ToC Length: 0x{:08X}", header.toc_length);
    println!("- Data Chunks: 0x{:08X}", header.data_chunk_count);
    println!("- ToC Offset: 0x{:08X}", header.toc_offset());
    println!("- Data Offset: 0x{:08X}", header.data_offset());
}

/// `<parent>/<name><suffix>` for a path without a trailing separator.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "volume".to_string());
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{name}{suffix}"))
}

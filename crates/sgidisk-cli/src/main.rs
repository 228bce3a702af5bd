#![forbid(unsafe_code)]
//! sgidisk: read and extract from SGI disk images.
//!
//! Thin presentation shell over `sgidisk-core`: argument parsing, text and
//! JSON rendering, and exit-code mapping. All parsing and traversal lives
//! in the library crates.

use anyhow::{Context, Result, bail};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use glob::Pattern;
use serde::Serialize;
use sgidisk_core::{
    DirEntry, EfsInfo, EfsVolume, FileByteDevice, Volume, VolumeInfo, hash_report, match_entries,
};
use sgidisk_error::SgidiskError;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process;
use tracing::debug;

#[derive(Parser)]
#[command(name = "sgidisk")]
#[command(about = "Read SGI volume headers and EFS filesystems from disk images")]
struct Cli {
    /// Disk image to operate on
    image: PathBuf,

    /// Emit JSON instead of text
    #[arg(short = 'j', long, global = true)]
    json: bool,

    /// Report per-step progress on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Volume header operations
    Vh {
        #[command(subcommand)]
        cmd: VhCmd,
    },

    /// EFS filesystem operations on one partition
    Efs {
        /// Partition id from the volume header table
        #[arg(short, long)]
        partition: usize,

        #[command(subcommand)]
        cmd: EfsCmd,
    },

    /// Digest the image, its header block, and every file and partition
    Hash,
}

#[derive(Subcommand)]
enum VhCmd {
    /// Show the volume header: geometry, partitions, volume directory
    Info,

    /// Copy volume directory files matching a glob pattern
    Cp {
        /// Glob pattern over volume directory file names
        pattern: String,
        /// Destination file, or directory for multiple matches
        dest: PathBuf,
    },

    /// Copy the raw volume header block into a destination image
    CpHeader {
        /// Destination image file (created if missing)
        dest: PathBuf,
    },
}

#[derive(Subcommand)]
enum EfsCmd {
    /// Show the EFS superblock summary
    Info,

    /// List the root directory, optionally filtered by a glob pattern
    Ls {
        /// Glob pattern over entry names
        pattern: Option<String>,
    },

    /// Copy regular files matching a glob pattern out of the root directory
    Cp {
        /// Glob pattern over entry names
        pattern: String,
        /// Destination file, or directory for multiple matches
        dest: PathBuf,
    },
}

/// Outcome of one copy, for rendering.
#[derive(Debug, Serialize)]
struct CopyResult {
    name: String,
    dest: String,
    bytes: u64,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("error: {err:#}");
        process::exit(exit_code_for(&err));
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Map a failure to its process exit code. Library errors carry their own
/// code; anything else (argument problems, glob syntax) is code 1.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<SgidiskError>()
        .map_or(1, SgidiskError::exit_code)
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Vh { cmd } => match cmd {
            VhCmd::Info => vh_info(cli),
            VhCmd::Cp { pattern, dest } => vh_cp(cli, pattern, dest),
            VhCmd::CpHeader { dest } => vh_cp_header(cli, dest),
        },
        Commands::Efs { partition, cmd } => match cmd {
            EfsCmd::Info => efs_info(cli, *partition),
            EfsCmd::Ls { pattern } => efs_ls(cli, *partition, pattern.as_deref()),
            EfsCmd::Cp { pattern, dest } => efs_cp(cli, *partition, pattern, dest),
        },
        Commands::Hash => hash_cmd(cli),
    }
}

fn open_volume(cli: &Cli) -> Result<Volume<FileByteDevice>> {
    Ok(Volume::open(&cli.image)?)
}

// ── vh ──────────────────────────────────────────────────────────────────────

fn vh_info(cli: &Cli) -> Result<()> {
    let vol = open_volume(cli)?;
    let info = vol.info();

    if cli.json {
        println!("{}", serde_json::to_string(&info)?);
    } else {
        print_vh_info(&info);
    }
    Ok(())
}

fn print_vh_info(info: &VolumeInfo) {
    println!("Image size: {} bytes", info.image_bytes);
    println!("Sector size: {} bytes", info.sector_bytes);
    println!(
        "Geometry: {} cylinders, {} heads, {} sectors/track",
        info.cylinders, info.heads, info.sectors
    );
    println!(
        "Command tag queueing: {} (depth {})",
        if info.ctq_enabled { "on" } else { "off" },
        info.ctq_depth
    );
    println!("Root partition: {}", info.root_partition);
    println!("Swap partition: {}", info.swap_partition);
    println!(
        "Header checksum: {}",
        if info.checksum_ok { "ok" } else { "BAD" }
    );
    match &info.boot_file {
        Some(name) => println!("Boot file: {name}"),
        None => println!("No boot file listed."),
    }

    println!();
    println!("Partitions:");
    println!("  id  type        start        end     blocks  past-end");
    for p in &info.partitions {
        println!(
            "  {:>2}  {:<10} {:>6} {:>10} {:>10}  {}",
            p.id,
            p.kind_label,
            p.first_block,
            p.end_block,
            p.num_blocks,
            overrun_label(p.overrun_bytes),
        );
    }

    println!();
    println!("Volume directory:");
    println!("  id  name          start      bytes  past-end");
    for f in &info.volume_files {
        println!(
            "  {:>2}  {:<12} {:>6} {:>10}  {}",
            f.id,
            f.name,
            f.start_block,
            f.length_bytes,
            overrun_label(f.overrun_bytes),
        );
    }
}

fn overrun_label(overrun: Option<u64>) -> String {
    match overrun {
        Some(bytes) => format!("yes ({bytes} bytes)"),
        None => "-".to_owned(),
    }
}

fn vh_cp(cli: &Cli, pattern: &str, dest: &Path) -> Result<()> {
    let pattern = Pattern::new(pattern)
        .with_context(|| format!("invalid glob pattern '{pattern}'"))?;
    let vol = open_volume(cli)?;

    let matches = vol.matching_boot_files(&pattern)?;
    let dest_is_dir = fs::metadata(dest).map(|m| m.is_dir()).unwrap_or(false);
    if matches.len() > 1 && !dest_is_dir {
        bail!(
            "{} files match but '{}' is not a directory",
            matches.len(),
            dest.display()
        );
    }

    let mut results = Vec::with_capacity(matches.len());
    for (_, file) in matches {
        let name = file.name.clone().unwrap_or_default();
        let path = target_path(dest, dest_is_dir, &name);
        let mut out = File::create(&path).map_err(SgidiskError::WriteFailed)?;
        let bytes = vol.extract_boot_file(file, &mut out)?;
        results.push(CopyResult {
            name,
            dest: path.display().to_string(),
            bytes,
        });
    }

    render_copies(cli, &results)
}

fn vh_cp_header(cli: &Cli, dest: &Path) -> Result<()> {
    let vol = open_volume(cli)?;

    // Do not truncate: the destination may be a full image whose header is
    // being replaced.
    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .open(dest)
        .map_err(SgidiskError::WriteFailed)?;
    let bytes = vol.copy_header_to(&mut out)?;

    let results = [CopyResult {
        name: "header".to_owned(),
        dest: dest.display().to_string(),
        bytes,
    }];
    render_copies(cli, &results)
}

// ── efs ─────────────────────────────────────────────────────────────────────

fn efs_info(cli: &Cli, partition: usize) -> Result<()> {
    let vol = open_volume(cli)?;
    let efs = EfsVolume::open(&vol, partition)?;
    let info = efs.info();

    if cli.json {
        println!("{}", serde_json::to_string(&info)?);
    } else {
        print_efs_info(&info);
    }
    Ok(())
}

fn print_efs_info(info: &EfsInfo) {
    println!(
        "Partition {}: EFS ({} magic)",
        info.partition,
        if info.new_magic { "new" } else { "old" }
    );
    println!(
        "Filesystem: {} / pack {}",
        info.fname.as_deref().unwrap_or("-"),
        info.fpack.as_deref().unwrap_or("-")
    );
    println!("Size: {} blocks", info.total_blocks);
    println!(
        "Cylinder groups: {} x {} blocks starting at block {}",
        info.cg_count, info.cg_block_count, info.first_cg_block
    );
    println!(
        "Inodes: {} total, {} per group ({} blocks per group)",
        info.inode_count, info.inodes_per_group, info.cg_inode_blocks
    );
    println!(
        "Free: {} blocks, {} inodes",
        info.free_blocks, info.free_inodes
    );
    println!("State: {:?}", info.dirty);
    println!("Last update: {}", format_time(info.last_update));
}

fn efs_ls(cli: &Cli, partition: usize, pattern: Option<&str>) -> Result<()> {
    let pattern = pattern
        .map(|p| Pattern::new(p).with_context(|| format!("invalid glob pattern '{p}'")))
        .transpose()?;
    let vol = open_volume(cli)?;
    let efs = EfsVolume::open(&vol, partition)?;

    let entries = efs.list_dir(efs.root_inode())?;
    let selected = match_entries(&entries, pattern.as_ref());

    if cli.json {
        println!("{}", serde_json::to_string(&selected)?);
    } else {
        for entry in selected {
            print_entry(entry);
        }
    }
    Ok(())
}

fn print_entry(entry: &DirEntry) {
    println!(
        "{}{:04o} {:>5} {:>5} {:>9} {} {:>8}  {}",
        entry.kind.tag(),
        entry.permissions,
        entry.uid,
        entry.gid,
        entry.size,
        format_time(entry.mtime),
        entry.inode,
        entry.name
    );
}

fn efs_cp(cli: &Cli, partition: usize, pattern: &str, dest: &Path) -> Result<()> {
    let compiled = Pattern::new(pattern)
        .with_context(|| format!("invalid glob pattern '{pattern}'"))?;
    let vol = open_volume(cli)?;
    let efs = EfsVolume::open(&vol, partition)?;

    let entries = efs.list_dir(efs.root_inode())?;
    let files: Vec<&DirEntry> = match_entries(&entries, Some(&compiled))
        .into_iter()
        .filter(|entry| {
            if entry.kind.is_regular() {
                true
            } else {
                debug!(name = %entry.name, "skipping non-regular entry");
                false
            }
        })
        .collect();

    if files.is_empty() {
        return Err(SgidiskError::NotFound {
            pattern: pattern.to_owned(),
        }
        .into());
    }

    let dest_is_dir = fs::metadata(dest).map(|m| m.is_dir()).unwrap_or(false);
    if files.len() > 1 && !dest_is_dir {
        bail!(
            "{} files match but '{}' is not a directory",
            files.len(),
            dest.display()
        );
    }

    let mut results = Vec::with_capacity(files.len());
    for entry in files {
        let inode = efs.read_inode(sgidisk_core::InodeNumber(entry.inode))?;
        let path = target_path(dest, dest_is_dir, &entry.name);
        let mut out = File::create(&path).map_err(SgidiskError::WriteFailed)?;
        let bytes = efs.extract_to(&inode, &mut out)?;
        results.push(CopyResult {
            name: entry.name.clone(),
            dest: path.display().to_string(),
            bytes,
        });
    }

    render_copies(cli, &results)
}

// ── hash ────────────────────────────────────────────────────────────────────

fn hash_cmd(cli: &Cli) -> Result<()> {
    let vol = open_volume(cli)?;
    let report = hash_report(&vol)?;

    if cli.json {
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    println!("Image:");
    println!("  sha256  {}", report.image.sha256);
    println!("  blake3  {}", report.image.blake3);
    println!("Header block:");
    println!("  sha256  {}", report.header.sha256);
    println!("  blake3  {}", report.header.blake3);

    println!();
    println!("Volume files:");
    for item in &report.volume_files {
        println!("  {}{}", item.name, short_label(item.short_by));
        println!("    sha256  {}", item.digest.sha256);
        println!("    blake3  {}", item.digest.blake3);
    }

    println!();
    println!("Partitions:");
    for item in &report.partitions {
        println!("  {}{}", item.name, short_label(item.short_by));
        println!("    sha256  {}", item.digest.sha256);
        println!("    blake3  {}", item.digest.blake3);
    }
    Ok(())
}

fn short_label(short_by: Option<u64>) -> String {
    match short_by {
        Some(bytes) => format!("  (short by {bytes} bytes)"),
        None => String::new(),
    }
}

// ── shared helpers ──────────────────────────────────────────────────────────

fn target_path(dest: &Path, dest_is_dir: bool, name: &str) -> PathBuf {
    if dest_is_dir {
        dest.join(name)
    } else {
        dest.to_path_buf()
    }
}

fn render_copies(cli: &Cli, results: &[CopyResult]) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(&results)?);
    } else {
        for copy in results {
            println!("{} -> {} ({} bytes)", copy.name, copy.dest, copy.bytes);
        }
    }
    std::io::stdout()
        .flush()
        .map_err(SgidiskError::WriteFailed)?;
    Ok(())
}

fn format_time(epoch: i32) -> String {
    DateTime::from_timestamp(i64::from(epoch), 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_owned())
}

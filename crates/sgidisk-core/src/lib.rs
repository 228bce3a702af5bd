#![forbid(unsafe_code)]
//! Traversal, copy, and hash engines over SGI disk images.
//!
//! This crate drives the pure parsers in `sgidisk-ondisk` against a byte
//! source: open a volume, resolve a partition, walk EFS inodes and
//! directories, stream file contents, digest regions. Each command builds
//! its own `Volume` → `EfsVolume` chain and discards it on completion;
//! there is no shared state between operations.
//!
//! Errors cross this crate's boundary as `sgidisk_error::SgidiskError`;
//! parsing violations (`sgidisk_types::ParseError`) are converted here with
//! the context the parsers do not have.

pub mod device;
pub mod efs;
pub mod hash;
pub mod volume;

pub use device::{ByteDevice, FileByteDevice, MemoryByteDevice, read_vec_at};
pub use efs::{DirEntry, EfsInfo, EfsVolume, Inode, match_entries};
pub use hash::{ALGORITHMS, DigestPair, HashReport, ItemDigest, hash_header, hash_image, hash_report};
pub use volume::{PartitionInfo, PartitionSlice, Volume, VolumeFileInfo, VolumeInfo};

pub use sgidisk_types::{BlockNumber, InodeNumber, PartitionId};

use glob::MatchOptions;
use sgidisk_error::SgidiskError;
use sgidisk_types::ParseError;

/// Glob semantics used everywhere names are matched: case sensitive,
/// wildcards never cross a separator, leading dots must be literal.
pub const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Chunk size for streaming copies.
pub(crate) const COPY_CHUNK: usize = 64 * 1024;

/// Boundary conversion from a parsing violation to a reported error.
///
/// `what` names the structure being parsed, which the parse layer does not
/// know ("volume header", "directory block").
pub(crate) fn parse_to_error(err: &ParseError, what: &str) -> SgidiskError {
    match err {
        ParseError::InsufficientData { .. } => SgidiskError::Truncated(format!("{what}: {err}")),
        ParseError::InvalidMagic { .. } => SgidiskError::InvalidMagic(format!("{what}: {err}")),
        ParseError::InvalidField { .. } | ParseError::IntegerConversion { .. } => {
            SgidiskError::Corrupt(format!("{what}: {err}"))
        }
    }
}

#![forbid(unsafe_code)]
//! User-facing error taxonomy for sgidisk.
//!
//! Parsing violations are `sgidisk_types::ParseError`; this crate defines
//! the errors commands report to people. The crate is intentionally
//! independent of the parsing layer — `sgidisk-core` performs the boundary
//! conversion, adding context (which partition, which inode) that raw parse
//! errors do not carry.
//!
//! Every variant maps to exactly one process exit code via
//! [`SgidiskError::exit_code`]. The mapping is exhaustive — no wildcard arm —
//! so adding a variant is a compile error until its code is assigned.

use thiserror::Error;

/// Result alias for operations returning [`SgidiskError`].
pub type Result<T> = std::result::Result<T, SgidiskError>;

/// Errors surfaced to the presentation layer.
///
/// All parsing and validation failures arrive here as values; nothing in
/// the library panics on malformed images. Recoverable conditions (empty
/// partition slots, deleted directory entries, zero-length extents) are
/// skipped during traversal and never reach this type.
#[derive(Debug, Error)]
pub enum SgidiskError {
    /// Image or region shorter than the structure that should live there.
    #[error("truncated: {0}")]
    Truncated(String),

    /// Header or directory-block magic mismatch.
    #[error("invalid magic: {0}")]
    InvalidMagic(String),

    /// Structurally invalid data that is not a simple magic or length
    /// problem (bad field values, impossible table offsets).
    #[error("corrupt structure: {0}")]
    Corrupt(String),

    /// Partition id outside the table or pointing at an empty slot.
    #[error("no such partition: {id}")]
    NoSuchPartition { id: usize },

    /// The selected partition does not hold a usable EFS filesystem.
    #[error("partition {id} is not an EFS volume: {reason}")]
    NotEfs { id: usize, reason: String },

    /// Inode number outside the volume's inode table (or inode 0).
    #[error("bad inode number {ino}: {reason}")]
    BadInodeNumber { ino: u32, reason: String },

    /// Extent data inconsistent with the partition or with itself.
    #[error("corrupt extents in inode {ino}: {detail}")]
    CorruptExtents { ino: u32, detail: String },

    /// Directory operation on a non-directory inode.
    #[error("inode {ino} is not a directory")]
    NotADirectory { ino: u32 },

    /// No directory entry or volume file matched the requested name or
    /// pattern.
    #[error("no match for '{pattern}'")]
    NotFound { pattern: String },

    /// Read failure on the source image.
    #[error("read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    /// Write failure on the destination.
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),
}

impl SgidiskError {
    /// Process exit code for this error.
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 2 | image unreadable as a volume header (truncated, bad magic, corrupt) |
    /// | 3 | I/O failure on source or destination |
    /// | 4 | partition selection failed |
    /// | 5 | partition is not an EFS volume |
    /// | 6 | inode or extent data unusable |
    /// | 7 | directory operation on a non-directory |
    /// | 8 | nothing matched the requested name or pattern |
    ///
    /// Code 1 is reserved for argument errors in the presentation layer.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Truncated(_) | Self::InvalidMagic(_) | Self::Corrupt(_) => 2,
            Self::ReadFailed(_) | Self::WriteFailed(_) => 3,
            Self::NoSuchPartition { .. } => 4,
            Self::NotEfs { .. } => 5,
            Self::BadInodeNumber { .. } | Self::CorruptExtents { .. } => 6,
            Self::NotADirectory { .. } => 7,
            Self::NotFound { .. } => 8,
        }
    }
}

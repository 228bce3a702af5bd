#![forbid(unsafe_code)]
//! On-disk format parsing for SGI disk images.
//!
//! Pure parsing crate — no I/O, no side effects. Parses byte slices into
//! typed Rust structures representing the volume header (partition table,
//! embedded boot-file directory, device parameters) and the EFS filesystem
//! (superblock, inodes, extent descriptors, directory blocks).
//!
//! All multi-byte fields are big-endian; EFS offsets count 512-byte basic
//! blocks. Layout constants live in `sgidisk-types`.

pub mod efs;
pub mod volhdr;

pub use efs::{
    DirBlock, DirtyState, EfsInode, EfsSuperblock, Extent, InodeKind, RawDirEntry,
    parse_extent_records, parse_extent_table,
};
pub use volhdr::{
    DeviceParameters, PartitionEntry, PartitionType, VolumeFile, VolumeHeader, header_checksum,
    verify_header_checksum,
};

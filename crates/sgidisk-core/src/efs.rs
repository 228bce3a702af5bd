//! EFS traversal: superblock access, inode and extent resolution, directory
//! walking, and file streaming.
//!
//! An [`EfsVolume`] borrows an opened [`Volume`] and interprets one of its
//! partitions as an EFS filesystem. All traversal is a chain of pure offset
//! computations over the cylinder-group geometry, with every derived range
//! checked against the partition before it is read.

use crate::device::{ByteDevice, read_vec_at};
use crate::volume::{PartitionSlice, Volume};
use crate::{COPY_CHUNK, GLOB_OPTIONS, parse_to_error};
use glob::Pattern;
use serde::Serialize;
use sgidisk_error::{Result, SgidiskError};
use sgidisk_ondisk::efs::{
    DirBlock, DirtyState, EfsInode, EfsSuperblock, Extent, InodeKind, parse_extent_records,
};
use sgidisk_types::{
    EFS_BLOCK_SIZE, EFS_EXTENT_SIZE, EFS_INODE_SIZE, EFS_SUPERBLOCK_BLOCK, EFS_SUPERBLOCK_SIZE,
    InodeNumber,
};
use std::io::Write;
use tracing::{debug, info};

/// An inode with its extent list fully resolved and validated.
#[derive(Debug, Clone)]
pub struct Inode {
    pub number: InodeNumber,
    pub meta: EfsInode,
    /// Extents in logical file order: indirect lists expanded, unused slots
    /// dropped, contiguity and partition bounds verified.
    pub extents: Vec<Extent>,
}

/// One directory entry joined with its inode's metadata.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub inode: u32,
    pub kind: InodeKind,
    pub size: u64,
    pub mtime: i32,
    pub uid: u16,
    pub gid: u16,
    pub permissions: u16,
}

/// Structured EFS superblock report for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct EfsInfo {
    pub partition: usize,
    pub new_magic: bool,
    pub total_blocks: u64,
    pub first_cg_block: u64,
    pub cg_block_count: u64,
    pub cg_inode_blocks: u64,
    pub cg_count: u64,
    pub inodes_per_group: u64,
    pub inode_count: u64,
    pub free_blocks: i32,
    pub free_inodes: i32,
    pub dirty: DirtyState,
    pub fname: Option<String>,
    pub fpack: Option<String>,
    pub last_update: i32,
}

/// One partition of an opened volume, interpreted as an EFS filesystem.
#[derive(Debug)]
pub struct EfsVolume<'a, D> {
    device: &'a D,
    partition: PartitionSlice,
    superblock: EfsSuperblock,
}

impl<'a, D: ByteDevice> EfsVolume<'a, D> {
    /// Read and validate the superblock of partition `id`.
    ///
    /// A partition whose superblock has the wrong magic or impossible
    /// geometry is reported as not an EFS volume — a value, not a crash —
    /// so callers can degrade gracefully.
    pub fn open(volume: &'a Volume<D>, id: usize) -> Result<Self> {
        let partition = volume.partition(id)?;
        let sb_offset =
            partition.start_byte + EFS_SUPERBLOCK_BLOCK * EFS_BLOCK_SIZE as u64;
        let region = read_vec_at(volume.device(), sb_offset, EFS_SUPERBLOCK_SIZE)?;

        let superblock = EfsSuperblock::parse_region(&region).map_err(|err| {
            SgidiskError::NotEfs {
                id,
                reason: err.to_string(),
            }
        })?;
        superblock
            .validate_geometry(u64::from(partition.num_blocks))
            .map_err(|err| SgidiskError::NotEfs {
                id,
                reason: err.to_string(),
            })?;

        debug!(
            partition = id,
            cg_count = superblock.cg_count,
            total_blocks = superblock.total_blocks,
            "opened EFS volume"
        );
        Ok(Self {
            device: volume.device(),
            partition,
            superblock,
        })
    }

    #[must_use]
    pub fn superblock(&self) -> &EfsSuperblock {
        &self.superblock
    }

    #[must_use]
    pub fn partition(&self) -> &PartitionSlice {
        &self.partition
    }

    /// The fixed root directory inode of the format.
    #[must_use]
    pub fn root_inode(&self) -> InodeNumber {
        EfsSuperblock::root_inode()
    }

    /// Absolute byte offset of a basic block within the image.
    fn block_offset(&self, block: u64) -> u64 {
        self.partition.start_byte + block * EFS_BLOCK_SIZE as u64
    }

    /// Read an inode by number and resolve its extent list.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Inode> {
        let rel = self.superblock.inode_offset(ino).ok_or_else(|| {
            SgidiskError::BadInodeNumber {
                ino: ino.0,
                reason: if ino.0 == 0 {
                    "inode 0 is never allocated".to_owned()
                } else {
                    format!(
                        "outside the inode table ({} inodes)",
                        self.superblock.inode_count()
                    )
                },
            }
        })?;

        let raw = read_vec_at(self.device, self.partition.start_byte + rel, EFS_INODE_SIZE)?;
        let meta =
            EfsInode::parse_from_bytes(&raw).map_err(|err| SgidiskError::BadInodeNumber {
                ino: ino.0,
                reason: err.to_string(),
            })?;

        let extents = self.resolve_extents(ino, &meta)?;
        Ok(Inode {
            number: ino,
            meta,
            extents,
        })
    }

    /// Expand, order, and validate an inode's extent list.
    fn resolve_extents(&self, ino: InodeNumber, meta: &EfsInode) -> Result<Vec<Extent>> {
        let mut extents = if meta.has_indirect_extents() {
            self.expand_indirect(ino, meta)?
        } else {
            meta.direct_extents.clone()
        };
        extents.retain(|e| e.length > 0);
        // The stored per-extent logical offset is the file order; a sort is
        // a no-op on well-formed tables and the contiguity check below
        // rejects anything inconsistent.
        extents.sort_by_key(|e| e.offset);

        let mut logical_blocks = 0_u64;
        for extent in &extents {
            if u64::from(extent.offset) != logical_blocks {
                return Err(SgidiskError::CorruptExtents {
                    ino: ino.0,
                    detail: format!(
                        "extent at logical block {} does not continue from block {}",
                        extent.offset, logical_blocks
                    ),
                });
            }
            self.check_extent_bounds(ino, extent)?;
            logical_blocks += u64::from(extent.length);
        }

        if logical_blocks * (EFS_BLOCK_SIZE as u64) < meta.size {
            return Err(SgidiskError::CorruptExtents {
                ino: ino.0,
                detail: format!(
                    "extents cover {} blocks, file claims {} bytes",
                    logical_blocks, meta.size
                ),
            });
        }
        Ok(extents)
    }

    fn check_extent_bounds(&self, ino: InodeNumber, extent: &Extent) -> Result<()> {
        let end = u64::from(extent.block) + u64::from(extent.length);
        if end > self.superblock.total_blocks {
            return Err(SgidiskError::CorruptExtents {
                ino: ino.0,
                detail: format!(
                    "extent {}+{} runs past the filesystem ({} blocks)",
                    extent.block, extent.length, self.superblock.total_blocks
                ),
            });
        }
        Ok(())
    }

    /// Follow the direct table into indirect extent blocks and collect the
    /// full extent list.
    fn expand_indirect(&self, ino: InodeNumber, meta: &EfsInode) -> Result<Vec<Extent>> {
        let mut extents = Vec::with_capacity(meta.num_extents);
        let mut remaining = meta.num_extents;

        'pointers: for pointer in &meta.direct_extents {
            self.check_extent_bounds(ino, pointer)?;
            for block in 0..u64::from(pointer.length) {
                if remaining == 0 {
                    break 'pointers;
                }
                let take = (remaining * EFS_EXTENT_SIZE).min(EFS_BLOCK_SIZE);
                let offset = self.block_offset(u64::from(pointer.block) + block);
                let buf = read_vec_at(self.device, offset, take)?;
                let records = parse_extent_records(&buf).map_err(|err| {
                    SgidiskError::CorruptExtents {
                        ino: ino.0,
                        detail: err.to_string(),
                    }
                })?;
                remaining -= records.len();
                extents.extend(records);
            }
        }

        if remaining > 0 {
            return Err(SgidiskError::CorruptExtents {
                ino: ino.0,
                detail: format!(
                    "indirect blocks hold {} fewer extents than the inode claims",
                    remaining
                ),
            });
        }
        Ok(extents)
    }

    /// Map an inode's extents to physical block ranges in logical file
    /// order. Shared by directory decoding and file streaming.
    #[must_use]
    pub fn resolve_ranges(&self, inode: &Inode) -> Vec<(u64, u64)> {
        inode
            .extents
            .iter()
            .map(|e| (u64::from(e.block), u64::from(e.length)))
            .collect()
    }

    /// Stream a file's logical bytes into `sink`, truncating the final
    /// block's tail to the declared size. Returns bytes copied.
    pub fn extract_to<W: Write>(&self, inode: &Inode, sink: &mut W) -> Result<u64> {
        let mut remaining = inode.meta.size;
        for (start, count) in self.resolve_ranges(inode) {
            if remaining == 0 {
                break;
            }
            debug!(
                inode = inode.number.0,
                block = start,
                blocks = count,
                "streaming extent"
            );
            let mut offset = self.block_offset(start);
            let mut run_bytes = count * EFS_BLOCK_SIZE as u64;
            while run_bytes > 0 && remaining > 0 {
                let chunk = run_bytes.min(remaining).min(COPY_CHUNK as u64) as usize;
                let buf = read_vec_at(self.device, offset, chunk)?;
                sink.write_all(&buf).map_err(SgidiskError::WriteFailed)?;
                offset += chunk as u64;
                run_bytes -= chunk as u64;
                remaining -= chunk as u64;
            }
        }

        let copied = inode.meta.size - remaining;
        info!(inode = inode.number.0, bytes = copied, "extracted file");
        Ok(copied)
    }

    /// Decode a directory inode's blocks into entries, on-disk order
    /// preserved, with each entry's inode metadata joined in.
    pub fn list_dir(&self, ino: InodeNumber) -> Result<Vec<DirEntry>> {
        let dir = self.read_inode(ino)?;
        if !dir.meta.kind.is_directory() {
            return Err(SgidiskError::NotADirectory { ino: ino.0 });
        }

        // Decode only up to the directory's logical size; slack blocks past
        // it are not directory data.
        let mut blocks_left = dir.meta.size.div_ceil(EFS_BLOCK_SIZE as u64);
        let mut raw_entries = Vec::new();
        'blocks: for (start, count) in self.resolve_ranges(&dir) {
            for i in 0..count {
                if blocks_left == 0 {
                    break 'blocks;
                }
                blocks_left -= 1;
                let region = read_vec_at(self.device, self.block_offset(start + i), EFS_BLOCK_SIZE)?;
                let block = DirBlock::parse_region(&region)
                    .map_err(|err| parse_to_error(&err, "directory block"))?;
                raw_entries
                    .extend(block.entries().map_err(|err| parse_to_error(&err, "directory block"))?);
            }
        }

        let mut entries = Vec::with_capacity(raw_entries.len());
        for raw in raw_entries {
            let child = self.read_inode(InodeNumber(raw.inode))?;
            entries.push(DirEntry {
                name: raw.name_str(),
                inode: raw.inode,
                kind: child.meta.kind,
                size: child.meta.size,
                mtime: child.meta.mtime,
                uid: child.meta.uid,
                gid: child.meta.gid,
                permissions: child.meta.permissions(),
            });
        }
        Ok(entries)
    }

    /// Structured superblock report.
    #[must_use]
    pub fn info(&self) -> EfsInfo {
        let sb = &self.superblock;
        EfsInfo {
            partition: self.partition.id.0,
            new_magic: sb.is_new_magic(),
            total_blocks: sb.total_blocks,
            first_cg_block: sb.first_cg_block,
            cg_block_count: sb.cg_block_count,
            cg_inode_blocks: sb.cg_inode_blocks,
            cg_count: sb.cg_count,
            inodes_per_group: sb.inodes_per_group(),
            inode_count: sb.inode_count(),
            free_blocks: sb.free_blocks,
            free_inodes: sb.free_inodes,
            dirty: sb.dirty,
            fname: sb.fname.clone(),
            fpack: sb.fpack.clone(),
            last_update: sb.time,
        }
    }
}

/// Filter directory entries by an optional glob pattern against the entry
/// name only. No pattern passes everything; order is preserved either way.
#[must_use]
pub fn match_entries<'e>(entries: &'e [DirEntry], pattern: Option<&Pattern>) -> Vec<&'e DirEntry> {
    entries
        .iter()
        .filter(|entry| match pattern {
            None => true,
            Some(p) => p.matches_with(&entry.name, GLOB_OPTIONS),
        })
        .collect()
}

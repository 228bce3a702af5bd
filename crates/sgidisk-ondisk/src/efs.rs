//! EFS on-disk structure parsing: superblock, inodes, extents, directory
//! blocks.
//!
//! EFS counts everything in 512-byte basic blocks. A partition carries a
//! bootstrap block (block 0), the superblock (block 1), and a sequence of
//! cylinder groups starting at `fs_firstcg`; each group begins with its
//! slice of the inode table. File data lives in extents: contiguous runs of
//! basic blocks described by 8-byte packed descriptors.

use serde::{Deserialize, Serialize};
use sgidisk_types::{
    EFS_BLOCK_SIZE, EFS_DIRBLK_HEADER, EFS_DIRBLK_MAGIC, EFS_DIRBLK_SPACE, EFS_DIRECT_EXTENTS,
    EFS_EXTENT_SIZE, EFS_INODE_EXTENT_AREA, EFS_INODE_SIZE, EFS_MAGIC_NEW, EFS_MAGIC_OLD,
    EFS_MAX_EXTENTS, EFS_SUPERBLOCK_SIZE, InodeNumber, MODE_PERM_MASK, ParseError, S_IFBLK,
    S_IFBLKLNK, S_IFCHR, S_IFCHRLNK, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK,
    ensure_slice, non_negative_u64, read_be_i16, read_be_i32, read_be_u16, read_be_u24,
    read_be_u32, read_fixed, read_u8, trim_nul_padded,
};

// Superblock field offsets.
const OFF_FS_SIZE: usize = 0x00;
const OFF_FS_FIRSTCG: usize = 0x04;
const OFF_FS_CGFSIZE: usize = 0x08;
const OFF_FS_CGISIZE: usize = 0x0C;
const OFF_FS_SECTORS: usize = 0x0E;
const OFF_FS_HEADS: usize = 0x10;
const OFF_FS_NCG: usize = 0x12;
const OFF_FS_DIRTY: usize = 0x14;
const OFF_FS_TIME: usize = 0x18;
const OFF_FS_MAGIC: usize = 0x1C;
const OFF_FS_FNAME: usize = 0x20;
const OFF_FS_FPACK: usize = 0x26;
const OFF_FS_BMSIZE: usize = 0x2C;
const OFF_FS_TFREE: usize = 0x30;
const OFF_FS_TINODE: usize = 0x34;
const OFF_FS_BMBLOCK: usize = 0x38;
const OFF_FS_REPLSB: usize = 0x3C;
const OFF_FS_LASTIALLOC: usize = 0x40;
const OFF_FS_CHECKSUM: usize = 0x58;

// Inode field offsets.
const OFF_DI_MODE: usize = 0x00;
const OFF_DI_NLINK: usize = 0x02;
const OFF_DI_UID: usize = 0x04;
const OFF_DI_GID: usize = 0x06;
const OFF_DI_SIZE: usize = 0x08;
const OFF_DI_ATIME: usize = 0x0C;
const OFF_DI_MTIME: usize = 0x10;
const OFF_DI_CTIME: usize = 0x14;
const OFF_DI_GEN: usize = 0x18;
const OFF_DI_NUMEXTENTS: usize = 0x1C;
const OFF_DI_VERSION: usize = 0x1E;
const OFF_DI_EXTENTS: usize = 0x20;

/// Inodes per basic block of inode-table space.
const INODES_PER_BLOCK: u64 = (EFS_BLOCK_SIZE / EFS_INODE_SIZE) as u64;

/// Most entries that can exist in one directory block (minimal entry is a
/// 1-byte slot offset plus a 4-byte inode, 1-byte length, 1-byte name,
/// padded to a halfword).
const DIRBLK_MAX_ENTRIES: usize = EFS_DIRBLK_SPACE / 8;

/// Mount state recorded in the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirtyState {
    /// Unmounted and clean.
    Clean,
    /// Mounted and clean.
    Active,
    /// A dirty root filesystem that had to be mounted anyway.
    ActiveDirty,
    /// Known dirty.
    Dirty,
    /// Unrecognized state word.
    Unknown(i16),
}

impl DirtyState {
    #[must_use]
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            0x0000 => Self::Clean,
            0x7777 => Self::Active,
            0x0BAD => Self::ActiveDirty,
            0x1234 => Self::Dirty,
            other => Self::Unknown(other),
        }
    }
}

/// Parsed EFS superblock.
///
/// Geometry fields are validated and widened; bookkeeping fields (free
/// counts, bitmap location, timestamps) are carried as stored, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EfsSuperblock {
    /// Filesystem size in basic blocks.
    pub total_blocks: u64,
    /// Basic-block offset of the first cylinder group.
    pub first_cg_block: u64,
    /// Basic blocks per cylinder group.
    pub cg_block_count: u64,
    /// Basic blocks of inode table per cylinder group.
    pub cg_inode_blocks: u64,
    /// Number of cylinder groups.
    pub cg_count: u64,
    /// Sectors per track (informational).
    pub sectors: i16,
    /// Heads per cylinder (informational).
    pub heads: i16,
    /// Mount state.
    pub dirty: DirtyState,
    /// Last superblock update, seconds since the epoch.
    pub time: i32,
    /// Raw magic word as stored.
    pub magic: u32,
    /// Filesystem name.
    pub fname: Option<String>,
    /// Filesystem pack name.
    pub fpack: Option<String>,
    /// Size of the free-block bitmap in bytes.
    pub bitmap_bytes: i32,
    /// Total free data blocks.
    pub free_blocks: i32,
    /// Total free inodes.
    pub free_inodes: i32,
    /// Bitmap location (basic block).
    pub bitmap_block: i32,
    /// Location of the replicated superblock.
    pub replicated_sb_block: i32,
    /// Last allocated inode.
    pub last_inode_alloc: i32,
    /// Checksum of the volume portion of the filesystem.
    pub checksum: i32,
}

impl EfsSuperblock {
    /// Inode number of the root directory. The traversal entry point of
    /// every EFS volume is this fixed, format-defined inode.
    #[must_use]
    pub fn root_inode() -> InodeNumber {
        InodeNumber::ROOT
    }

    /// Parse a superblock from its on-disk region (basic block 1 of the
    /// partition). Accepts both the pre-3.3 and the 3.3+ magic.
    pub fn parse_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EFS_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EFS_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_be_u32(region, OFF_FS_MAGIC)?;
        if magic != EFS_MAGIC_OLD && magic != EFS_MAGIC_NEW {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EFS_MAGIC_NEW),
                actual: u64::from(magic),
            });
        }

        let total_blocks = non_negative_u64(read_be_i32(region, OFF_FS_SIZE)?.into(), "fs_size")?;
        let first_cg_block =
            non_negative_u64(read_be_i32(region, OFF_FS_FIRSTCG)?.into(), "fs_firstcg")?;
        let cg_block_count =
            non_negative_u64(read_be_i32(region, OFF_FS_CGFSIZE)?.into(), "fs_cgfsize")?;
        let cg_inode_blocks =
            non_negative_u64(read_be_i16(region, OFF_FS_CGISIZE)?.into(), "fs_cgisize")?;
        let cg_count = non_negative_u64(read_be_i16(region, OFF_FS_NCG)?.into(), "fs_ncg")?;

        Ok(Self {
            total_blocks,
            first_cg_block,
            cg_block_count,
            cg_inode_blocks,
            cg_count,
            sectors: read_be_i16(region, OFF_FS_SECTORS)?,
            heads: read_be_i16(region, OFF_FS_HEADS)?,
            dirty: DirtyState::from_raw(read_be_i16(region, OFF_FS_DIRTY)?),
            time: read_be_i32(region, OFF_FS_TIME)?,
            magic,
            fname: trim_nul_padded(&read_fixed::<6>(region, OFF_FS_FNAME)?),
            fpack: trim_nul_padded(&read_fixed::<6>(region, OFF_FS_FPACK)?),
            bitmap_bytes: read_be_i32(region, OFF_FS_BMSIZE)?,
            free_blocks: read_be_i32(region, OFF_FS_TFREE)?,
            free_inodes: read_be_i32(region, OFF_FS_TINODE)?,
            bitmap_block: read_be_i32(region, OFF_FS_BMBLOCK)?,
            replicated_sb_block: read_be_i32(region, OFF_FS_REPLSB)?,
            last_inode_alloc: read_be_i32(region, OFF_FS_LASTIALLOC)?,
            checksum: read_be_i32(region, OFF_FS_CHECKSUM)?,
        })
    }

    /// Whether the superblock carries the IRIX 3.3+ magic.
    #[must_use]
    pub fn is_new_magic(&self) -> bool {
        self.magic == EFS_MAGIC_NEW
    }

    /// Inodes per cylinder group.
    #[must_use]
    pub fn inodes_per_group(&self) -> u64 {
        self.cg_inode_blocks * INODES_PER_BLOCK
    }

    /// Total inode slots in the filesystem.
    #[must_use]
    pub fn inode_count(&self) -> u64 {
        self.cg_count * self.inodes_per_group()
    }

    /// Validate the cylinder-group geometry against the partition size.
    ///
    /// A partition whose superblock carries a valid magic but impossible
    /// geometry is not a usable EFS volume.
    pub fn validate_geometry(&self, partition_blocks: u64) -> Result<(), ParseError> {
        if self.cg_count == 0 {
            return Err(ParseError::InvalidField {
                field: "fs_ncg",
                reason: "cannot be zero",
            });
        }
        if self.cg_block_count == 0 {
            return Err(ParseError::InvalidField {
                field: "fs_cgfsize",
                reason: "cannot be zero",
            });
        }
        if self.cg_inode_blocks == 0 {
            return Err(ParseError::InvalidField {
                field: "fs_cgisize",
                reason: "cannot be zero",
            });
        }
        if self.cg_inode_blocks > self.cg_block_count {
            return Err(ParseError::InvalidField {
                field: "fs_cgisize",
                reason: "inode table larger than its cylinder group",
            });
        }

        let cg_end = self
            .cg_count
            .checked_mul(self.cg_block_count)
            .and_then(|span| span.checked_add(self.first_cg_block))
            .ok_or(ParseError::InvalidField {
                field: "fs_ncg",
                reason: "cylinder group span overflows",
            })?;
        if cg_end > self.total_blocks {
            return Err(ParseError::InvalidField {
                field: "fs_ncg",
                reason: "cylinder groups extend past filesystem size",
            });
        }
        if self.total_blocks > partition_blocks {
            return Err(ParseError::InvalidField {
                field: "fs_size",
                reason: "filesystem larger than its partition",
            });
        }
        Ok(())
    }

    /// Byte offset of an inode record within the partition, from the
    /// cylinder-group geometry. `None` for inode 0 and numbers past the
    /// inode table.
    #[must_use]
    pub fn inode_offset(&self, ino: InodeNumber) -> Option<u64> {
        let ino = u64::from(ino.0);
        if ino == 0 || ino >= self.inode_count() {
            return None;
        }
        let ipg = self.inodes_per_group();
        let cg = ino / ipg;
        let slot = ino % ipg;
        let cg_start = (self.first_cg_block + cg * self.cg_block_count) * EFS_BLOCK_SIZE as u64;
        Some(cg_start + slot * EFS_INODE_SIZE as u64)
    }
}

/// File type drawn from an inode's mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeKind {
    Fifo,
    CharDevice,
    CharDeviceLink,
    Directory,
    BlockDevice,
    BlockDeviceLink,
    Regular,
    Symlink,
    Socket,
}

impl InodeKind {
    #[must_use]
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & S_IFMT {
            S_IFIFO => Some(Self::Fifo),
            S_IFCHR => Some(Self::CharDevice),
            S_IFCHRLNK => Some(Self::CharDeviceLink),
            S_IFDIR => Some(Self::Directory),
            S_IFBLK => Some(Self::BlockDevice),
            S_IFBLKLNK => Some(Self::BlockDeviceLink),
            S_IFREG => Some(Self::Regular),
            S_IFLNK => Some(Self::Symlink),
            S_IFSOCK => Some(Self::Socket),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_directory(self) -> bool {
        self == Self::Directory
    }

    #[must_use]
    pub fn is_regular(self) -> bool {
        self == Self::Regular
    }

    /// Single-character tag for listings.
    #[must_use]
    pub fn tag(self) -> char {
        match self {
            Self::Fifo => 'p',
            Self::CharDevice | Self::CharDeviceLink => 'c',
            Self::Directory => 'd',
            Self::BlockDevice | Self::BlockDeviceLink => 'b',
            Self::Regular => '-',
            Self::Symlink => 'l',
            Self::Socket => 's',
        }
    }
}

/// An extent descriptor: a contiguous run of basic blocks.
///
/// On disk this is 8 bytes: a zero magic byte, a 24-bit block number, an
/// 8-bit length, and a 24-bit logical block offset into the file. For the
/// direct table of a file with indirect extents, the first entry's offset
/// field instead carries the total indirect-extent count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First basic block of the run, relative to the partition.
    pub block: u32,
    /// Run length in basic blocks.
    pub length: u8,
    /// Logical basic-block offset of the run within the file.
    pub offset: u32,
}

impl Extent {
    /// Decode one 8-byte extent descriptor.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let raw = ensure_slice(bytes, 0, EFS_EXTENT_SIZE)?;
        if raw[0] != 0 {
            return Err(ParseError::InvalidField {
                field: "ex_magic",
                reason: "must be zero",
            });
        }
        Ok(Self {
            block: read_be_u24(raw, 1)?,
            length: raw[4],
            offset: read_be_u24(raw, 5)?,
        })
    }

    /// Run length in bytes.
    #[must_use]
    pub fn len_bytes(&self) -> u64 {
        u64::from(self.length) * EFS_BLOCK_SIZE as u64
    }
}

/// Parse a packed run of extent descriptors, keeping every record.
///
/// Used for indirect extent blocks, where record count is how the reader
/// knows when the list ends.
pub fn parse_extent_records(buf: &[u8]) -> Result<Vec<Extent>, ParseError> {
    if buf.len() % EFS_EXTENT_SIZE != 0 {
        return Err(ParseError::InvalidField {
            field: "extent_table",
            reason: "not a multiple of the extent size",
        });
    }
    buf.chunks_exact(EFS_EXTENT_SIZE).map(Extent::parse).collect()
}

/// Parse a packed table of extent descriptors. Zero-length descriptors are
/// unused slots and are dropped.
pub fn parse_extent_table(buf: &[u8]) -> Result<Vec<Extent>, ParseError> {
    Ok(parse_extent_records(buf)?
        .into_iter()
        .filter(|extent| extent.length > 0)
        .collect())
}

/// Parsed EFS inode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EfsInode {
    /// File type.
    pub kind: InodeKind,
    /// Full mode word as stored.
    pub mode: u16,
    /// Link count.
    pub nlink: i16,
    /// Owner user id.
    pub uid: u16,
    /// Owner group id.
    pub gid: u16,
    /// File size in bytes.
    pub size: u64,
    /// Last access, seconds since the epoch.
    pub atime: i32,
    /// Last modification.
    pub mtime: i32,
    /// Last status change.
    pub ctime: i32,
    /// Generation number.
    pub generation: u32,
    /// Total extent count. Greater than [`EFS_DIRECT_EXTENTS`] means the
    /// direct table addresses indirect extent blocks.
    pub num_extents: usize,
    /// Inode format version.
    pub version: u8,
    /// Decoded direct extent table, unused slots dropped.
    pub direct_extents: Vec<Extent>,
}

impl EfsInode {
    /// Parse an inode from its 128-byte on-disk record.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EFS_INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EFS_INODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mode = read_be_u16(bytes, OFF_DI_MODE)?;
        let Some(kind) = InodeKind::from_mode(mode) else {
            return Err(ParseError::InvalidField {
                field: "di_mode",
                reason: "unknown file type bits",
            });
        };

        let size = non_negative_u64(read_be_i32(bytes, OFF_DI_SIZE)?.into(), "di_size")?;

        let num_extents_raw = read_be_i16(bytes, OFF_DI_NUMEXTENTS)?;
        let num_extents = usize::try_from(num_extents_raw)
            .map_err(|_| ParseError::IntegerConversion {
                field: "di_numextents",
            })?;
        if num_extents > EFS_MAX_EXTENTS {
            return Err(ParseError::InvalidField {
                field: "di_numextents",
                reason: "exceeds the format maximum",
            });
        }

        // Decode only as many table slots as the inode claims; with
        // indirect extents the whole table may be in play.
        let table_len = (num_extents * EFS_EXTENT_SIZE).min(EFS_INODE_EXTENT_AREA);
        let table = ensure_slice(bytes, OFF_DI_EXTENTS, table_len)?;
        let direct_extents = parse_extent_table(table)?;

        Ok(Self {
            kind,
            mode,
            nlink: read_be_i16(bytes, OFF_DI_NLINK)?,
            uid: read_be_u16(bytes, OFF_DI_UID)?,
            gid: read_be_u16(bytes, OFF_DI_GID)?,
            size,
            atime: read_be_i32(bytes, OFF_DI_ATIME)?,
            mtime: read_be_i32(bytes, OFF_DI_MTIME)?,
            ctime: read_be_i32(bytes, OFF_DI_CTIME)?,
            generation: read_be_u32(bytes, OFF_DI_GEN)?,
            num_extents,
            version: read_u8(bytes, OFF_DI_VERSION)?,
            direct_extents,
        })
    }

    /// Permission bits (mode without the type).
    #[must_use]
    pub fn permissions(&self) -> u16 {
        self.mode & MODE_PERM_MASK
    }

    /// Whether the extent list continues in indirect blocks.
    #[must_use]
    pub fn has_indirect_extents(&self) -> bool {
        self.num_extents > EFS_DIRECT_EXTENTS
    }
}

/// A decoded directory entry: a name bound to an inode number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDirEntry {
    pub inode: u32,
    pub name: Vec<u8>,
}

impl RawDirEntry {
    /// Entry name as a (lossy) string.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// One 512-byte block of directory data.
///
/// A directory block is a tiny slab allocator: a header, a byte of entry
/// offsets per slot growing from the front of the space array, and the
/// entries themselves packed at the back. Offsets are stored compacted by a
/// one-bit right shift and measure from the start of the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBlock {
    /// Compacted offset of the first used entry byte.
    pub first_used: u8,
    /// Number of offset slots.
    pub slots: u8,
    space: Vec<u8>,
}

impl DirBlock {
    /// Parse a directory block from one basic block of bytes.
    pub fn parse_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EFS_BLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EFS_BLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_be_u16(region, 0)?;
        if magic != EFS_DIRBLK_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EFS_DIRBLK_MAGIC),
                actual: u64::from(magic),
            });
        }

        Ok(Self {
            first_used: region[2],
            slots: region[3],
            space: region[EFS_DIRBLK_HEADER..EFS_BLOCK_SIZE].to_vec(),
        })
    }

    /// Decode the entries of this block, slot order preserved.
    ///
    /// Unallocated slots (offset 0) and deleted entries (inode 0) are
    /// silently skipped. Offsets that land outside the entry space are
    /// structural corruption and fail the decode.
    pub fn entries(&self) -> Result<Vec<RawDirEntry>, ParseError> {
        let slots = usize::from(self.slots);
        if slots > DIRBLK_MAX_ENTRIES {
            return Err(ParseError::InvalidField {
                field: "db_slots",
                reason: "more slots than a block can hold",
            });
        }

        let mut entries = Vec::with_capacity(slots);
        for slot in 0..slots {
            let compact = usize::from(self.space[slot]);
            if compact == 0 {
                continue;
            }
            // Offsets are stored shifted right by one and count from the
            // block start; anything resolving into the header is corrupt.
            if compact < EFS_DIRBLK_HEADER >> 1 {
                return Err(ParseError::InvalidField {
                    field: "db_offset",
                    reason: "entry offset points into the block header",
                });
            }
            let offset = (compact << 1) - EFS_DIRBLK_HEADER;
            if offset + 5 > self.space.len() {
                return Err(ParseError::InvalidField {
                    field: "db_offset",
                    reason: "entry offset past end of block",
                });
            }

            let inode = read_be_u32(&self.space, offset)?;
            let name_len = usize::from(self.space[offset + 4]);
            let name_end = offset + 5 + name_len;
            if name_end > self.space.len() {
                return Err(ParseError::InvalidField {
                    field: "d_namelen",
                    reason: "name extends past end of block",
                });
            }
            if inode == 0 {
                continue;
            }

            entries.push(RawDirEntry {
                inode,
                name: self.space[offset + 5..name_end].to_vec(),
            });
        }
        Ok(entries)
    }
}

//! Volume header parsing.
//!
//! The volume header is a 512-byte block at the very beginning of every SGI
//! disk or disk image. It carries the device geometry, a partition table of
//! 16 fixed slots, and a "volume directory" of up to 15 files stored raw in
//! the header region (standalone shell, disk label, bootstraps). A header is
//! valid when the magic matches and the 32-bit two's-complement sum of the
//! whole block is zero.

use serde::{Deserialize, Serialize};
use sgidisk_types::{
    DP_CTQ_EN, ParseError, VH_BOOTFILE_LEN, VH_CSUM_OFFSET, VH_MAGIC, VH_NPARTITIONS, VH_NVOLDIR,
    VH_PARTTAB_OFFSET, VH_SIZE, VH_VDNAME_LEN, VH_VOLDIR_OFFSET, read_be_i16, read_be_i32,
    read_be_u16, read_be_u32, read_fixed, read_u8, trim_nul_padded,
};
use std::fmt;

// Field offsets within the 512-byte header block.
const OFF_MAGIC: usize = 0x000;
const OFF_ROOTPT: usize = 0x004;
const OFF_SWAPPT: usize = 0x006;
const OFF_BOOTFILE: usize = 0x008;
const OFF_DP_CYLINDERS: usize = 0x01C;
const OFF_DP_HEADS: usize = 0x020;
const OFF_DP_CTQ_DEPTH: usize = 0x022;
const OFF_DP_SECTORS: usize = 0x026;
const OFF_DP_SECBYTES: usize = 0x028;
const OFF_DP_FLAGS: usize = 0x02C;
const OFF_DP_DRIVECAP: usize = 0x044;

const VOLDIR_ENTRY_SIZE: usize = 16;
const PARTTAB_ENTRY_SIZE: usize = 12;

/// Device parameters from the volume header.
///
/// Geometry fields are backwards-compatibility data on anything newer than
/// early SCSI drives; they are surfaced as informational values only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParameters {
    /// Drive cylinders.
    pub cylinders: u16,
    /// Tracks (heads) per cylinder.
    pub heads: u16,
    /// Sectors per track.
    pub sectors: u16,
    /// Length of a sector in bytes.
    pub sector_bytes: u16,
    /// Depth of the command tag queue.
    pub ctq_depth: u8,
    /// Driver flag bits.
    pub flags: i32,
    /// Drive capacity in blocks. Zero on drives formatted before the field
    /// was introduced; never rely on it being filled in.
    pub drive_capacity: u32,
}

impl DeviceParameters {
    /// Whether command tag queueing is enabled.
    #[must_use]
    pub fn ctq_enabled(&self) -> bool {
        (self.flags & DP_CTQ_EN) != 0
    }
}

/// Use of a partition, from the partition table's type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionType {
    /// Partition holds the volume header itself.
    VolumeHeader,
    /// Tags 1 and 2 belonged to drive types dropped long ago.
    Unsupported1,
    Unsupported2,
    /// Raw data partition.
    Raw,
    /// Tags 4 and 5 were for filesystems never shipped on MIPS.
    Unsupported4,
    Unsupported5,
    /// Partition spans the entire volume.
    EntireVolume,
    /// SGI EFS filesystem.
    Efs,
    /// Part of a logical volume.
    LogicalVolume,
    /// Part of a raw logical volume.
    RawLogicalVolume,
    /// SGI XFS filesystem.
    Xfs,
    /// XFS log.
    XfsLog,
    /// Part of an XLV volume.
    Xlv,
    /// SGI XVM.
    Xvm,
    /// Veritas volume manager.
    Vxvm,
    /// A tag this tool does not know. Carried through rather than failing
    /// the whole header.
    Unknown(i32),
}

impl PartitionType {
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::VolumeHeader,
            1 => Self::Unsupported1,
            2 => Self::Unsupported2,
            3 => Self::Raw,
            4 => Self::Unsupported4,
            5 => Self::Unsupported5,
            6 => Self::EntireVolume,
            7 => Self::Efs,
            8 => Self::LogicalVolume,
            9 => Self::RawLogicalVolume,
            10 => Self::Xfs,
            11 => Self::XfsLog,
            12 => Self::Xlv,
            13 => Self::Xvm,
            14 => Self::Vxvm,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub fn as_raw(self) -> i32 {
        match self {
            Self::VolumeHeader => 0,
            Self::Unsupported1 => 1,
            Self::Unsupported2 => 2,
            Self::Raw => 3,
            Self::Unsupported4 => 4,
            Self::Unsupported5 => 5,
            Self::EntireVolume => 6,
            Self::Efs => 7,
            Self::LogicalVolume => 8,
            Self::RawLogicalVolume => 9,
            Self::Xfs => 10,
            Self::XfsLog => 11,
            Self::Xlv => 12,
            Self::Xvm => 13,
            Self::Vxvm => 14,
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VolumeHeader => write!(f, "volhdr"),
            Self::Unsupported1 | Self::Unsupported2 | Self::Unsupported4 | Self::Unsupported5 => {
                write!(f, "unsupported({})", self.as_raw())
            }
            Self::Raw => write!(f, "raw"),
            Self::EntireVolume => write!(f, "volume"),
            Self::Efs => write!(f, "efs"),
            Self::LogicalVolume => write!(f, "lvol"),
            Self::RawLogicalVolume => write!(f, "rlvol"),
            Self::Xfs => write!(f, "xfs"),
            Self::XfsLog => write!(f, "xfslog"),
            Self::Xlv => write!(f, "xlv"),
            Self::Xvm => write!(f, "xvm"),
            Self::Vxvm => write!(f, "vxvm"),
            Self::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

/// One partition table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Number of 512-byte blocks in the partition.
    pub num_blocks: u32,
    /// First logical block of the partition.
    pub first_block: u32,
    /// Use of the partition.
    pub kind: PartitionType,
}

impl PartitionEntry {
    /// A slot is in use when it has a non-zero size.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.num_blocks > 0
    }

    /// Byte offset of the partition start within the image.
    #[must_use]
    pub fn start_byte(&self) -> u64 {
        u64::from(self.first_block) * sgidisk_types::EFS_BLOCK_SIZE as u64
    }

    /// Partition length in bytes.
    #[must_use]
    pub fn len_bytes(&self) -> u64 {
        u64::from(self.num_blocks) * sgidisk_types::EFS_BLOCK_SIZE as u64
    }
}

/// One volume directory slot: a file stored raw inside the header region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeFile {
    /// File name; `None` for an empty slot.
    pub name: Option<String>,
    /// First logical block of the file's data.
    pub start_block: u32,
    /// File length in bytes.
    pub length_bytes: u32,
}

impl VolumeFile {
    /// A slot is in use when it has a non-zero length.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.length_bytes > 0
    }

    /// Byte offset of the file's first block within the image.
    #[must_use]
    pub fn start_byte(&self) -> u64 {
        u64::from(self.start_block) * sgidisk_types::EFS_BLOCK_SIZE as u64
    }
}

/// Parsed volume header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeHeader {
    /// Index of the root partition.
    pub root_partition: i16,
    /// Index of the swap partition.
    pub swap_partition: i16,
    /// Name of the file to boot, when one is set.
    pub boot_file: Option<String>,
    /// Device parameters.
    pub device: DeviceParameters,
    /// Volume directory, all 15 slots in table order.
    pub directory: Vec<VolumeFile>,
    /// Partition table, all 16 slots in table order.
    pub partitions: Vec<PartitionEntry>,
    /// Stored header checksum.
    pub checksum: i32,
    /// Whether the stored checksum verifies against the block it was read
    /// from. Informational: a bad checksum does not fail the parse.
    pub checksum_ok: bool,
}

impl VolumeHeader {
    /// Parse a volume header from its 512-byte region.
    pub fn parse_header_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < VH_SIZE {
            return Err(ParseError::InsufficientData {
                needed: VH_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_be_u32(region, OFF_MAGIC)?;
        if magic != VH_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(VH_MAGIC),
                actual: u64::from(magic),
            });
        }

        let mut directory = Vec::with_capacity(VH_NVOLDIR);
        for slot in 0..VH_NVOLDIR {
            let base = VH_VOLDIR_OFFSET + slot * VOLDIR_ENTRY_SIZE;
            let name_bytes = read_fixed::<VH_VDNAME_LEN>(region, base)?;
            let lbn = read_be_i32(region, base + 8)?;
            let nbytes = read_be_i32(region, base + 12)?;
            directory.push(VolumeFile {
                name: trim_nul_padded(&name_bytes),
                // Negative values mean an uninitialized slot; normalize to
                // empty rather than rejecting the header.
                start_block: u32::try_from(lbn).unwrap_or(0),
                length_bytes: u32::try_from(nbytes).unwrap_or(0),
            });
        }

        let mut partitions = Vec::with_capacity(VH_NPARTITIONS);
        for slot in 0..VH_NPARTITIONS {
            let base = VH_PARTTAB_OFFSET + slot * PARTTAB_ENTRY_SIZE;
            partitions.push(PartitionEntry {
                num_blocks: read_be_u32(region, base)?,
                first_block: read_be_u32(region, base + 4)?,
                kind: PartitionType::from_raw(read_be_i32(region, base + 8)?),
            });
        }

        Ok(Self {
            root_partition: read_be_i16(region, OFF_ROOTPT)?,
            swap_partition: read_be_i16(region, OFF_SWAPPT)?,
            boot_file: trim_nul_padded(&read_fixed::<VH_BOOTFILE_LEN>(region, OFF_BOOTFILE)?),
            device: DeviceParameters {
                cylinders: read_be_u16(region, OFF_DP_CYLINDERS)?,
                heads: read_be_u16(region, OFF_DP_HEADS)?,
                sectors: read_be_u16(region, OFF_DP_SECTORS)?,
                sector_bytes: read_be_u16(region, OFF_DP_SECBYTES)?,
                ctq_depth: read_u8(region, OFF_DP_CTQ_DEPTH)?,
                flags: read_be_i32(region, OFF_DP_FLAGS)?,
                drive_capacity: read_be_u32(region, OFF_DP_DRIVECAP)?,
            },
            directory,
            partitions,
            checksum: read_be_i32(region, VH_CSUM_OFFSET)?,
            checksum_ok: verify_header_checksum(&region[..VH_SIZE]),
        })
    }

    /// Parse a volume header from the start of a full disk image.
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        if image.len() < VH_SIZE {
            return Err(ParseError::InsufficientData {
                needed: VH_SIZE,
                offset: 0,
                actual: image.len(),
            });
        }
        Self::parse_header_region(&image[..VH_SIZE])
    }

    /// Bounds-checked partition table lookup. `None` for an index outside
    /// the table or an empty slot.
    #[must_use]
    pub fn partition(&self, id: usize) -> Option<&PartitionEntry> {
        self.partitions.get(id).filter(|p| p.in_use())
    }

    /// In-use volume directory entries with their slot ids, table order
    /// preserved. Empty slots are skipped, never surfaced as errors.
    pub fn boot_files(&self) -> impl Iterator<Item = (usize, &VolumeFile)> {
        self.directory
            .iter()
            .enumerate()
            .filter(|(_, f)| f.in_use())
    }
}

/// Two's-complement word sum of a header block.
///
/// The checksum is defined so that summing all 128 big-endian 32-bit words
/// of a valid header (checksum field included) wraps to exactly zero.
#[must_use]
pub fn header_checksum(region: &[u8]) -> i32 {
    region
        .chunks_exact(4)
        .take(VH_SIZE / 4)
        .fold(0_i32, |sum, word| {
            sum.wrapping_add(i32::from_be_bytes([word[0], word[1], word[2], word[3]]))
        })
}

/// Whether a 512-byte header region carries a valid checksum.
#[must_use]
pub fn verify_header_checksum(region: &[u8]) -> bool {
    region.len() >= VH_SIZE && header_checksum(region) == 0
}

//! An opened disk image and its volume header.
//!
//! [`Volume`] owns the byte source and the parsed header, and carries every
//! header-level operation: partition lookup, volume directory access,
//! glob-matched boot-file extraction, and verbatim header copy. It is built
//! once per command and discarded on completion; nothing here caches across
//! invocations.

use crate::device::{ByteDevice, FileByteDevice, read_vec_at};
use crate::{COPY_CHUNK, GLOB_OPTIONS, parse_to_error};
use glob::Pattern;
use serde::Serialize;
use sgidisk_error::{Result, SgidiskError};
use sgidisk_ondisk::volhdr::{PartitionType, VolumeFile, VolumeHeader};
use sgidisk_types::{PartitionId, VH_SIZE};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// A partition resolved from the table: the entry plus its byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSlice {
    pub id: PartitionId,
    pub kind: PartitionType,
    pub first_block: u32,
    pub num_blocks: u32,
    pub start_byte: u64,
    pub len_bytes: u64,
}

/// Structured volume header report for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeInfo {
    pub image_bytes: u64,
    pub sector_bytes: u16,
    pub cylinders: u16,
    pub heads: u16,
    pub sectors: u16,
    pub ctq_enabled: bool,
    pub ctq_depth: u8,
    pub root_partition: i16,
    pub swap_partition: i16,
    pub boot_file: Option<String>,
    pub checksum_ok: bool,
    pub partitions: Vec<PartitionInfo>,
    pub volume_files: Vec<VolumeFileInfo>,
}

/// One in-use partition slot, with its overrun relative to the image.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionInfo {
    pub id: usize,
    pub kind: PartitionType,
    /// Textual fallback for renderers that do not know the type enum.
    pub kind_label: String,
    pub first_block: u32,
    pub end_block: u64,
    pub num_blocks: u32,
    /// Bytes by which the partition extends past the end of the image,
    /// when it does.
    pub overrun_bytes: Option<u64>,
}

/// One in-use volume directory slot.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeFileInfo {
    pub id: usize,
    pub name: String,
    pub start_block: u32,
    pub length_bytes: u32,
    pub overrun_bytes: Option<u64>,
}

/// An opened image: byte source plus parsed volume header.
#[derive(Debug)]
pub struct Volume<D> {
    device: D,
    header: VolumeHeader,
}

impl Volume<FileByteDevice> {
    /// Open a disk image file and parse its volume header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_device(FileByteDevice::open(path)?)
    }
}

impl<D: ByteDevice> Volume<D> {
    /// Parse the volume header from the start of `device`.
    pub fn from_device(device: D) -> Result<Self> {
        if device.len_bytes() < VH_SIZE as u64 {
            return Err(SgidiskError::Truncated(format!(
                "image is {} bytes, a volume header needs {VH_SIZE}",
                device.len_bytes()
            )));
        }
        let region = read_vec_at(&device, 0, VH_SIZE)?;
        let header = VolumeHeader::parse_header_region(&region)
            .map_err(|err| parse_to_error(&err, "volume header"))?;
        debug!(
            partitions = header.partitions.iter().filter(|p| p.in_use()).count(),
            volume_files = header.boot_files().count(),
            checksum_ok = header.checksum_ok,
            "parsed volume header"
        );
        Ok(Self { device, header })
    }

    #[must_use]
    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[must_use]
    pub fn image_len(&self) -> u64 {
        self.device.len_bytes()
    }

    /// Resolve a partition id to its byte range.
    pub fn partition(&self, id: usize) -> Result<PartitionSlice> {
        let entry = self
            .header
            .partition(id)
            .ok_or(SgidiskError::NoSuchPartition { id })?;
        Ok(PartitionSlice {
            id: PartitionId(id),
            kind: entry.kind,
            first_block: entry.first_block,
            num_blocks: entry.num_blocks,
            start_byte: entry.start_byte(),
            len_bytes: entry.len_bytes(),
        })
    }

    /// Raw bytes of the header block.
    pub fn header_bytes(&self) -> Result<Vec<u8>> {
        read_vec_at(&self.device, 0, VH_SIZE)
    }

    /// Copy the raw volume header block verbatim into a destination image.
    /// Returns the number of bytes written.
    pub fn copy_header_to<W: Write>(&self, sink: &mut W) -> Result<u64> {
        let block = self.header_bytes()?;
        info!(
            source_bytes = self.image_len(),
            header_bytes = block.len(),
            "copying volume header block"
        );
        sink.write_all(&block).map_err(SgidiskError::WriteFailed)?;
        Ok(block.len() as u64)
    }

    /// Volume directory entries matching a glob pattern, slot order
    /// preserved. Fails with `NotFound` when nothing matches.
    pub fn matching_boot_files(&self, pattern: &Pattern) -> Result<Vec<(usize, &VolumeFile)>> {
        let matches: Vec<_> = self
            .header
            .boot_files()
            .filter(|(_, file)| {
                file.name
                    .as_deref()
                    .is_some_and(|name| pattern.matches_with(name, GLOB_OPTIONS))
            })
            .collect();
        if matches.is_empty() {
            return Err(SgidiskError::NotFound {
                pattern: pattern.as_str().to_owned(),
            });
        }
        Ok(matches)
    }

    /// Stream one volume directory file into `sink`. Returns bytes copied.
    pub fn extract_boot_file<W: Write>(&self, file: &VolumeFile, sink: &mut W) -> Result<u64> {
        let mut remaining = u64::from(file.length_bytes);
        let mut offset = file.start_byte();
        let total = remaining;

        while remaining > 0 {
            let chunk = remaining.min(COPY_CHUNK as u64) as usize;
            let buf = read_vec_at(&self.device, offset, chunk)?;
            sink.write_all(&buf).map_err(SgidiskError::WriteFailed)?;
            offset += chunk as u64;
            remaining -= chunk as u64;
        }
        info!(
            name = file.name.as_deref().unwrap_or(""),
            bytes = total,
            "extracted volume file"
        );
        Ok(total)
    }

    /// Structured header report: geometry, partitions, volume directory,
    /// each range compared against the actual image length.
    #[must_use]
    pub fn info(&self) -> VolumeInfo {
        let image_bytes = self.image_len();
        let header = &self.header;

        let partitions = header
            .partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.in_use())
            .map(|(id, p)| {
                let end_byte = p.start_byte() + p.len_bytes();
                PartitionInfo {
                    id,
                    kind: p.kind,
                    kind_label: p.kind.to_string(),
                    first_block: p.first_block,
                    end_block: u64::from(p.first_block) + u64::from(p.num_blocks),
                    num_blocks: p.num_blocks,
                    overrun_bytes: end_byte.checked_sub(image_bytes).filter(|n| *n > 0),
                }
            })
            .collect();

        let volume_files = header
            .boot_files()
            .map(|(id, f)| {
                let end_byte = f.start_byte() + u64::from(f.length_bytes);
                VolumeFileInfo {
                    id,
                    name: f.name.clone().unwrap_or_default(),
                    start_block: f.start_block,
                    length_bytes: f.length_bytes,
                    overrun_bytes: end_byte.checked_sub(image_bytes).filter(|n| *n > 0),
                }
            })
            .collect();

        VolumeInfo {
            image_bytes,
            sector_bytes: header.device.sector_bytes,
            cylinders: header.device.cylinders,
            heads: header.device.heads,
            sectors: header.device.sectors,
            ctq_enabled: header.device.ctq_enabled(),
            ctq_depth: header.device.ctq_depth,
            root_partition: header.root_partition,
            swap_partition: header.swap_partition,
            boot_file: header.boot_file.clone(),
            checksum_ok: header.checksum_ok,
            partitions,
            volume_files,
        }
    }
}

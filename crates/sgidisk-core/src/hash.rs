//! Content digests over images and their regions.
//!
//! Hashing is diagnostic tooling: it depends only on bytes, never on parsed
//! structure, so it works on images that fail every validity check. Each
//! item is digested with SHA-256 and BLAKE3 in one pass. When a header is
//! available, [`hash_report`] digests the whole image, the header block,
//! and every in-use volume file and partition in a single sequential sweep
//! over the image.

use crate::device::ByteDevice;
use crate::volume::Volume;
use serde::Serialize;
use sgidisk_error::Result;
use sgidisk_ondisk::volhdr::VolumeHeader;
use sgidisk_types::VH_SIZE;
use sha2::{Digest, Sha256};
use std::ops::Range;

/// Read granularity of the hashing sweep.
const HASH_BUF_SIZE: usize = 16 * 1024;

/// Digests of one byte range, keyed by algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestPair {
    pub sha256: String,
    pub blake3: String,
}

/// The algorithms a [`DigestPair`] carries, in field order.
pub const ALGORITHMS: [&str; 2] = ["sha256", "blake3"];

/// Digest of one named sub-range of the image.
#[derive(Debug, Clone, Serialize)]
pub struct ItemDigest {
    pub name: String,
    pub digest: DigestPair,
    /// Bytes of the declared range that lie past the end of the image and
    /// therefore could not be hashed.
    pub short_by: Option<u64>,
}

/// Full digest report over an image.
#[derive(Debug, Clone, Serialize)]
pub struct HashReport {
    pub image: DigestPair,
    pub header: DigestPair,
    pub volume_files: Vec<ItemDigest>,
    pub partitions: Vec<ItemDigest>,
}

/// Incremental SHA-256 + BLAKE3 state.
struct MultiHash {
    sha256: Sha256,
    blake3: blake3::Hasher,
}

impl MultiHash {
    fn new() -> Self {
        Self {
            sha256: Sha256::new(),
            blake3: blake3::Hasher::new(),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        self.sha256.update(bytes);
        self.blake3.update(bytes);
    }

    fn finalize(self) -> DigestPair {
        DigestPair {
            sha256: to_hex(&self.sha256.finalize()),
            blake3: to_hex(self.blake3.finalize().as_bytes()),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// One range being digested during the sweep.
struct RangedHasher {
    name: String,
    start: u64,
    end: u64,
    hashed: u64,
    hash: MultiHash,
}

impl RangedHasher {
    fn new(name: String, start: u64, len: u64) -> Self {
        Self {
            name,
            start,
            end: start.saturating_add(len),
            hashed: 0,
            hash: MultiHash::new(),
        }
    }

    /// Overlap of this range with the buffer window `[pos, pos + len)`,
    /// as indexes into the buffer.
    fn window_overlap(&self, pos: u64, len: usize) -> Option<Range<usize>> {
        let window_end = pos + len as u64;
        if self.end <= pos || self.start >= window_end {
            return None;
        }
        let from = self.start.saturating_sub(pos) as usize;
        let to = (self.end.min(window_end) - pos) as usize;
        Some(from..to)
    }

    fn finalize(self) -> ItemDigest {
        let declared = self.end - self.start;
        ItemDigest {
            name: self.name,
            short_by: (declared != self.hashed).then_some(declared - self.hashed),
            digest: self.hash.finalize(),
        }
    }
}

/// Digest `len` bytes starting at `offset`, clamped to the image end.
fn hash_range(device: &dyn ByteDevice, offset: u64, len: u64) -> Result<DigestPair> {
    let device_len = device.len_bytes();
    let end = offset.saturating_add(len).min(device_len);
    let mut pos = offset.min(device_len);

    let mut hash = MultiHash::new();
    let mut buf = vec![0_u8; HASH_BUF_SIZE];
    while pos < end {
        let chunk = ((end - pos) as usize).min(HASH_BUF_SIZE);
        device.read_exact_at(pos, &mut buf[..chunk])?;
        hash.update(&buf[..chunk]);
        pos += chunk as u64;
    }
    Ok(hash.finalize())
}

/// Digest of the entire image: a single deterministic pass.
pub fn hash_image(device: &dyn ByteDevice) -> Result<DigestPair> {
    hash_range(device, 0, device.len_bytes())
}

/// Digest of the fixed volume header block only. Succeeds regardless of
/// whether the block parses as a header.
pub fn hash_header(device: &dyn ByteDevice) -> Result<DigestPair> {
    hash_range(device, 0, VH_SIZE as u64)
}

/// Digest the image, the header block, and every in-use volume file and
/// partition, in one sequential read of the image.
pub fn hash_report<D: ByteDevice>(volume: &Volume<D>) -> Result<HashReport> {
    let device = volume.device();
    let image_len = device.len_bytes();
    let header = volume.header();

    let mut header_item = RangedHasher::new("header".to_owned(), 0, VH_SIZE as u64);
    let mut files: Vec<RangedHasher> = ranged_volume_files(header);
    let mut parts: Vec<RangedHasher> = ranged_partitions(header);

    let mut image_hash = MultiHash::new();
    let mut buf = vec![0_u8; HASH_BUF_SIZE];
    let mut pos = 0_u64;
    while pos < image_len {
        let chunk = ((image_len - pos) as usize).min(HASH_BUF_SIZE);
        device.read_exact_at(pos, &mut buf[..chunk])?;
        image_hash.update(&buf[..chunk]);

        for item in std::iter::once(&mut header_item)
            .chain(files.iter_mut())
            .chain(parts.iter_mut())
        {
            if let Some(overlap) = item.window_overlap(pos, chunk) {
                item.hashed += (overlap.end - overlap.start) as u64;
                item.hash.update(&buf[overlap]);
            }
        }
        pos += chunk as u64;
    }

    Ok(HashReport {
        image: image_hash.finalize(),
        header: header_item.finalize().digest,
        volume_files: files.into_iter().map(RangedHasher::finalize).collect(),
        partitions: parts.into_iter().map(RangedHasher::finalize).collect(),
    })
}

fn ranged_volume_files(header: &VolumeHeader) -> Vec<RangedHasher> {
    header
        .boot_files()
        .map(|(_, file)| {
            RangedHasher::new(
                file.name.clone().unwrap_or_default(),
                file.start_byte(),
                u64::from(file.length_bytes),
            )
        })
        .collect()
}

fn ranged_partitions(header: &VolumeHeader) -> Vec<RangedHasher> {
    header
        .partitions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.in_use())
        .map(|(id, p)| RangedHasher::new(id.to_string(), p.start_byte(), p.len_bytes()))
        .collect()
}

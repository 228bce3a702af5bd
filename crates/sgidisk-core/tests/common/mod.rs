#![allow(dead_code)] // each test binary uses its own slice of the fixture
//! Synthetic disk image used by the integration tests.
//!
//! The image is 150 basic blocks: a valid volume header with two boot files
//! and two partitions, and an EFS filesystem in partition 0 holding a root
//! directory with three small files plus one file with indirect extents.
//!
//! ```text
//! block   0        volume header (checksummed)
//! blocks  2..5     boot files: sgilabel (512 B), sash (1000 B)
//! blocks 10..150   partition 0 (EFS, 140 blocks)
//!   part block 1   superblock: 2 groups of 64 blocks from block 4,
//!                  2 inode blocks per group (8 inodes each)
//!   part block 4   inode table of group 0 (inodes 0..8)
//!   part block 6   root directory block
//!   part block 7   README            (10 B)
//!   part blocks 8,9  notes.txt       (600 B)
//!   part block 11  data.bin          (512 B)
//!   part block 12  indirect extent list of big.bin
//!   part blocks 13..26  big.bin      (6556 B, 13 single-block extents)
//!   part block 68  inode table of group 1 (inodes 8..16)
//! ```

use sgidisk_types::{
    EFS_BLOCK_SIZE, EFS_DIRBLK_MAGIC, EFS_INODE_SIZE, EFS_MAGIC_NEW, S_IFDIR, S_IFREG, VH_MAGIC,
};

pub const IMAGE_BLOCKS: usize = 150;
pub const EFS_PART_FIRST_BLOCK: u32 = 10;
pub const EFS_PART_BLOCKS: u32 = 140;

pub const README_LEN: usize = 10;
pub const NOTES_LEN: usize = 600;
pub const DATA_LEN: usize = 512;
pub const BIG_LEN: usize = 13 * EFS_BLOCK_SIZE - 100;

pub const SASH_LEN: usize = 1000;

const PART_BASE: usize = EFS_PART_FIRST_BLOCK as usize * EFS_BLOCK_SIZE;

pub fn readme_content() -> Vec<u8> {
    b"hello sgi\n".to_vec()
}

pub fn notes_content() -> Vec<u8> {
    (0..NOTES_LEN).map(|i| (i % 251) as u8).collect()
}

pub fn data_content() -> Vec<u8> {
    vec![0xAB; DATA_LEN]
}

pub fn big_content() -> Vec<u8> {
    (0..BIG_LEN).map(|i| (i % 253) as u8).collect()
}

pub fn sash_content() -> Vec<u8> {
    (0..SASH_LEN).map(|i| (i % 7) as u8 ^ 0x5A).collect()
}

/// Byte offset of inode `ino` within the partition, per the fixture's
/// cylinder-group geometry.
pub fn inode_offset(ino: usize) -> usize {
    let group = ino / 8;
    let slot = ino % 8;
    (4 + group * 64) * EFS_BLOCK_SIZE + slot * EFS_INODE_SIZE
}

pub fn build_image() -> Vec<u8> {
    let mut image = vec![0_u8; IMAGE_BLOCKS * EFS_BLOCK_SIZE];

    put_header(&mut image);

    // Boot files in the header region.
    let sgilabel = vec![0x11_u8; 512];
    image[2 * EFS_BLOCK_SIZE..2 * EFS_BLOCK_SIZE + 512].copy_from_slice(&sgilabel);
    let sash = sash_content();
    image[3 * EFS_BLOCK_SIZE..3 * EFS_BLOCK_SIZE + SASH_LEN].copy_from_slice(&sash);

    put_superblock(&mut image);

    // Root directory: inode 2, one dir block at partition block 6.
    put_inode(&mut image, 2, inode_bytes(S_IFDIR | 0o755, 512, &[(6, 1, 0)], 1));
    let dir = dir_block(&[("README", 3), ("notes.txt", 4), ("data.bin", 5), ("big.bin", 9)]);
    let dir_off = PART_BASE + 6 * EFS_BLOCK_SIZE;
    image[dir_off..dir_off + EFS_BLOCK_SIZE].copy_from_slice(&dir);

    // README: inode 3 at partition block 7.
    put_inode(
        &mut image,
        3,
        inode_bytes(S_IFREG | 0o644, README_LEN as i32, &[(7, 1, 0)], 1),
    );
    put_data(&mut image, 7, &readme_content());

    // notes.txt: inode 4 across partition blocks 8..10.
    put_inode(
        &mut image,
        4,
        inode_bytes(S_IFREG | 0o644, NOTES_LEN as i32, &[(8, 2, 0)], 1),
    );
    put_data(&mut image, 8, &notes_content());

    // data.bin: inode 5 at partition block 11.
    put_inode(
        &mut image,
        5,
        inode_bytes(S_IFREG | 0o600, DATA_LEN as i32, &[(11, 1, 0)], 1),
    );
    put_data(&mut image, 11, &data_content());

    // big.bin: inode 9 (group 1), 13 extents via an indirect block at
    // partition block 12. The direct slot's offset field carries the
    // total indirect-extent count.
    put_inode(
        &mut image,
        9,
        inode_bytes(S_IFREG | 0o644, BIG_LEN as i32, &[(12, 1, 13)], 13),
    );
    let ind_off = PART_BASE + 12 * EFS_BLOCK_SIZE;
    for i in 0..13_usize {
        let rec = extent_bytes(13 + i as u32, 1, i as u32);
        image[ind_off + i * 8..ind_off + i * 8 + 8].copy_from_slice(&rec);
    }
    put_data(&mut image, 13, &big_content());

    image
}

fn put_header(image: &mut [u8]) {
    let vh = &mut image[..512];
    vh[0..4].copy_from_slice(&VH_MAGIC.to_be_bytes());
    vh[0x04..0x06].copy_from_slice(&0_i16.to_be_bytes()); // root partition
    vh[0x06..0x08].copy_from_slice(&1_i16.to_be_bytes()); // swap partition
    vh[0x08..0x0C].copy_from_slice(b"sash");
    vh[0x1C..0x1E].copy_from_slice(&1024_u16.to_be_bytes()); // cylinders
    vh[0x20..0x22].copy_from_slice(&8_u16.to_be_bytes()); // heads
    vh[0x26..0x28].copy_from_slice(&32_u16.to_be_bytes()); // sectors
    vh[0x28..0x2A].copy_from_slice(&512_u16.to_be_bytes()); // sector bytes

    // Volume directory: sgilabel and sash.
    vh[0x48..0x50].copy_from_slice(b"sgilabel");
    vh[0x50..0x54].copy_from_slice(&2_i32.to_be_bytes());
    vh[0x54..0x58].copy_from_slice(&512_i32.to_be_bytes());
    vh[0x58..0x60].copy_from_slice(b"sash\0\0\0\0");
    vh[0x60..0x64].copy_from_slice(&3_i32.to_be_bytes());
    vh[0x64..0x68].copy_from_slice(&(SASH_LEN as i32).to_be_bytes());

    // Partition 0: EFS. Partition 10: entire volume.
    let pt = 0x138;
    vh[pt..pt + 4].copy_from_slice(&EFS_PART_BLOCKS.to_be_bytes());
    vh[pt + 4..pt + 8].copy_from_slice(&EFS_PART_FIRST_BLOCK.to_be_bytes());
    vh[pt + 8..pt + 12].copy_from_slice(&7_i32.to_be_bytes());
    let pt10 = pt + 10 * 12;
    vh[pt10..pt10 + 4].copy_from_slice(&(IMAGE_BLOCKS as u32).to_be_bytes());
    vh[pt10 + 4..pt10 + 8].copy_from_slice(&0_u32.to_be_bytes());
    vh[pt10 + 8..pt10 + 12].copy_from_slice(&6_i32.to_be_bytes());

    // Two's-complement checksum over the whole block.
    let sum = vh.chunks_exact(4).fold(0_i32, |acc, w| {
        acc.wrapping_add(i32::from_be_bytes([w[0], w[1], w[2], w[3]]))
    });
    vh[0x1F8..0x1FC].copy_from_slice(&sum.wrapping_neg().to_be_bytes());
}

fn put_superblock(image: &mut [u8]) {
    let base = PART_BASE + EFS_BLOCK_SIZE;
    let sb = &mut image[base..base + 92];
    sb[0x00..0x04].copy_from_slice(&132_i32.to_be_bytes()); // fs_size
    sb[0x04..0x08].copy_from_slice(&4_i32.to_be_bytes()); // fs_firstcg
    sb[0x08..0x0C].copy_from_slice(&64_i32.to_be_bytes()); // fs_cgfsize
    sb[0x0C..0x0E].copy_from_slice(&2_i16.to_be_bytes()); // fs_cgisize
    sb[0x0E..0x10].copy_from_slice(&32_i16.to_be_bytes()); // fs_sectors
    sb[0x10..0x12].copy_from_slice(&8_i16.to_be_bytes()); // fs_heads
    sb[0x12..0x14].copy_from_slice(&2_i16.to_be_bytes()); // fs_ncg
    sb[0x18..0x1C].copy_from_slice(&0x2E60_0000_i32.to_be_bytes()); // fs_time
    sb[0x1C..0x20].copy_from_slice(&EFS_MAGIC_NEW.to_be_bytes());
    sb[0x20..0x24].copy_from_slice(b"root");
    sb[0x30..0x34].copy_from_slice(&90_i32.to_be_bytes()); // fs_tfree
    sb[0x34..0x38].copy_from_slice(&10_i32.to_be_bytes()); // fs_tinode
}

pub fn inode_bytes(mode: u16, size: i32, extents: &[(u32, u8, u32)], num_extents: i16) -> [u8; 128] {
    let mut ino = [0_u8; 128];
    ino[0x00..0x02].copy_from_slice(&mode.to_be_bytes());
    ino[0x02..0x04].copy_from_slice(&1_i16.to_be_bytes()); // nlink
    ino[0x04..0x06].copy_from_slice(&100_u16.to_be_bytes()); // uid
    ino[0x06..0x08].copy_from_slice(&20_u16.to_be_bytes()); // gid
    ino[0x08..0x0C].copy_from_slice(&size.to_be_bytes());
    ino[0x0C..0x10].copy_from_slice(&0x2E5F_0000_i32.to_be_bytes()); // atime
    ino[0x10..0x14].copy_from_slice(&0x2E60_0000_i32.to_be_bytes()); // mtime
    ino[0x14..0x18].copy_from_slice(&0x2E61_0000_i32.to_be_bytes()); // ctime
    ino[0x1C..0x1E].copy_from_slice(&num_extents.to_be_bytes());
    for (i, (block, length, offset)) in extents.iter().enumerate() {
        let rec = extent_bytes(*block, *length, *offset);
        ino[0x20 + i * 8..0x20 + i * 8 + 8].copy_from_slice(&rec);
    }
    ino
}

pub fn extent_bytes(block: u32, length: u8, offset: u32) -> [u8; 8] {
    let mut rec = [0_u8; 8];
    rec[1..4].copy_from_slice(&block.to_be_bytes()[1..]);
    rec[4] = length;
    rec[5..8].copy_from_slice(&offset.to_be_bytes()[1..]);
    rec
}

pub fn put_inode(image: &mut [u8], ino: usize, bytes: [u8; 128]) {
    let off = PART_BASE + inode_offset(ino);
    image[off..off + 128].copy_from_slice(&bytes);
}

fn put_data(image: &mut [u8], part_block: usize, content: &[u8]) {
    let off = PART_BASE + part_block * EFS_BLOCK_SIZE;
    image[off..off + content.len()].copy_from_slice(content);
}

/// Pack directory entries into one block, slot order matching input order.
pub fn dir_block(entries: &[(&str, u32)]) -> [u8; 512] {
    let mut block = [0_u8; 512];
    block[0..2].copy_from_slice(&EFS_DIRBLK_MAGIC.to_be_bytes());
    block[3] = entries.len() as u8;

    let mut tail = 512_usize;
    for (slot, (name, inode)) in entries.iter().enumerate() {
        let need = 5 + name.len();
        tail = (tail - need) & !1;
        block[tail..tail + 4].copy_from_slice(&inode.to_be_bytes());
        block[tail + 4] = name.len() as u8;
        block[tail + 5..tail + 5 + name.len()].copy_from_slice(name.as_bytes());
        block[4 + slot] = (tail >> 1) as u8;
    }
    block[2] = (tail >> 1) as u8;
    block
}

/// Absolute byte offset of a partition-relative block, for direct pokes at
/// the fixture.
pub fn part_block_offset(part_block: usize) -> usize {
    PART_BASE + part_block * EFS_BLOCK_SIZE
}

//! Digest engine over the synthetic image: whole-image, header-only, and
//! the single-pass ranged report.

mod common;

use sgidisk_core::{FileByteDevice, MemoryByteDevice, Volume, hash_header, hash_image, hash_report};
use std::io::Write;

#[test]
fn report_matches_standalone_digests() {
    let image = common::build_image();
    let dev = MemoryByteDevice::new(image.clone());
    let vol = Volume::from_device(dev).unwrap();

    let report = hash_report(&vol).expect("report");

    assert_eq!(report.image, hash_image(vol.device()).unwrap());
    assert_eq!(report.header, hash_header(vol.device()).unwrap());

    // The sash volume file digests exactly its declared bytes.
    let sash = report
        .volume_files
        .iter()
        .find(|f| f.name == "sash")
        .expect("sash digested");
    let sash_region = MemoryByteDevice::new(image[3 * 512..3 * 512 + common::SASH_LEN].to_vec());
    assert_eq!(sash.digest, hash_image(&sash_region).unwrap());
    assert_eq!(sash.short_by, None);

    // Partition 0 digests its full block range.
    let p0 = report.partitions.iter().find(|p| p.name == "0").unwrap();
    let p0_start = common::EFS_PART_FIRST_BLOCK as usize * 512;
    let p0_len = common::EFS_PART_BLOCKS as usize * 512;
    let p0_region = MemoryByteDevice::new(image[p0_start..p0_start + p0_len].to_vec());
    assert_eq!(p0.digest, hash_image(&p0_region).unwrap());
}

#[test]
fn ranges_past_the_image_hash_short() {
    let image = common::build_image();
    let short = image[..image.len() - 2048].to_vec();
    let vol = Volume::from_device(MemoryByteDevice::new(short)).unwrap();

    let report = hash_report(&vol).unwrap();
    let p10 = report.partitions.iter().find(|p| p.name == "10").unwrap();
    assert_eq!(p10.short_by, Some(2048));
    let p0 = report.partitions.iter().find(|p| p.name == "0").unwrap();
    assert_eq!(p0.short_by, Some(2048));
}

#[test]
fn digests_are_path_independent() {
    let image = common::build_image();

    let mut a = tempfile::NamedTempFile::new().unwrap();
    a.write_all(&image).unwrap();
    a.flush().unwrap();
    let mut b = tempfile::NamedTempFile::new().unwrap();
    b.write_all(&image).unwrap();
    b.flush().unwrap();

    let ha = hash_image(&FileByteDevice::open(a.path()).unwrap()).unwrap();
    let hb = hash_image(&FileByteDevice::open(b.path()).unwrap()).unwrap();
    assert_eq!(ha, hb);

    let mem = hash_image(&MemoryByteDevice::new(image)).unwrap();
    assert_eq!(ha, mem, "file and buffer sources agree");
}

#[test]
fn distinct_images_get_distinct_digests() {
    let a = common::build_image();
    let mut b = common::build_image();
    *b.last_mut().unwrap() ^= 1;

    assert_ne!(
        hash_image(&MemoryByteDevice::new(a)).unwrap(),
        hash_image(&MemoryByteDevice::new(b)).unwrap()
    );
}

#[test]
fn report_serializes_to_json() {
    let vol = Volume::from_device(MemoryByteDevice::new(common::build_image())).unwrap();
    let report = hash_report(&vol).unwrap();

    let json = serde_json::to_string(&report).expect("serializes");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parses back");
    let digest = value["image"]["sha256"].as_str().expect("digest string");
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
}

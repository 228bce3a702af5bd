//! Random-access read abstraction over a disk image.
//!
//! Every engine in this crate reads through [`ByteDevice`]: a fixed-length
//! byte source supporting bounds-checked reads at arbitrary offsets. Reads
//! are complete, self-contained range fetches with no shared seek position,
//! so independent reads at distinct offsets can proceed concurrently
//! without tearing.

use sgidisk_error::{Result, SgidiskError};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Byte-addressed source for fixed-offset reads (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// Bounds check shared by device implementations.
fn check_range(offset: u64, len: usize, device_len: u64) -> Result<u64> {
    let len = u64::try_from(len)
        .map_err(|_| SgidiskError::Corrupt("read length overflows u64".to_owned()))?;
    let end = offset
        .checked_add(len)
        .ok_or_else(|| SgidiskError::Corrupt("read range overflows u64".to_owned()))?;
    if end > device_len {
        return Err(SgidiskError::Truncated(format!(
            "read of {len} bytes at offset {offset} runs past the image ({device_len} bytes)"
        )));
    }
    Ok(end)
}

/// File-backed image using `pread`-style I/O via [`FileExt`], which is
/// thread-safe and does not require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    /// Open an image read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(SgidiskError::ReadFailed)?;
        let len = file
            .metadata()
            .map_err(SgidiskError::ReadFailed)?
            .len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file
            .read_exact_at(buf, offset)
            .map_err(SgidiskError::ReadFailed)
    }
}

/// In-memory image, for buffers and synthetic fixtures.
#[derive(Debug, Clone)]
pub struct MemoryByteDevice {
    bytes: Vec<u8>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = check_range(offset, buf.len(), self.len_bytes())?;
        // Both bounds fit in usize: end <= bytes.len().
        buf.copy_from_slice(&self.bytes[offset as usize..end as usize]);
        Ok(())
    }
}

/// Read `len` bytes at `offset` into a fresh buffer.
pub fn read_vec_at(device: &dyn ByteDevice, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0_u8; len];
    device.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_device_reads_in_bounds() {
        let dev = MemoryByteDevice::new((0_u8..64).collect());
        assert_eq!(dev.len_bytes(), 64);

        let mut buf = [0_u8; 4];
        dev.read_exact_at(10, &mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);
    }

    #[test]
    fn out_of_bounds_read_is_truncated_error() {
        let dev = MemoryByteDevice::new(vec![0_u8; 16]);
        let mut buf = [0_u8; 8];
        let err = dev.read_exact_at(12, &mut buf).unwrap_err();
        assert!(matches!(err, SgidiskError::Truncated(_)), "got {err:?}");

        let err = dev.read_exact_at(u64::MAX, &mut buf).unwrap_err();
        assert!(matches!(err, SgidiskError::Corrupt(_)));
    }

    #[test]
    fn file_device_matches_memory_device() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let payload: Vec<u8> = (0_u8..=255).collect();
        tmp.write_all(&payload).unwrap();
        tmp.flush().unwrap();

        let dev = FileByteDevice::open(tmp.path()).unwrap();
        assert_eq!(dev.len_bytes(), 256);

        let got = read_vec_at(&dev, 100, 16).unwrap();
        assert_eq!(got, payload[100..116]);

        let mut buf = [0_u8; 2];
        assert!(dev.read_exact_at(255, &mut buf).is_err());
    }
}

//! Non-volatile storage
//!
//! - [`RamStorage`]: a fixed array standing in for battery-backed RAM
//!   (RTC user memory, backup SRAM). Boards with such memory mapped at a
//!   fixed address implement [`NvStorage`] themselves.
//! - [`BlobStore`]: one variable-length blob guarded by a length + CRC-32
//!   header, used for the node configuration.

use hal_abstractions::NvStorage;

use crate::crc::crc32;

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
use defmt::{debug, warn};

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
use log::{debug, warn};

/// Storage access errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Access past the end of the region
    OutOfBounds { offset: u32, len: u32 },
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfBounds { offset, len } => {
                write!(f, "Access out of bounds: {} bytes at offset {}", len, offset)
            }
        }
    }
}

impl core::error::Error for StorageError {}

/// Byte array region of `N` bytes
pub struct RamStorage<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> RamStorage<N> {
    pub const fn new() -> Self {
        Self { bytes: [0; N] }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw access, e.g. to simulate corruption.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= N => Ok(start..end),
            _ => Err(StorageError::OutOfBounds {
                offset,
                len: len as u32,
            }),
        }
    }
}

impl<const N: usize> Default for RamStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NvStorage for RamStorage<N> {
    type Error = StorageError;

    fn capacity(&self) -> u32 {
        N as u32
    }

    fn read_region(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write_region(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }
}

/// Blob store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlobError {
    /// Underlying storage rejected the access
    Storage,
    /// Blob does not fit in the region
    TooLarge { len: u32, capacity: u32 },
    /// Caller buffer is shorter than the stored blob
    BufferTooSmall { needed: u32 },
    /// Stored length or checksum is invalid
    Corrupted,
}

impl core::fmt::Display for BlobError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Storage => write!(f, "Storage error"),
            Self::TooLarge { len, capacity } => {
                write!(f, "Blob of {} bytes exceeds capacity {}", len, capacity)
            }
            Self::BufferTooSmall { needed } => write!(f, "Buffer too small, need {}", needed),
            Self::Corrupted => write!(f, "Stored blob is corrupted"),
        }
    }
}

impl core::error::Error for BlobError {}

/// Header layout: `len: u32 LE`, `crc: u32 LE`
const BLOB_HEADER_SIZE: u32 = 8;

/// Single checksummed blob at `base` inside an [`NvStorage`] region.
pub struct BlobStore<S> {
    storage: S,
    base: u32,
}

impl<S: NvStorage> BlobStore<S> {
    pub fn new(storage: S, base: u32) -> Self {
        Self { storage, base }
    }

    /// Largest blob that fits.
    pub fn capacity(&self) -> u32 {
        self.storage
            .capacity()
            .saturating_sub(self.base)
            .saturating_sub(BLOB_HEADER_SIZE)
    }

    /// Length of the stored blob according to its header (not verified).
    pub fn stored_len(&mut self) -> Result<u32, BlobError> {
        Ok(self.read_header()?.0)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), BlobError> {
        let len = data.len() as u32;
        let capacity = self.capacity();
        if len > capacity {
            return Err(BlobError::TooLarge { len, capacity });
        }
        self.storage
            .write_region(self.base + BLOB_HEADER_SIZE, data)
            .map_err(|_| BlobError::Storage)?;
        self.write_header(len, crc32(data))?;
        debug!("Blob stored: {} bytes", len);
        Ok(())
    }

    /// Reads the blob into `buf` and returns its length.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, BlobError> {
        let (len, stored_crc) = self.read_header()?;
        if len > self.capacity() {
            warn!("Blob header length {} exceeds capacity", len);
            return Err(BlobError::Corrupted);
        }
        let data = buf
            .get_mut(..len as usize)
            .ok_or(BlobError::BufferTooSmall { needed: len })?;
        self.storage
            .read_region(self.base + BLOB_HEADER_SIZE, data)
            .map_err(|_| BlobError::Storage)?;
        if crc32(data) != stored_crc {
            warn!("Blob checksum mismatch");
            return Err(BlobError::Corrupted);
        }
        Ok(len as usize)
    }

    /// Drops the stored blob and zeroes its data area; subsequent reads
    /// return an empty blob.
    pub fn reset(&mut self) -> Result<(), BlobError> {
        self.write_header(0, crc32(&[]))?;
        self.storage
            .erase_region(self.base + BLOB_HEADER_SIZE, self.capacity())
            .map_err(|_| BlobError::Storage)
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    fn read_header(&mut self) -> Result<(u32, u32), BlobError> {
        let mut header = [0u8; BLOB_HEADER_SIZE as usize];
        self.storage
            .read_region(self.base, &mut header)
            .map_err(|_| BlobError::Storage)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        Ok((len, crc))
    }

    fn write_header(&mut self, len: u32, crc: u32) -> Result<(), BlobError> {
        let mut header = [0u8; BLOB_HEADER_SIZE as usize];
        header[..4].copy_from_slice(&len.to_le_bytes());
        header[4..].copy_from_slice(&crc.to_le_bytes());
        self.storage
            .write_region(self.base, &header)
            .map_err(|_| BlobError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_storage_bounds() {
        let mut storage = RamStorage::<16>::new();
        assert_eq!(storage.capacity(), 16);
        assert!(storage.write_region(12, &[1, 2, 3, 4]).is_ok());
        assert_eq!(
            storage.write_region(13, &[1, 2, 3, 4]),
            Err(StorageError::OutOfBounds { offset: 13, len: 4 })
        );
        let mut buf = [0u8; 4];
        storage.read_region(12, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(storage.read_region(u32::MAX, &mut buf).is_err());
    }

    #[test]
    fn test_default_erase_zero_fills() {
        let mut storage = RamStorage::<40>::new();
        storage.write_region(0, &[0xAA; 40]).unwrap();
        storage.erase_region(2, 35).unwrap();
        assert_eq!(storage.as_bytes()[1], 0xAA);
        assert!(storage.as_bytes()[2..37].iter().all(|&b| b == 0));
        assert_eq!(storage.as_bytes()[37], 0xAA);
    }

    #[test]
    fn test_blob_write_read() {
        let mut store = BlobStore::new(RamStorage::<64>::new(), 16);
        assert_eq!(store.capacity(), 40);
        store.write(b"publish=60000").unwrap();
        assert_eq!(store.stored_len().unwrap(), 13);

        let mut buf = [0u8; 40];
        let len = store.read(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"publish=60000");

        let mut short = [0u8; 4];
        assert_eq!(
            store.read(&mut short),
            Err(BlobError::BufferTooSmall { needed: 13 })
        );
    }

    #[test]
    fn test_blob_too_large() {
        let mut store = BlobStore::new(RamStorage::<16>::new(), 0);
        assert_eq!(
            store.write(&[0u8; 9]),
            Err(BlobError::TooLarge {
                len: 9,
                capacity: 8
            })
        );
    }

    #[test]
    fn test_blob_detects_corruption() {
        let mut store = BlobStore::new(RamStorage::<32>::new(), 0);
        store.write(b"abcdef").unwrap();

        let mut storage = store.into_inner();
        storage.as_bytes_mut()[10] ^= 0x01;
        let mut store = BlobStore::new(storage, 0);

        let mut buf = [0u8; 24];
        assert_eq!(store.read(&mut buf), Err(BlobError::Corrupted));
    }

    #[test]
    fn test_blob_garbage_length_is_corruption() {
        let mut storage = RamStorage::<32>::new();
        storage.as_bytes_mut()[..4].copy_from_slice(&1000u32.to_le_bytes());
        let mut store = BlobStore::new(storage, 0);
        let mut buf = [0u8; 24];
        assert_eq!(store.read(&mut buf), Err(BlobError::Corrupted));
    }

    #[test]
    fn test_blob_reset_reads_empty() {
        let mut store = BlobStore::new(RamStorage::<32>::new(), 0);
        store.write(b"abc").unwrap();
        store.reset().unwrap();
        assert_eq!(store.stored_len(), Ok(0));
        let mut buf = [0u8; 24];
        assert_eq!(store.read(&mut buf), Ok(0));

        let storage = store.into_inner();
        assert!(storage.as_bytes()[8..].iter().all(|&b| b == 0));
    }
}

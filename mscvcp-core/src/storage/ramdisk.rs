use core::cell::RefCell;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, Ordering};

use super::{StorageError, StorageInfo, StorageInterface};

/// RAM Disk backend
pub struct RamDisk<const SECTOR_SIZE: usize, const TOTAL_DATA_SIZE: usize> {
    /// Storage on RAM
    data: Mutex<RefCell<[u8; TOTAL_DATA_SIZE]>>,
    /// Medium inserted
    present: AtomicBool,
}

impl<const SECTOR_SIZE: usize, const TOTAL_DATA_SIZE: usize> Default
    for RamDisk<SECTOR_SIZE, TOTAL_DATA_SIZE>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const SECTOR_SIZE: usize, const TOTAL_DATA_SIZE: usize> RamDisk<SECTOR_SIZE, TOTAL_DATA_SIZE> {
    /// Create a new RamDisk
    pub const fn new() -> Self {
        Self {
            data: Mutex::new(RefCell::new([0; TOTAL_DATA_SIZE])),
            present: AtomicBool::new(true),
        }
    }

    /// Simulate medium insertion or removal
    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::Release);
    }

    /// Set data to RamDisk
    pub fn set_data(&self, offset_bytes: usize, data: &[u8]) {
        critical_section::with(|cs| {
            self.data.borrow_ref_mut(cs)[offset_bytes..offset_bytes + data.len()].copy_from_slice(data);
        });
    }

    /// Get data from RamDisk
    pub fn get_data(&self, offset_bytes: usize, buf: &mut [u8]) {
        critical_section::with(|cs| {
            buf.copy_from_slice(&self.data.borrow_ref(cs)[offset_bytes..offset_bytes + buf.len()]);
        });
    }

    fn byte_range(&self, buf_len: usize, sector: u32, count: u32) -> Result<core::ops::Range<usize>, StorageError> {
        let start = sector as usize * SECTOR_SIZE;
        let len = count as usize * SECTOR_SIZE;
        let end = start.checked_add(len).ok_or(StorageError::OutOfRange)?;
        if end > TOTAL_DATA_SIZE || buf_len < len {
            return Err(StorageError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl<const SECTOR_SIZE: usize, const TOTAL_DATA_SIZE: usize> StorageInterface
    for RamDisk<SECTOR_SIZE, TOTAL_DATA_SIZE>
{
    async fn get_info(&self) -> Result<StorageInfo, StorageError> {
        Ok(StorageInfo::new(
            SECTOR_SIZE as u32,
            (TOTAL_DATA_SIZE / SECTOR_SIZE) as u32,
        ))
    }

    async fn read_sectors(&self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), StorageError> {
        if !self.present.load(Ordering::Acquire) {
            return Err(StorageError::NotReady);
        }
        let range = self.byte_range(buf.len(), sector, count)?;
        let len = range.len();
        critical_section::with(|cs| {
            buf[..len].copy_from_slice(&self.data.borrow_ref(cs)[range]);
        });
        Ok(())
    }

    async fn write_sectors(&self, buf: &[u8], sector: u32, count: u32) -> Result<(), StorageError> {
        if !self.present.load(Ordering::Acquire) {
            return Err(StorageError::NotReady);
        }
        let range = self.byte_range(buf.len(), sector, count)?;
        let len = range.len();
        critical_section::with(|cs| {
            self.data.borrow_ref_mut(cs)[range].copy_from_slice(&buf[..len]);
        });
        Ok(())
    }

    async fn detect(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SECTOR_SIZE: usize = 512;
    const TOTAL_DATA_SIZE: usize = 4096;

    type TestDisk = RamDisk<SECTOR_SIZE, TOTAL_DATA_SIZE>;

    #[tokio::test]
    async fn test_get_info() {
        let disk = TestDisk::new();
        let info = disk.get_info().await.unwrap();
        assert_eq!(info.sector_size, 512);
        assert_eq!(info.total_sectors, 8);
        assert_eq!(info.disk_size_kib, 4);
        assert_eq!(info.logical_blocks(512), 8);
    }

    #[tokio::test]
    async fn test_write_read() {
        let disk = TestDisk::new();
        let write_data: Vec<u8> = (0..SECTOR_SIZE * 2).map(|i| (i & 0xff) as u8).collect();

        disk.write_sectors(&write_data, 1, 2).await.unwrap();

        let mut read_data = vec![0u8; SECTOR_SIZE * 2];
        disk.read_sectors(&mut read_data, 1, 2).await.unwrap();
        assert_eq!(read_data, write_data);

        let mut raw = [0u8; 4];
        disk.get_data(SECTOR_SIZE, &mut raw);
        assert_eq!(raw, [0, 1, 2, 3]);
    }

    #[rstest]
    #[case(7, 2)]
    #[case(8, 1)]
    #[case(u32::MAX, 1)]
    #[tokio::test]
    async fn test_out_of_range(#[case] sector: u32, #[case] count: u32) {
        let disk = TestDisk::new();
        let mut buf = vec![0u8; SECTOR_SIZE * count as usize];
        assert_eq!(
            disk.read_sectors(&mut buf, sector, count).await,
            Err(StorageError::OutOfRange)
        );
    }

    #[tokio::test]
    async fn test_removed_medium() {
        let disk = TestDisk::new();
        disk.set_present(false);
        assert!(!disk.detect().await);
        assert_eq!(
            disk.write_sectors(&[0; SECTOR_SIZE], 0, 1).await,
            Err(StorageError::NotReady)
        );
    }
}

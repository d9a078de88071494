//! Block storage backends seen by the mass storage function.

#[cfg(feature = "defmt")]
use defmt::Format;

#[cfg(feature = "ramdisk")]
pub mod ramdisk;

#[cfg(feature = "ramdisk")]
pub use ramdisk::RamDisk;

/// Storage backend error codes
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum StorageError {
    /// Medium absent or not initialized
    NotReady,
    /// Transfer failed on the medium
    Io,
    /// Sector range outside the medium, or buffer size mismatch
    OutOfRange,
    /// Controller level failure
    Device,
}

/// Geometry of a storage backend
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct StorageInfo {
    /// Native sector size in bytes
    pub sector_size: u32,
    /// Number of native sectors
    pub total_sectors: u32,
    /// Capacity in KiB
    pub disk_size_kib: u32,
}

impl StorageInfo {
    pub fn new(sector_size: u32, total_sectors: u32) -> Self {
        let bytes = u64::from(sector_size) * u64::from(total_sectors);
        Self {
            sector_size,
            total_sectors,
            disk_size_kib: (bytes / 1024).min(u64::from(u32::MAX)) as u32,
        }
    }

    /// Capacity expressed in host logical blocks
    pub fn logical_blocks(&self, logical_block_size: u32) -> u32 {
        let bytes = u64::from(self.disk_size_kib) * 1024;
        (bytes / u64::from(logical_block_size.max(1))).min(u64::from(u32::MAX)) as u32
    }
}

/// Sector level access to one logical unit.
///
/// Calls come from the single polling task; implementations serialize their
/// own hardware access if something else shares the device.
#[trait_variant::make(StorageInterface: Send)]
pub trait LocalStorageInterface {
    /// Report sector size and capacity
    async fn get_info(&self) -> Result<StorageInfo, StorageError>;
    /// Read `count` sectors starting at `sector` into `buf`
    async fn read_sectors(&self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), StorageError>;
    /// Write `count` sectors starting at `sector` from `buf`
    async fn write_sectors(&self, buf: &[u8], sector: u32, count: u32) -> Result<(), StorageError>;
    /// Medium present
    async fn detect(&self) -> bool;
}

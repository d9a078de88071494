//! Byte addressed access on top of sector addressed storage.
//!
//! Unaligned heads and tails go through one scratch sector; the aligned
//! middle is transferred in place with a single multi-sector call.

#[cfg(feature = "defmt")]
use defmt::Format;

use heapless::Vec;

use crate::config::SCRATCH_SECTOR_CAPACITY;
use crate::storage::{StorageError, StorageInterface};

/// Media access failures
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum MediaError {
    Storage(StorageError),
    /// Scratch sector could not be allocated
    OutOfMemory,
    /// Backend reported a zero sector size
    InvalidGeometry,
}

impl From<StorageError> for MediaError {
    fn from(e: StorageError) -> Self {
        MediaError::Storage(e)
    }
}

type Scratch = Vec<u8, SCRATCH_SECTOR_CAPACITY>;

fn alloc_scratch(scratch: &mut Scratch, sector_size: usize) -> Result<(), MediaError> {
    if scratch.len() == sector_size {
        return Ok(());
    }
    scratch.resize(sector_size, 0).map_err(|_| {
        warn!("media: no scratch for {} byte sector", sector_size);
        MediaError::OutOfMemory
    })
}

fn to_sector(value: u64) -> Result<u32, MediaError> {
    u32::try_from(value).map_err(|_| MediaError::Storage(StorageError::OutOfRange))
}

async fn sector_size<S: StorageInterface>(storage: &S) -> Result<u64, MediaError> {
    let info = storage.get_info().await?;
    if info.sector_size == 0 {
        return Err(MediaError::InvalidGeometry);
    }
    Ok(u64::from(info.sector_size))
}

/// Read `dst.len()` bytes starting at byte address `addr`
pub async fn read_media<S: StorageInterface>(
    storage: &S,
    addr: u64,
    dst: &mut [u8],
) -> Result<(), MediaError> {
    if dst.is_empty() {
        return Ok(());
    }
    let sector = sector_size(storage).await?;
    let mut scratch = Scratch::new();
    let mut addr = addr;
    let mut done = 0usize;

    let head_offset = (addr % sector) as usize;
    if head_offset != 0 {
        alloc_scratch(&mut scratch, sector as usize)?;
        storage.read_sectors(&mut scratch, to_sector(addr / sector)?, 1).await?;
        let n = (sector as usize - head_offset).min(dst.len());
        dst[..n].copy_from_slice(&scratch[head_offset..head_offset + n]);
        addr += n as u64;
        done += n;
    }

    let remaining = dst.len() - done;
    let whole = remaining - remaining % sector as usize;
    if whole > 0 {
        let count = to_sector(whole as u64 / sector)?;
        storage
            .read_sectors(&mut dst[done..done + whole], to_sector(addr / sector)?, count)
            .await?;
        addr += whole as u64;
        done += whole;
    }

    let tail = dst.len() - done;
    if tail > 0 {
        alloc_scratch(&mut scratch, sector as usize)?;
        storage.read_sectors(&mut scratch, to_sector(addr / sector)?, 1).await?;
        dst[done..].copy_from_slice(&scratch[..tail]);
    }
    Ok(())
}

/// Write `src` starting at byte address `addr`, preserving the untouched parts of partial sectors
pub async fn write_media<S: StorageInterface>(
    storage: &S,
    addr: u64,
    src: &[u8],
) -> Result<(), MediaError> {
    if src.is_empty() {
        return Ok(());
    }
    let sector = sector_size(storage).await?;
    let mut scratch = Scratch::new();
    let mut addr = addr;
    let mut done = 0usize;

    let head_offset = (addr % sector) as usize;
    if head_offset != 0 {
        alloc_scratch(&mut scratch, sector as usize)?;
        let lba = to_sector(addr / sector)?;
        storage.read_sectors(&mut scratch, lba, 1).await?;
        let n = (sector as usize - head_offset).min(src.len());
        scratch[head_offset..head_offset + n].copy_from_slice(&src[..n]);
        storage.write_sectors(&scratch, lba, 1).await?;
        addr += n as u64;
        done += n;
    }

    let remaining = src.len() - done;
    let whole = remaining - remaining % sector as usize;
    if whole > 0 {
        let count = to_sector(whole as u64 / sector)?;
        storage
            .write_sectors(&src[done..done + whole], to_sector(addr / sector)?, count)
            .await?;
        addr += whole as u64;
        done += whole;
    }

    let tail = src.len() - done;
    if tail > 0 {
        alloc_scratch(&mut scratch, sector as usize)?;
        let lba = to_sector(addr / sector)?;
        storage.read_sectors(&mut scratch, lba, 1).await?;
        scratch[..tail].copy_from_slice(&src[done..]);
        storage.write_sectors(&scratch, lba, 1).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RamDisk;
    use fake::{Fake, Faker};
    use rstest::rstest;

    fn random_bytes(len: usize) -> Vec<u8, 2048> {
        (0..len).map(|_| Faker.fake::<u8>()).collect()
    }

    #[rstest]
    #[tokio::test]
    async fn test_write_then_read_returns_same_bytes(
        #[values(0, 1, 511)] offset: u64,
        #[values(1, 511, 512, 513, 1536)] len: usize,
    ) {
        let disk = RamDisk::<512, 8192>::new();
        let addr = 1024 + offset;
        let data = random_bytes(len);

        write_media(&disk, addr, &data).await.unwrap();

        let mut read_back = [0u8; 2048];
        read_media(&disk, addr, &mut read_back[..len]).await.unwrap();
        assert_eq!(&read_back[..len], &data[..]);
    }

    #[tokio::test]
    async fn test_partial_write_preserves_neighbours() {
        let disk = RamDisk::<512, 4096>::new();
        disk.set_data(0, &[0xee; 4096]);

        write_media(&disk, 510, &[0x11; 4]).await.unwrap();

        let mut raw = [0u8; 8];
        disk.get_data(508, &mut raw);
        assert_eq!(raw, [0xee, 0xee, 0x11, 0x11, 0x11, 0x11, 0xee, 0xee]);
    }

    #[tokio::test]
    async fn test_zero_length_is_noop() {
        let disk = RamDisk::<512, 4096>::new();
        disk.set_present(false);
        assert_eq!(write_media(&disk, 3, &[]).await, Ok(()));
        assert_eq!(read_media(&disk, 3, &mut []).await, Ok(()));
    }

    #[tokio::test]
    async fn test_oversized_sector_reports_out_of_memory() {
        let disk = RamDisk::<8192, 16384>::new();
        let mut buf = [0u8; 16];

        assert_eq!(read_media(&disk, 1, &mut buf).await, Err(MediaError::OutOfMemory));
        assert_eq!(write_media(&disk, 1, &buf).await, Err(MediaError::OutOfMemory));
    }

    #[tokio::test]
    async fn test_aligned_access_needs_no_scratch() {
        let disk = RamDisk::<8192, 16384>::new();
        let data = [0x42u8; 8192];

        write_media(&disk, 8192, &data).await.unwrap();

        let mut read_back = [0u8; 8192];
        read_media(&disk, 8192, &mut read_back).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_storage_error_propagates() {
        let disk = RamDisk::<512, 1024>::new();
        let mut buf = [0u8; 512];
        assert_eq!(
            read_media(&disk, 1024, &mut buf).await,
            Err(MediaError::Storage(StorageError::OutOfRange))
        );
    }
}

//! Constants and runtime configuration of the mass storage function.

#[cfg(feature = "defmt")]
use defmt::Format;

/// Maximum number of logical units behind one MSC interface
pub const MAX_LUN: usize = 4;

/// Command Block Wrapper size in bytes
pub const CBW_SIZE: usize = 31;

/// Command Status Wrapper size in bytes
pub const CSW_SIZE: usize = 13;

/// Command buffer size. Holds CBW, CSW and every non-sector response
pub const COMMAND_BUFFER_SIZE: usize = 4096;

/// Logical block size reported to the host
pub const LOGICAL_BLOCK_SIZE: usize = 512;

/// Sectors staged per data buffer fill when the buffer is sized by default
pub const DEFAULT_DATA_BUFFER_SECTORS: usize = 256;

/// Default data buffer size in bytes
pub const DEFAULT_DATA_BUFFER_SIZE: usize = DEFAULT_DATA_BUFFER_SECTORS * LOGICAL_BLOCK_SIZE;

/// Largest byte count a single DMA burst may move
pub const DEFAULT_DMA_BURST_LIMIT: usize = 0x20000;

/// Bulk max packet size at full speed
pub const FULL_SPEED_MAX_PACKET_SIZE: usize = 64;

/// Bulk max packet size at high speed
pub const HIGH_SPEED_MAX_PACKET_SIZE: usize = 512;

/// Largest backend sector the media adapter can stage for partial access
pub const SCRATCH_SECTOR_CAPACITY: usize = 4096;

/// TEST UNIT READY polls absorbed per LUN before the drive counts as mounted
pub const CONNECT_CHECK_PER_LUN: i32 = 3;

/// Interface number of the MSC interface (after the two CDC interfaces)
pub const MSC_INTERFACE_NUMBER: u16 = 2;

/// Vendor identification reported by INQUIRY
pub const DEFAULT_VENDOR_ID: [u8; 8] = *b"MSCVCP  ";

/// Product identification reported by INQUIRY
pub const DEFAULT_PRODUCT_ID: [u8; 16] = *b"USB Mass Storage";

/// Product revision reported by INQUIRY
pub const DEFAULT_REVISION: [u8; 4] = *b"1.00";

/// Rejected configuration values
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ConfigError {
    /// Logical block size is zero or not a power of two
    InvalidBlockSize(u32),
    /// DMA burst limit is zero or not a whole number of blocks
    InvalidBurstLimit(usize),
    /// Data buffer cannot hold a whole number of blocks
    InvalidDataBuffer(usize),
    /// More logical units than `MAX_LUN`
    TooManyLuns(usize),
}

/// Mass storage function configuration
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct MscConfig {
    /// INQUIRY vendor identification
    pub vendor_id: [u8; 8],
    /// INQUIRY product identification
    pub product_id: [u8; 16],
    /// INQUIRY product revision level
    pub revision: [u8; 4],
    /// Logical block size seen by the host
    pub logical_block_size: u32,
    /// Largest byte count per DMA burst
    pub dma_burst_limit: usize,
    /// wIndex expected by the class requests
    pub interface_number: u16,
    /// Report the medium as write protected and refuse writes
    pub write_protect: bool,
}

impl Default for MscConfig {
    fn default() -> Self {
        Self::new(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID, DEFAULT_REVISION)
    }
}

impl MscConfig {
    pub const fn new(vendor_id: [u8; 8], product_id: [u8; 16], revision: [u8; 4]) -> Self {
        Self {
            vendor_id,
            product_id,
            revision,
            logical_block_size: LOGICAL_BLOCK_SIZE as u32,
            dma_burst_limit: DEFAULT_DMA_BURST_LIMIT,
            interface_number: MSC_INTERFACE_NUMBER,
            write_protect: false,
        }
    }

    pub const fn with_dma_burst_limit(mut self, limit: usize) -> Self {
        self.dma_burst_limit = limit;
        self
    }

    pub const fn with_interface_number(mut self, interface_number: u16) -> Self {
        self.interface_number = interface_number;
        self
    }

    pub const fn with_write_protect(mut self, write_protect: bool) -> Self {
        self.write_protect = write_protect;
        self
    }

    /// Check the configuration against a data buffer of `data_buffer_size` bytes
    pub fn validate(&self, data_buffer_size: usize) -> Result<(), ConfigError> {
        let block = self.logical_block_size;
        if block == 0 || !block.is_power_of_two() {
            return Err(ConfigError::InvalidBlockSize(block));
        }
        let block = block as usize;
        if self.dma_burst_limit == 0 || self.dma_burst_limit % block != 0 {
            return Err(ConfigError::InvalidBurstLimit(self.dma_burst_limit));
        }
        if data_buffer_size == 0 || data_buffer_size % block != 0 {
            return Err(ConfigError::InvalidDataBuffer(data_buffer_size));
        }
        Ok(())
    }
}

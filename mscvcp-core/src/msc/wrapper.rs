//! Bulk-Only Transport framing: Command Block Wrapper and Command Status Wrapper.

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use num_enum::{IntoPrimitive, TryFromPrimitive};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::config::{CBW_SIZE, CSW_SIZE};

/// Bulk Transport signatures
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum BulkTransportSignature {
    /// "USBC"
    CommandBlockWrapper = 0x43425355,
    /// "USBS"
    CommandStatusWrapper = 0x53425355,
}

bitflags! {
    /// bmCBWFlags
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct CbwFlags: u8 {
        /// Bit7: 1 = Data-In (device to host), 0 = Data-Out
        const DATA_IN = 0x80;
    }
}

#[cfg(feature = "defmt")]
impl Format for CbwFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "CbwFlags({=u8:#x})", self.bits())
    }
}

/// Direction of the data stage as declared by the host
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum DataDirection {
    HostToDevice,
    DeviceToHost,
}

/// CBW framing errors
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum CbwError {
    /// Received byte count was not exactly 31
    InvalidLength(usize),
    /// dCBWSignature was not "USBC"
    InvalidSignature(u32),
}

/// Bulk Transport command block wrapper packet
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct CommandBlockWrapper {
    /// Signature: 0x43425355
    pub signature: u32,
    /// Tag: echoed back in the CSW
    pub tag: u32,
    /// Data Transfer Length the host expects on the bulk endpoints
    pub data_transfer_length: u32,
    /// Flags: Bit7=Data In
    pub flags: CbwFlags,
    /// LUN: Logical Unit Number
    pub lun: u8,
    /// Command Length: valid bytes of `command`
    pub command_length: u8,
    /// Command: SCSI command descriptor block
    pub command: [u8; 16],
}

impl Default for CommandBlockWrapper {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBlockWrapper {
    pub fn new() -> Self {
        Self {
            signature: BulkTransportSignature::CommandBlockWrapper as u32,
            tag: 0,
            data_transfer_length: 0,
            flags: CbwFlags::empty(),
            lun: 0,
            command_length: 0,
            command: [0; 16],
        }
    }

    /// Decode a CBW exactly as received from the bulk-OUT endpoint
    pub fn decode(data: &[u8]) -> Result<Self, CbwError> {
        if data.len() != CBW_SIZE {
            return Err(CbwError::InvalidLength(data.len()));
        }
        let signature = LittleEndian::read_u32(&data[0..4]);
        if signature != BulkTransportSignature::CommandBlockWrapper as u32 {
            return Err(CbwError::InvalidSignature(signature));
        }
        let mut command = [0u8; 16];
        command.copy_from_slice(&data[15..31]);
        Ok(Self {
            signature,
            tag: LittleEndian::read_u32(&data[4..8]),
            data_transfer_length: LittleEndian::read_u32(&data[8..12]),
            flags: CbwFlags::from_bits_retain(data[12]),
            lun: data[13] & 0x0f,
            command_length: data[14] & 0x1f,
            command,
        })
    }

    /// Convert to byte array
    pub fn to_data(&self) -> [u8; CBW_SIZE] {
        let mut data = [0; CBW_SIZE];
        LittleEndian::write_u32(&mut data[0..4], self.signature);
        LittleEndian::write_u32(&mut data[4..8], self.tag);
        LittleEndian::write_u32(&mut data[8..12], self.data_transfer_length);
        data[12] = self.flags.bits();
        data[13] = self.lun;
        data[14] = self.command_length;
        data[15..31].copy_from_slice(&self.command);
        data
    }

    pub fn data_direction(&self) -> DataDirection {
        if self.flags.contains(CbwFlags::DATA_IN) {
            DataDirection::DeviceToHost
        } else {
            DataDirection::HostToDevice
        }
    }

    pub fn opcode(&self) -> u8 {
        self.command[0]
    }

    /// Logical block address of READ/WRITE(10/12), bytes 2..6 of the CDB
    pub fn logical_block_address(&self) -> u32 {
        BigEndian::read_u32(&self.command[2..6])
    }

    /// Transfer length in blocks of READ/WRITE(10), bytes 7..9 of the CDB
    pub fn transfer_length10(&self) -> u32 {
        u32::from(BigEndian::read_u16(&self.command[7..9]))
    }

    /// Transfer length in blocks of READ/WRITE(12), bytes 6..10 of the CDB
    pub fn transfer_length12(&self) -> u32 {
        BigEndian::read_u32(&self.command[6..10])
    }
}

/// Bulk Transport command status
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum CommandBlockStatus {
    CommandPassed = 0x00,
    CommandFailed = 0x01,
    PhaseError = 0x02,
}

/// Bulk Transport command status wrapper packet
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct CommandStatusWrapper {
    /// Signature: 0x53425355
    pub signature: u32,
    /// Tag: copied from the CBW
    pub tag: u32,
    /// Data Residue: bytes requested minus bytes transferred
    pub data_residue: u32,
    /// Status
    pub status: CommandBlockStatus,
}

impl CommandStatusWrapper {
    pub fn new(tag: u32, data_residue: u32, status: CommandBlockStatus) -> Self {
        Self {
            signature: BulkTransportSignature::CommandStatusWrapper as u32,
            tag,
            data_residue,
            status,
        }
    }

    pub fn from_data(data: &[u8]) -> Option<Self> {
        if data.len() < CSW_SIZE {
            return None;
        }
        Some(Self {
            signature: LittleEndian::read_u32(&data[0..4]),
            tag: LittleEndian::read_u32(&data[4..8]),
            data_residue: LittleEndian::read_u32(&data[8..12]),
            status: CommandBlockStatus::try_from(data[12]).ok()?,
        })
    }

    /// Write the 13 wire bytes into the front of `buf`
    pub fn prepare_to_buf(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(&mut buf[0..4], self.signature);
        LittleEndian::write_u32(&mut buf[4..8], self.tag);
        LittleEndian::write_u32(&mut buf[8..12], self.data_residue);
        buf[12] = self.status.into();
        CSW_SIZE
    }
}

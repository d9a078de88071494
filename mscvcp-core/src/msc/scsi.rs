//! SCSI/UFI command codes, sense data and response blocks.

use bit_field::BitField;
use byteorder::{BigEndian, ByteOrder};
use num_enum::{IntoPrimitive, TryFromPrimitive};

#[cfg(feature = "defmt")]
use defmt::Format;

/// SCSI command codes
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ScsiCommand {
    TestUnitReady = 0x00,
    RequestSense = 0x03,
    Inquiry = 0x12,
    /// Declared for completeness, answered like an unsupported opcode
    ModeSelect6 = 0x15,
    ModeSense6 = 0x1A,
    StartStopUnit = 0x1B,
    PreventAllowMediumRemoval = 0x1E,
    ReadFormatCapacities = 0x23,
    ReadCapacity10 = 0x25,
    Read10 = 0x28,
    Write10 = 0x2A,
    Verify10 = 0x2F,
    ModeSelect10 = 0x55,
    ModeSense10 = 0x5A,
    Read12 = 0xA8,
    Write12 = 0xAA,
}

/// Sense keys
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum SenseKey {
    NoSense = 0x00,
    RecoveredError = 0x01,
    NotReady = 0x02,
    MediumError = 0x03,
    HardwareError = 0x04,
    IllegalRequest = 0x05,
    UnitAttention = 0x06,
    DataProtect = 0x07,
}

/// Additional Sense Code and qualifier
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct AdditionalSenseCode {
    /// Additional Sense Code
    pub asc: u8,
    /// Additional Sense Code Qualifier
    pub ascq: u8,
}

/// Additional sense conditions reported by this device
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum AdditionalSenseCodeType {
    NoAdditionalSenseInformation,
    WriteError,
    UnrecoveredReadError,
    InvalidCommandOperationCode,
    LogicalBlockAddressOutOfRange,
    InvalidFieldInCdb,
    LogicalUnitNotSupported,
    WriteProtected,
    MediumNotPresent,
}

impl AdditionalSenseCodeType {
    pub fn to_code(&self) -> AdditionalSenseCode {
        let (asc, ascq) = match self {
            AdditionalSenseCodeType::NoAdditionalSenseInformation => (0x00, 0x00),
            AdditionalSenseCodeType::WriteError => (0x0C, 0x00),
            AdditionalSenseCodeType::UnrecoveredReadError => (0x11, 0x00),
            AdditionalSenseCodeType::InvalidCommandOperationCode => (0x20, 0x00),
            AdditionalSenseCodeType::LogicalBlockAddressOutOfRange => (0x21, 0x00),
            AdditionalSenseCodeType::InvalidFieldInCdb => (0x24, 0x00),
            AdditionalSenseCodeType::LogicalUnitNotSupported => (0x25, 0x00),
            AdditionalSenseCodeType::WriteProtected => (0x27, 0x00),
            AdditionalSenseCodeType::MediumNotPresent => (0x3A, 0x00),
        };
        AdditionalSenseCode { asc, ascq }
    }
}

/// Current sense condition held between commands
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Sense {
    pub key: SenseKey,
    pub code: AdditionalSenseCode,
}

impl Default for Sense {
    fn default() -> Self {
        Self::NONE
    }
}

impl Sense {
    pub const NONE: Sense = Sense {
        key: SenseKey::NoSense,
        code: AdditionalSenseCode { asc: 0, ascq: 0 },
    };

    pub fn new(key: SenseKey, code: AdditionalSenseCodeType) -> Self {
        Self {
            key,
            code: code.to_code(),
        }
    }
}

pub const REQUEST_SENSE_DATA_SIZE: usize = 18;

/// Fixed format sense data
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct RequestSenseData {
    /// Response code 0x70 (current error); bit7 set reports the information field valid
    pub valid: bool,
    pub sense: Sense,
}

impl RequestSenseData {
    pub fn to_data(&self) -> [u8; REQUEST_SENSE_DATA_SIZE] {
        let mut data = [0u8; REQUEST_SENSE_DATA_SIZE];
        data[0] = 0x70;
        data[0].set_bit(7, self.valid);
        data[2] = u8::from(self.sense.key) & 0x0f;
        // additional sense length: bytes 8..18
        data[7] = 0x0a;
        data[12] = self.sense.code.asc;
        data[13] = self.sense.code.ascq;
        data
    }
}

pub const INQUIRY_DATA_SIZE: usize = 36;

/// Standard INQUIRY data
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct InquiryData {
    /// Direct access block device
    pub peripheral_device_type: u8,
    /// Removable medium
    pub removable: bool,
    pub vendor_id: [u8; 8],
    pub product_id: [u8; 16],
    pub revision: [u8; 4],
}

impl InquiryData {
    pub fn new(vendor_id: [u8; 8], product_id: [u8; 16], revision: [u8; 4]) -> Self {
        Self {
            peripheral_device_type: 0x00,
            removable: true,
            vendor_id,
            product_id,
            revision,
        }
    }

    pub fn to_data(&self) -> [u8; INQUIRY_DATA_SIZE] {
        let mut data = [0u8; INQUIRY_DATA_SIZE];
        data[0] = self.peripheral_device_type & 0x1f;
        data[1].set_bit(7, self.removable);
        data[4] = (INQUIRY_DATA_SIZE - 5) as u8;
        data[8..16].copy_from_slice(&self.vendor_id);
        data[16..32].copy_from_slice(&self.product_id);
        data[32..36].copy_from_slice(&self.revision);
        data
    }
}

pub const READ_CAPACITY10_DATA_SIZE: usize = 8;

/// READ CAPACITY(10) response
pub fn read_capacity10(block_count: u32, block_length: u32) -> [u8; READ_CAPACITY10_DATA_SIZE] {
    let mut data = [0u8; READ_CAPACITY10_DATA_SIZE];
    BigEndian::write_u32(&mut data[0..4], block_count.saturating_sub(1));
    BigEndian::write_u32(&mut data[4..8], block_length);
    data
}

pub const READ_FORMAT_CAPACITIES_DATA_SIZE: usize = 20;

/// READ FORMAT CAPACITIES response: list header, current descriptor, one formattable descriptor
pub fn read_format_capacities(
    block_count: u32,
    block_length: u32,
) -> [u8; READ_FORMAT_CAPACITIES_DATA_SIZE] {
    let mut data = [0u8; READ_FORMAT_CAPACITIES_DATA_SIZE];
    data[3] = 0x10;
    BigEndian::write_u32(&mut data[4..8], block_count);
    // descriptor type 2: formatted media
    BigEndian::write_u32(&mut data[8..12], block_length & 0x00ff_ffff);
    data[8] = 0x02;
    BigEndian::write_u32(&mut data[12..16], block_count);
    BigEndian::write_u32(&mut data[16..20], block_length & 0x00ff_ffff);
    data
}

/// MODE SENSE page codes
pub mod mode_page {
    pub const READ_WRITE_ERROR_RECOVERY: u8 = 0x01;
    pub const FLEXIBLE_DISK: u8 = 0x05;
    pub const REMOVABLE_BLOCK_ACCESS: u8 = 0x1B;
    pub const TIMER_AND_PROTECT: u8 = 0x1C;
    pub const ALL: u8 = 0x3F;
}

const PAGE_READ_WRITE_ERROR_RECOVERY: [u8; 12] =
    [0x01, 0x0A, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00];

#[rustfmt::skip]
const PAGE_FLEXIBLE_DISK: [u8; 32] = [
    0x05, 0x1E, 0x13, 0x88, 0x08, 0x20, 0x02, 0x00,
    0x01, 0xF4, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x05, 0x1E, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x01, 0x68, 0x00, 0x00,
];

const PAGE_REMOVABLE_BLOCK_ACCESS: [u8; 12] =
    [0x1B, 0x0A, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

const PAGE_TIMER_AND_PROTECT: [u8; 8] = [0x1C, 0x06, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00];

/// Flexible disk geometry presented to the host
const FLEXIBLE_DISK_HEADS: u8 = 2;
const FLEXIBLE_DISK_SECTORS_PER_TRACK: u8 = 64;

pub const MODE_SENSE10_HEADER_SIZE: usize = 8;

pub const MODE_SENSE_MAX_DATA_SIZE: usize = MODE_SENSE10_HEADER_SIZE
    + PAGE_READ_WRITE_ERROR_RECOVERY.len()
    + PAGE_FLEXIBLE_DISK.len()
    + PAGE_REMOVABLE_BLOCK_ACCESS.len()
    + PAGE_TIMER_AND_PROTECT.len();

fn put_flexible_disk_page(buf: &mut [u8], block_count: u32) -> usize {
    buf[..PAGE_FLEXIBLE_DISK.len()].copy_from_slice(&PAGE_FLEXIBLE_DISK);
    buf[4] = FLEXIBLE_DISK_HEADS;
    buf[5] = FLEXIBLE_DISK_SECTORS_PER_TRACK;
    let cylinders = block_count / (FLEXIBLE_DISK_HEADS as u32 * FLEXIBLE_DISK_SECTORS_PER_TRACK as u32);
    BigEndian::write_u16(&mut buf[8..10], cylinders.min(u16::MAX as u32) as u16);
    PAGE_FLEXIBLE_DISK.len()
}

fn put_page(buf: &mut [u8], page: &[u8]) -> usize {
    buf[..page.len()].copy_from_slice(page);
    page.len()
}

/// Build a MODE SENSE(10) response for `page_code` into `buf`.
///
/// Returns the response length, or `None` for an unsupported page.
pub fn mode_sense10(
    page_code: u8,
    block_count: u32,
    write_protect: bool,
    buf: &mut [u8; MODE_SENSE_MAX_DATA_SIZE],
) -> Option<usize> {
    buf.fill(0);
    let mut len = MODE_SENSE10_HEADER_SIZE;
    match page_code {
        mode_page::READ_WRITE_ERROR_RECOVERY => {
            len += put_page(&mut buf[len..], &PAGE_READ_WRITE_ERROR_RECOVERY);
        }
        mode_page::FLEXIBLE_DISK => {
            len += put_flexible_disk_page(&mut buf[len..], block_count);
        }
        mode_page::REMOVABLE_BLOCK_ACCESS => {
            len += put_page(&mut buf[len..], &PAGE_REMOVABLE_BLOCK_ACCESS);
        }
        mode_page::TIMER_AND_PROTECT => {
            len += put_page(&mut buf[len..], &PAGE_TIMER_AND_PROTECT);
        }
        mode_page::ALL => {
            len += put_page(&mut buf[len..], &PAGE_READ_WRITE_ERROR_RECOVERY);
            len += put_flexible_disk_page(&mut buf[len..], block_count);
            len += put_page(&mut buf[len..], &PAGE_REMOVABLE_BLOCK_ACCESS);
            len += put_page(&mut buf[len..], &PAGE_TIMER_AND_PROTECT);
        }
        _ => return None,
    }
    // mode data length excludes itself
    BigEndian::write_u16(&mut buf[0..2], (len - 2) as u16);
    buf[3].set_bit(7, write_protect);
    Some(len)
}

pub const MODE_SENSE6_DATA_SIZE: usize = 4;

/// MODE SENSE(6) header without block descriptors or pages
pub fn mode_sense6(write_protect: bool) -> [u8; MODE_SENSE6_DATA_SIZE] {
    let mut data = [0x03, 0x00, 0x00, 0x00];
    data[2].set_bit(7, write_protect);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_request_sense_layout() {
        let data = RequestSenseData {
            valid: false,
            sense: Sense::new(SenseKey::IllegalRequest, AdditionalSenseCodeType::InvalidFieldInCdb),
        }
        .to_data();

        assert_eq!(data[0], 0x70);
        assert_eq!(data[2], 0x05);
        assert_eq!(data[7], 0x0a);
        assert_eq!(data[12], 0x24);
        assert_eq!(data[13], 0x00);

        let data = RequestSenseData { valid: true, sense: Sense::NONE }.to_data();
        assert_eq!(data[0], 0xf0);
        assert_eq!(data[2], 0x00);
    }

    #[test]
    fn test_inquiry_layout() {
        let data = InquiryData::new(*b"VENDOR  ", *b"PRODUCT         ", *b"0001").to_data();
        assert_eq!(&data[0..8], &[0x00, 0x80, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00]);
        assert_eq!(&data[8..16], b"VENDOR  ");
        assert_eq!(&data[16..32], b"PRODUCT         ");
        assert_eq!(&data[32..36], b"0001");
    }

    #[test]
    fn test_read_capacity10() {
        assert_eq!(
            read_capacity10(0x1000, 512),
            [0x00, 0x00, 0x0f, 0xff, 0x00, 0x00, 0x02, 0x00]
        );
    }

    #[test]
    fn test_read_format_capacities() {
        let data = read_format_capacities(0x2000, 512);
        assert_eq!(&data[0..4], &[0, 0, 0, 0x10]);
        assert_eq!(&data[4..12], &[0x00, 0x00, 0x20, 0x00, 0x02, 0x00, 0x02, 0x00]);
        assert_eq!(&data[12..20], &[0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x02, 0x00]);
    }

    #[rstest]
    #[case(mode_page::READ_WRITE_ERROR_RECOVERY, 20)]
    #[case(mode_page::FLEXIBLE_DISK, 40)]
    #[case(mode_page::REMOVABLE_BLOCK_ACCESS, 20)]
    #[case(mode_page::TIMER_AND_PROTECT, 16)]
    #[case(mode_page::ALL, 72)]
    fn test_mode_sense10_lengths(#[case] page: u8, #[case] expected_len: usize) {
        let mut buf = [0u8; MODE_SENSE_MAX_DATA_SIZE];
        let len = mode_sense10(page, 0x4000, false, &mut buf).unwrap();
        assert_eq!(len, expected_len);
        assert_eq!(BigEndian::read_u16(&buf[0..2]) as usize, expected_len - 2);
        let first_page = if page == mode_page::ALL {
            mode_page::READ_WRITE_ERROR_RECOVERY
        } else {
            page
        };
        assert_eq!(buf[MODE_SENSE10_HEADER_SIZE], first_page);
    }

    #[test]
    fn test_mode_sense10_flexible_disk_geometry() {
        let mut buf = [0u8; MODE_SENSE_MAX_DATA_SIZE];
        mode_sense10(mode_page::ALL, 0x4000, true, &mut buf).unwrap();

        // flexible disk page follows the 12-byte error recovery page
        let page = &buf[20..52];
        assert_eq!(page[0], mode_page::FLEXIBLE_DISK);
        assert_eq!(page[4], 2);
        assert_eq!(page[5], 64);
        assert_eq!(BigEndian::read_u16(&page[8..10]), 0x4000 / 128);
        assert_eq!(buf[3], 0x80);
    }

    #[test]
    fn test_mode_sense10_unknown_page() {
        let mut buf = [0u8; MODE_SENSE_MAX_DATA_SIZE];
        assert_eq!(mode_sense10(0x08, 0x4000, false, &mut buf), None);
    }

    #[test]
    fn test_mode_sense6_write_protect() {
        assert_eq!(mode_sense6(false), [0x03, 0, 0x00, 0]);
        assert_eq!(mode_sense6(true), [0x03, 0, 0x80, 0]);
    }
}

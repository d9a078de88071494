//! Host/device data-stage reconciliation (the Hn/Hi/Ho against Dn/Di/Do table).
//!
//! `H` is the CBW data transfer length, `D` the length the command descriptor
//! implies. These functions only decide; the state machine applies the result.

#[cfg(feature = "defmt")]
use defmt::Format;

use super::wrapper::DataDirection;
use crate::usb::EndpointId;

/// Decision for one command's data stage
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct CaseAction {
    /// Bytes to move in the data stage
    pub transfer: u32,
    /// Halt this endpoint and defer the CSW until the host clears it
    pub stall: Option<EndpointId>,
    /// Report command failure in the CSW
    pub fail: bool,
    /// Data stage moves less than the host declared
    pub truncated: bool,
    /// CSW residue is H minus the bytes actually moved
    pub report_residue: bool,
}

impl CaseAction {
    fn pass(transfer: u32) -> Self {
        Self {
            transfer,
            ..Self::default()
        }
    }

    fn fail(transfer: u32) -> Self {
        Self {
            transfer,
            fail: true,
            ..Self::default()
        }
    }

    fn stall(ep: EndpointId) -> Self {
        Self {
            stall: Some(ep),
            fail: true,
            ..Self::default()
        }
    }

    fn direction_mismatch(ep: EndpointId) -> Self {
        Self {
            report_residue: true,
            ..Self::stall(ep)
        }
    }
}

/// WRITE(10/12)
pub fn classify_write(host_len: u32, direction: DataDirection, device_len: u64) -> CaseAction {
    if direction == DataDirection::DeviceToHost {
        // Hi <> Do
        return CaseAction::direction_mismatch(EndpointId::MscIn);
    }
    let host = u64::from(host_len);
    if host == device_len {
        // Ho = Do
        CaseAction::pass(host_len)
    } else if host < device_len {
        // Hn < Do, Ho < Do
        CaseAction::fail(host_len)
    } else {
        // Ho > Do
        CaseAction {
            truncated: true,
            report_residue: true,
            ..CaseAction::fail(device_len as u32)
        }
    }
}

/// READ(10/12)
pub fn classify_read(host_len: u32, direction: DataDirection, device_len: u64) -> CaseAction {
    if direction == DataDirection::HostToDevice {
        // Ho <> Di
        return CaseAction::direction_mismatch(EndpointId::MscOut);
    }
    let host = u64::from(host_len);
    if host == device_len {
        // Hi = Di
        CaseAction::pass(host_len)
    } else if host_len == 0 {
        // Hn < Di
        CaseAction::fail(0)
    } else {
        // Hi < Di, Hi > Di, Hi > Dn
        CaseAction::stall(EndpointId::MscIn)
    }
}

/// Commands without a data stage (TEST UNIT READY)
pub fn classify_no_data(host_len: u32, direction: DataDirection) -> CaseAction {
    match (host_len, direction) {
        // Hn = Dn
        (0, _) => CaseAction::pass(0),
        // Ho > Dn
        (_, DataDirection::HostToDevice) => CaseAction::stall(EndpointId::MscOut),
        // Hi > Dn
        (_, DataDirection::DeviceToHost) => CaseAction::stall(EndpointId::MscIn),
    }
}

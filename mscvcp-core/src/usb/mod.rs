//! Boundary to the USB device controller.

#[cfg(feature = "defmt")]
use defmt::Format;

use bitflags::bitflags;

pub mod class;
pub mod flags;
pub mod transfer;

pub use class::{MscVcpClass, UsbClassDriver};
pub use flags::SessionFlags;

/// Bulk endpoints owned by the composite MSC + VCP function
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum EndpointId {
    /// MSC bulk-IN (data-in and CSW)
    MscIn,
    /// MSC bulk-OUT (CBW and data-out)
    MscOut,
    /// VCP bulk-IN
    VcpIn,
    /// VCP bulk-OUT
    VcpOut,
}

impl EndpointId {
    pub const ALL: [EndpointId; 4] = [
        EndpointId::MscIn,
        EndpointId::MscOut,
        EndpointId::VcpIn,
        EndpointId::VcpOut,
    ];

    pub fn is_in(&self) -> bool {
        matches!(self, EndpointId::MscIn | EndpointId::VcpIn)
    }
}

bitflags! {
    /// Endpoint interrupt causes reported by the controller
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct EndpointEvents: u8 {
        /// Host issued an IN token
        const IN_TOKEN = 0x01;
        /// An IN packet has been transmitted
        const DATA_TXED = 0x02;
        /// An OUT packet has been received
        const DATA_RXED = 0x04;
        /// A short OUT packet has been received
        const SHORT_PACKET = 0x08;
    }
}

#[cfg(feature = "defmt")]
impl Format for EndpointEvents {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "EndpointEvents({=u8:#x})", self.bits())
    }
}

/// Negotiated bus speed
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum BusSpeed {
    Full,
    High,
}

impl BusSpeed {
    /// Bulk max packet size for this speed
    pub fn bulk_max_packet_size(&self) -> usize {
        match self {
            BusSpeed::Full => crate::config::FULL_SPEED_MAX_PACKET_SIZE,
            BusSpeed::High => crate::config::HIGH_SPEED_MAX_PACKET_SIZE,
        }
    }
}

/// Setup packet of a class request
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    pub fn from_data(data: &[u8; 8]) -> Self {
        Self {
            request_type: data[0],
            request: data[1],
            value: u16::from_le_bytes([data[2], data[3]]),
            index: u16::from_le_bytes([data[4], data[5]]),
            length: u16::from_le_bytes([data[6], data[7]]),
        }
    }
}

/// Outcome of a class request
#[derive(Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ControlResponse<'a> {
    /// Send this data stage to the host
    Accepted(&'a [u8]),
    /// Complete the status stage with a zero-length packet
    Acknowledged,
    /// STALL the control endpoint
    Rejected,
}

/// Register-level operations the core needs from the device controller.
///
/// DMA buffers handed to `dma_start_in`/`dma_start_out` must stay untouched until
/// `dma_busy` reports false; the transfer helpers in [`transfer`] spin before they
/// release the borrow.
#[cfg_attr(test, mockall::automock)]
pub trait UsbDeviceController {
    /// Max packet size currently configured on `ep`
    fn max_packet_size(&self, ep: EndpointId) -> usize;
    /// Configure max packet size and interrupt enables of `ep`
    fn configure_endpoint(&mut self, ep: EndpointId, max_packet_size: usize, events: EndpointEvents);
    /// Bytes held in the FIFO of `ep`
    fn data_count(&self, ep: EndpointId) -> usize;
    /// Host has issued an IN token on `ep`
    fn in_token_pending(&self, ep: EndpointId) -> bool;
    /// Start a DMA burst from memory into the FIFO of `ep`
    fn dma_start_in(&mut self, ep: EndpointId, src: &[u8]);
    /// Start a DMA burst from the FIFO of `ep` into memory
    fn dma_start_out(&mut self, ep: EndpointId, dst: &mut [u8]);
    /// DMA engine still running
    fn dma_busy(&self) -> bool;
    /// Stop the DMA engine and reset its state
    fn dma_abort(&mut self);
    /// Terminate the current IN packet (short or zero-length packet)
    fn packet_end(&mut self, ep: EndpointId);
    /// Halt `ep` (the host sees STALL)
    fn halt(&mut self, ep: EndpointId);
    /// `ep` is still halted
    fn is_halted(&self, ep: EndpointId) -> bool;
    /// Flush the FIFO of `ep` and reset its data toggle
    fn flush_and_toggle(&mut self, ep: EndpointId);
}

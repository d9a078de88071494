//! Class hooks of the composite MSC + CDC/VCP function.

use num_enum::TryFromPrimitive;

#[cfg(feature = "defmt")]
use defmt::Format;

use super::{
    BusSpeed, ControlResponse, EndpointEvents, EndpointId, SessionFlags, SetupPacket, UsbDeviceController,
};
use crate::config::{MscConfig, CONNECT_CHECK_PER_LUN};
use crate::vcp::{LineCoding, VcpEndpoints, LINE_CODING_SIZE};

/// Class specific requests handled by this function
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(Format))]
enum ClassRequest {
    /// CDC: SET_LINE_CODING
    SetLineCoding = 0x20,
    /// CDC: GET_LINE_CODING
    GetLineCoding = 0x21,
    /// CDC: SET_CONTROL_LINE_STATE
    SetControlLineState = 0x22,
    /// MSC: Get Max LUN
    GetMaxLun = 0xfe,
    /// MSC: Bulk-Only Mass Storage Reset
    MassStorageReset = 0xff,
}

/// Hooks the USB device stack calls into.
///
/// `configure`, `bus_reset` and the control hooks run from the control
/// endpoint handler, `endpoint_event` from the bulk endpoint interrupt.
pub trait UsbClassDriver {
    /// Device configured at `speed`: set up the bulk endpoints
    fn configure<H: UsbDeviceController>(&mut self, hal: &mut H, speed: BusSpeed);
    /// USB bus reset
    fn bus_reset(&mut self);
    /// Cable unplugged or device suspended
    fn disconnect(&mut self);
    /// Device-to-host class request. The data stage is written into `buf`
    fn control_in<'b>(&mut self, setup: &SetupPacket, buf: &'b mut [u8]) -> ControlResponse<'b>;
    /// Host-to-device class request with its data stage
    fn control_out<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        setup: &SetupPacket,
        data: &[u8],
    ) -> ControlResponse<'static>;
    /// Bulk endpoint interrupt
    fn endpoint_event<H: UsbDeviceController>(&mut self, hal: &mut H, ep: EndpointId, events: EndpointEvents);
}

/// Mass storage plus virtual COM port.
///
/// Shares nothing with the [`crate::msc::BotMachine`] except the [`SessionFlags`].
pub struct MscVcpClass<'a, const TX: usize, const RX: usize> {
    flags: &'a SessionFlags,
    lun_count: u8,
    interface_number: u16,
    line_coding: LineCoding,
    control_line_state: u16,
    vcp: VcpEndpoints<'a, TX, RX>,
}

impl<'a, const TX: usize, const RX: usize> MscVcpClass<'a, TX, RX> {
    pub fn new(config: &MscConfig, flags: &'a SessionFlags, lun_count: u8, vcp: VcpEndpoints<'a, TX, RX>) -> Self {
        Self {
            flags,
            lun_count,
            interface_number: config.interface_number,
            line_coding: LineCoding::default(),
            control_line_state: 0,
            vcp,
        }
    }

    pub fn line_coding(&self) -> LineCoding {
        self.line_coding
    }

    /// DTR (bit 0) and RTS (bit 1) from the last SET_CONTROL_LINE_STATE
    pub fn control_line_state(&self) -> u16 {
        self.control_line_state
    }
}

impl<'a, const TX: usize, const RX: usize> UsbClassDriver for MscVcpClass<'a, TX, RX> {
    fn configure<H: UsbDeviceController>(&mut self, hal: &mut H, speed: BusSpeed) {
        let max_packet_size = speed.bulk_max_packet_size();
        for ep in EndpointId::ALL {
            let events = if ep.is_in() {
                EndpointEvents::IN_TOKEN | EndpointEvents::DATA_TXED
            } else {
                EndpointEvents::DATA_RXED | EndpointEvents::SHORT_PACKET
            };
            hal.configure_endpoint(ep, max_packet_size, events);
        }
        self.flags.set_connected(true);
        info!("class: configured, bulk max packet {}", max_packet_size);
    }

    fn bus_reset(&mut self) {
        info!("class: bus reset");
        self.flags.request_reset();
        self.flags.set_media_removed(false);
        self.flags.set_vcp_connected(false);
        self.flags.set_msc_connected(false);
        self.flags.set_data_bus_connected(true);
    }

    fn disconnect(&mut self) {
        info!("class: disconnected");
        self.flags.set_connected(false);
        self.flags.set_data_bus_connected(false);
        self.flags.set_vcp_connected(false);
        self.flags.set_msc_connected(false);
        self.flags.request_reset();
    }

    fn control_in<'b>(&mut self, setup: &SetupPacket, buf: &'b mut [u8]) -> ControlResponse<'b> {
        match ClassRequest::try_from(setup.request) {
            Ok(ClassRequest::GetMaxLun) => {
                if setup.value != 0 || setup.index != self.interface_number || setup.length != 1 || buf.is_empty() {
                    warn!("class: malformed GET_MAX_LUN {:?}", setup);
                    return ControlResponse::Rejected;
                }
                self.flags
                    .seed_connect_check(i32::from(self.lun_count) * CONNECT_CHECK_PER_LUN);
                buf[0] = self.lun_count.saturating_sub(1);
                ControlResponse::Accepted(&buf[..1])
            }
            Ok(ClassRequest::GetLineCoding) => {
                if buf.len() < LINE_CODING_SIZE {
                    return ControlResponse::Rejected;
                }
                buf[..LINE_CODING_SIZE].copy_from_slice(&self.line_coding.to_data());
                let len = LINE_CODING_SIZE.min(usize::from(setup.length));
                ControlResponse::Accepted(&buf[..len])
            }
            _ => {
                debug!("class: unsupported IN request {:#x}", setup.request);
                ControlResponse::Rejected
            }
        }
    }

    fn control_out<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        setup: &SetupPacket,
        data: &[u8],
    ) -> ControlResponse<'static> {
        match ClassRequest::try_from(setup.request) {
            Ok(ClassRequest::MassStorageReset) => {
                if setup.value != 0 || setup.index != 0 || setup.length != 0 {
                    warn!("class: malformed mass storage reset {:?}", setup);
                    return ControlResponse::Rejected;
                }
                debug!("class: mass storage reset");
                hal.flush_and_toggle(EndpointId::MscIn);
                hal.flush_and_toggle(EndpointId::MscOut);
                self.flags.request_reset();
                ControlResponse::Acknowledged
            }
            Ok(ClassRequest::SetLineCoding) => match LineCoding::from_data(data) {
                Some(coding) => {
                    debug!("class: line coding {:?}", coding);
                    self.line_coding = coding;
                    self.flags.set_vcp_connected(true);
                    ControlResponse::Acknowledged
                }
                None => ControlResponse::Rejected,
            },
            Ok(ClassRequest::SetControlLineState) => {
                self.control_line_state = setup.value;
                ControlResponse::Acknowledged
            }
            _ => {
                debug!("class: unsupported OUT request {:#x}", setup.request);
                ControlResponse::Rejected
            }
        }
    }

    fn endpoint_event<H: UsbDeviceController>(&mut self, hal: &mut H, ep: EndpointId, events: EndpointEvents) {
        let result = match ep {
            // MSC IN completion is polled through the FIFO count
            EndpointId::MscIn => Ok(()),
            EndpointId::MscOut => {
                if events.intersects(EndpointEvents::DATA_RXED | EndpointEvents::SHORT_PACKET) {
                    self.flags.set_cbw_pending();
                }
                Ok(())
            }
            EndpointId::VcpIn => self.vcp.on_bulk_in(hal, events),
            EndpointId::VcpOut => self.vcp.on_bulk_out(hal, events),
        };
        if let Err(e) = result {
            warn!("class: {:?} transfer failed: {:?}", ep, e);
        }
    }
}

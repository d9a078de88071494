//! Virtual COM port byte pipe sharing the controller with the MSC function.
//!
//! [`VcpTransport`] owns a send and a receive ring. Splitting it yields the
//! application half ([`VcpPort`]) and the endpoint half ([`VcpEndpoints`])
//! that the class driver runs from endpoint interrupts.

#[cfg(feature = "defmt")]
use defmt::Format;

use heapless::spsc::{Consumer, Producer, Queue};

use crate::config::HIGH_SPEED_MAX_PACKET_SIZE;
use crate::usb::transfer::{dma_in, dma_out, TransferError};
use crate::usb::{EndpointEvents, EndpointId, SessionFlags, UsbDeviceController};

/// Default send ring capacity (one slot is kept free by the queue)
pub const DEFAULT_SEND_CAPACITY: usize = 1024;

/// Default receive ring capacity
pub const DEFAULT_RECV_CAPACITY: usize = 512 * 3;

/// Inspect freshly received bytes. Returning `false` drops them instead of buffering
pub type ReceiveHook = fn(&[u8]) -> bool;

/// VCP errors
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum VcpError {
    /// Host has not opened the port yet (no SET_LINE_CODING)
    NotConnected,
}

/// CDC line coding, 7 bytes on the wire
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct LineCoding {
    /// Baud rate
    pub dte_rate: u32,
    /// 0: 1 stop bit, 1: 1.5 stop bits, 2: 2 stop bits
    pub char_format: u8,
    /// 0: none, 1: odd, 2: even, 3: mark, 4: space
    pub parity_type: u8,
    /// 5, 6, 7, 8 or 16
    pub data_bits: u8,
}

pub const LINE_CODING_SIZE: usize = 7;

impl Default for LineCoding {
    fn default() -> Self {
        Self {
            dte_rate: 115200,
            char_format: 0,
            parity_type: 0,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    pub fn from_data(data: &[u8]) -> Option<Self> {
        if data.len() < LINE_CODING_SIZE {
            return None;
        }
        Some(Self {
            dte_rate: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            char_format: data[4],
            parity_type: data[5],
            data_bits: data[6],
        })
    }

    pub fn to_data(&self) -> [u8; LINE_CODING_SIZE] {
        let mut data = [0u8; LINE_CODING_SIZE];
        data[0..4].copy_from_slice(&self.dte_rate.to_le_bytes());
        data[4] = self.char_format;
        data[5] = self.parity_type;
        data[6] = self.data_bits;
        data
    }
}

/// Send and receive rings
pub struct VcpTransport<const TX: usize, const RX: usize> {
    tx: Queue<u8, TX>,
    rx: Queue<u8, RX>,
}

impl<const TX: usize, const RX: usize> Default for VcpTransport<TX, RX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const TX: usize, const RX: usize> VcpTransport<TX, RX> {
    pub const fn new() -> Self {
        Self {
            tx: Queue::new(),
            rx: Queue::new(),
        }
    }

    pub fn split<'q>(
        &'q mut self,
        flags: &'q SessionFlags,
    ) -> (VcpPort<'q, TX, RX>, VcpEndpoints<'q, TX, RX>) {
        let (tx_producer, tx_consumer) = self.tx.split();
        let (rx_producer, rx_consumer) = self.rx.split();
        (
            VcpPort {
                flags,
                tx: tx_producer,
                rx: rx_consumer,
            },
            VcpEndpoints {
                flags,
                tx: tx_consumer,
                rx: rx_producer,
                receive_hook: None,
            },
        )
    }
}

/// Application side of the port
pub struct VcpPort<'q, const TX: usize, const RX: usize> {
    flags: &'q SessionFlags,
    tx: Producer<'q, u8, TX>,
    rx: Consumer<'q, u8, RX>,
}

impl<'q, const TX: usize, const RX: usize> VcpPort<'q, TX, RX> {
    /// Free space in the send ring
    pub fn can_send(&self) -> Result<usize, VcpError> {
        if !self.flags.vcp_connected() {
            return Err(VcpError::NotConnected);
        }
        Ok(self.tx.capacity() - self.tx.len())
    }

    /// Queue as much of `data` as fits, returning the number of bytes queued
    pub fn send(&mut self, data: &[u8]) -> Result<usize, VcpError> {
        if !self.flags.vcp_connected() {
            return Err(VcpError::NotConnected);
        }
        let mut queued = 0;
        for &byte in data {
            if self.tx.enqueue(byte).is_err() {
                break;
            }
            queued += 1;
        }
        Ok(queued)
    }

    /// Bytes waiting in the receive ring
    pub fn can_recv(&self) -> usize {
        self.rx.len()
    }

    /// Move received bytes into `buf`, returning how many were copied
    pub fn recv(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        for slot in buf.iter_mut() {
            match self.rx.dequeue() {
                Some(byte) => *slot = byte,
                None => break,
            }
            copied += 1;
        }
        copied
    }
}

/// Endpoint side of the port, driven from endpoint interrupts
pub struct VcpEndpoints<'q, const TX: usize, const RX: usize> {
    flags: &'q SessionFlags,
    tx: Consumer<'q, u8, TX>,
    rx: Producer<'q, u8, RX>,
    receive_hook: Option<ReceiveHook>,
}

impl<'q, const TX: usize, const RX: usize> VcpEndpoints<'q, TX, RX> {
    pub fn set_receive_hook(&mut self, hook: Option<ReceiveHook>) {
        self.receive_hook = hook;
    }

    /// Bulk-IN: push at most one max packet of queued data per IN token
    pub fn on_bulk_in<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        events: EndpointEvents,
    ) -> Result<(), TransferError> {
        if !events.contains(EndpointEvents::IN_TOKEN) {
            return Ok(());
        }
        let max_packet_size = hal.max_packet_size(EndpointId::VcpIn);
        let len = self.tx.len().min(max_packet_size);
        if len == 0 {
            hal.packet_end(EndpointId::VcpIn);
            return Ok(());
        }
        if len + hal.data_count(EndpointId::VcpIn) > max_packet_size {
            warn!("vcp: IN endpoint buffer full");
            return Ok(());
        }

        let mut packet = [0u8; HIGH_SPEED_MAX_PACKET_SIZE];
        let len = len.min(packet.len());
        for slot in packet[..len].iter_mut() {
            // len never exceeds what the consumer reported as queued
            *slot = self.tx.dequeue().unwrap_or_default();
        }
        dma_in(hal, self.flags, EndpointId::VcpIn, &packet[..len])?;
        Ok(())
    }

    /// Bulk-OUT: pull the FIFO into the receive ring
    pub fn on_bulk_out<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        events: EndpointEvents,
    ) -> Result<(), TransferError> {
        if !events.intersects(EndpointEvents::DATA_RXED | EndpointEvents::SHORT_PACKET) {
            return Ok(());
        }
        let mut packet = [0u8; HIGH_SPEED_MAX_PACKET_SIZE];
        let len = hal.data_count(EndpointId::VcpOut).min(packet.len());
        dma_out(hal, self.flags, EndpointId::VcpOut, &mut packet[..len])?;

        let free = self.rx.capacity() - self.rx.len();
        if len > free {
            warn!("vcp: receive ring overflow, dropping {} bytes", len);
            return Ok(());
        }
        if let Some(hook) = self.receive_hook {
            if !hook(&packet[..len]) {
                return Ok(());
            }
        }
        for &byte in &packet[..len] {
            // space was checked above
            let _ = self.rx.enqueue(byte);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeController;

    fn connected_flags() -> SessionFlags {
        let flags = SessionFlags::new();
        flags.set_connected(true);
        flags
    }

    #[test]
    fn test_send_requires_line_coding() {
        let flags = connected_flags();
        let mut transport = VcpTransport::<16, 16>::new();
        let (mut port, _endpoints) = transport.split(&flags);

        assert_eq!(port.can_send(), Err(VcpError::NotConnected));
        assert_eq!(port.send(b"abc"), Err(VcpError::NotConnected));

        flags.set_vcp_connected(true);
        assert_eq!(port.can_send(), Ok(15));
        assert_eq!(port.send(b"abc"), Ok(3));
        assert_eq!(port.can_send(), Ok(12));
    }

    #[test]
    fn test_send_stops_when_ring_full() {
        let flags = connected_flags();
        flags.set_vcp_connected(true);
        let mut transport = VcpTransport::<8, 8>::new();
        let (mut port, _endpoints) = transport.split(&flags);

        assert_eq!(port.send(b"0123456789"), Ok(7));
        assert_eq!(port.can_send(), Ok(0));
    }

    #[test]
    fn test_bulk_in_sends_one_packet_per_token() {
        let flags = connected_flags();
        flags.set_vcp_connected(true);
        let mut hal = FakeController::new(64);
        let mut transport = VcpTransport::<256, 16>::new();
        let (mut port, mut endpoints) = transport.split(&flags);
        let data: Vec<u8> = (0..100u8).collect();
        port.send(&data).unwrap();

        endpoints.on_bulk_in(&mut hal, EndpointEvents::IN_TOKEN).unwrap();
        assert_eq!(hal.vcp_in, data[..64].to_vec());
        assert_eq!(hal.packet_ends(EndpointId::VcpIn), 0);

        endpoints.on_bulk_in(&mut hal, EndpointEvents::IN_TOKEN).unwrap();
        assert_eq!(hal.vcp_in, data);
        assert_eq!(hal.packet_ends(EndpointId::VcpIn), 1);

        // nothing left: zero-length packet
        endpoints.on_bulk_in(&mut hal, EndpointEvents::IN_TOKEN).unwrap();
        assert_eq!(hal.vcp_in.len(), 100);
        assert_eq!(hal.packet_ends(EndpointId::VcpIn), 2);
    }

    #[test]
    fn test_bulk_in_waits_for_fifo_space() {
        let flags = connected_flags();
        flags.set_vcp_connected(true);
        let mut hal = FakeController::new(64);
        hal.vcp_in_fifo = 32;
        let mut transport = VcpTransport::<256, 16>::new();
        let (mut port, mut endpoints) = transport.split(&flags);
        port.send(&[0xaa; 40]).unwrap();

        endpoints.on_bulk_in(&mut hal, EndpointEvents::IN_TOKEN).unwrap();

        assert!(hal.vcp_in.is_empty());
        assert_eq!(port.can_send(), Ok(255 - 40));
    }

    #[test]
    fn test_bulk_out_buffers_and_drops_on_overflow() {
        let flags = connected_flags();
        let mut hal = FakeController::new(64);
        let mut transport = VcpTransport::<16, 8>::new();
        let (mut port, mut endpoints) = transport.split(&flags);

        hal.host_send_vcp(b"hello");
        endpoints.on_bulk_out(&mut hal, EndpointEvents::DATA_RXED).unwrap();
        assert_eq!(port.can_recv(), 5);

        // 7 slots, 5 used: a 5-byte packet does not fit and is dropped
        hal.host_send_vcp(b"world");
        endpoints.on_bulk_out(&mut hal, EndpointEvents::SHORT_PACKET).unwrap();
        assert_eq!(port.can_recv(), 5);

        let mut buf = [0u8; 16];
        assert_eq!(port.recv(&mut buf), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(port.can_recv(), 0);
    }

    #[test]
    fn test_receive_hook_can_consume_packet() {
        fn swallow_break(data: &[u8]) -> bool {
            data != [0x03]
        }

        let flags = connected_flags();
        let mut hal = FakeController::new(64);
        let mut transport = VcpTransport::<16, 16>::new();
        let (port, mut endpoints) = transport.split(&flags);
        endpoints.set_receive_hook(Some(swallow_break));

        hal.host_send_vcp(&[0x03]);
        endpoints.on_bulk_out(&mut hal, EndpointEvents::DATA_RXED).unwrap();
        assert_eq!(port.can_recv(), 0);

        hal.host_send_vcp(b"ok");
        endpoints.on_bulk_out(&mut hal, EndpointEvents::DATA_RXED).unwrap();
        assert_eq!(port.can_recv(), 2);
    }

    #[test]
    fn test_line_coding_wire_format() {
        let coding = LineCoding::default();
        assert_eq!(coding.to_data(), [0x00, 0xc2, 0x01, 0x00, 0, 0, 8]);
        assert_eq!(LineCoding::from_data(&coding.to_data()), Some(coding));
        assert_eq!(LineCoding::from_data(&[0; 6]), None);
    }
}

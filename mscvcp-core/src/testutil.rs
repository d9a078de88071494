//! In-memory device controller for unit tests.

use std::collections::VecDeque;
use std::vec::Vec;

use crate::config::CSW_SIZE;
use crate::msc::wrapper::{CbwFlags, CommandBlockWrapper, CommandStatusWrapper};
use crate::usb::{EndpointEvents, EndpointId, UsbDeviceController};

/// Controller whose FIFOs are plain queues.
///
/// OUT data is queued by the test as host packets; IN data lands in `msc_in`
/// and `vcp_in`. DMA completes instantly unless `dma_stuck` is set.
#[derive(Debug, Default)]
pub struct FakeController {
    pub max_packet_size: usize,
    pub msc_out: VecDeque<Vec<u8>>,
    pub vcp_out: VecDeque<Vec<u8>>,
    pub msc_in: Vec<u8>,
    pub vcp_in: Vec<u8>,
    /// Bytes reported as already waiting in the VCP IN FIFO
    pub vcp_in_fifo: usize,
    pub dma_in_lengths: Vec<usize>,
    pub dma_out_lengths: Vec<usize>,
    pub packet_end_calls: Vec<EndpointId>,
    pub halted: Vec<EndpointId>,
    pub flushed: Vec<EndpointId>,
    pub configured: Vec<(EndpointId, usize, EndpointEvents)>,
    pub dma_stuck: bool,
    pub dma_aborts: usize,
}

impl FakeController {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            max_packet_size,
            ..Self::default()
        }
    }

    fn queue(&mut self, ep: EndpointId) -> &mut VecDeque<Vec<u8>> {
        match ep {
            EndpointId::VcpOut => &mut self.vcp_out,
            _ => &mut self.msc_out,
        }
    }

    fn enqueue_packets(&mut self, ep: EndpointId, data: &[u8]) {
        let max_packet_size = self.max_packet_size;
        for packet in data.chunks(max_packet_size) {
            self.queue(ep).push_back(packet.to_vec());
        }
    }

    /// Host sends `data` on the MSC bulk-OUT endpoint
    pub fn host_send(&mut self, data: &[u8]) {
        self.enqueue_packets(EndpointId::MscOut, data);
    }

    /// Host sends `data` on the VCP bulk-OUT endpoint
    pub fn host_send_vcp(&mut self, data: &[u8]) {
        self.enqueue_packets(EndpointId::VcpOut, data);
    }

    pub fn packet_ends(&self, ep: EndpointId) -> usize {
        self.packet_end_calls.iter().filter(|&&e| e == ep).count()
    }

    /// Host clears the halt with CLEAR_FEATURE(ENDPOINT_HALT)
    pub fn clear_halt(&mut self, ep: EndpointId) {
        self.halted.retain(|&e| e != ep);
    }

    pub fn take_msc_in(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.msc_in)
    }
}

impl UsbDeviceController for FakeController {
    fn max_packet_size(&self, _ep: EndpointId) -> usize {
        self.max_packet_size
    }

    fn configure_endpoint(&mut self, ep: EndpointId, max_packet_size: usize, events: EndpointEvents) {
        self.configured.push((ep, max_packet_size, events));
    }

    fn data_count(&self, ep: EndpointId) -> usize {
        match ep {
            EndpointId::MscOut => self.msc_out.front().map_or(0, Vec::len),
            EndpointId::VcpOut => self.vcp_out.front().map_or(0, Vec::len),
            EndpointId::VcpIn => self.vcp_in_fifo,
            EndpointId::MscIn => 0,
        }
    }

    fn in_token_pending(&self, _ep: EndpointId) -> bool {
        true
    }

    fn dma_start_in(&mut self, ep: EndpointId, src: &[u8]) {
        self.dma_in_lengths.push(src.len());
        match ep {
            EndpointId::VcpIn => self.vcp_in.extend_from_slice(src),
            _ => self.msc_in.extend_from_slice(src),
        }
    }

    fn dma_start_out(&mut self, ep: EndpointId, dst: &mut [u8]) {
        self.dma_out_lengths.push(dst.len());
        let mut filled = 0;
        while filled < dst.len() {
            let queue = self.queue(ep);
            let mut packet = queue.pop_front().expect("host sent less data than the device read");
            let n = packet.len().min(dst.len() - filled);
            dst[filled..filled + n].copy_from_slice(&packet[..n]);
            filled += n;
            if n < packet.len() {
                packet.drain(..n);
                queue.push_front(packet);
            }
        }
    }

    fn dma_busy(&self) -> bool {
        self.dma_stuck
    }

    fn dma_abort(&mut self) {
        self.dma_aborts += 1;
    }

    fn packet_end(&mut self, ep: EndpointId) {
        self.packet_end_calls.push(ep);
    }

    fn halt(&mut self, ep: EndpointId) {
        if !self.halted.contains(&ep) {
            self.halted.push(ep);
        }
    }

    fn is_halted(&self, ep: EndpointId) -> bool {
        self.halted.contains(&ep)
    }

    fn flush_and_toggle(&mut self, ep: EndpointId) {
        if !ep.is_in() {
            self.queue(ep).clear();
        }
        self.flushed.push(ep);
    }
}

/// Encode a CBW with a valid signature
pub fn cbw(tag: u32, data_transfer_length: u32, flags: CbwFlags, lun: u8, command: &[u8]) -> [u8; 31] {
    let mut wrapper = CommandBlockWrapper::new();
    wrapper.tag = tag;
    wrapper.data_transfer_length = data_transfer_length;
    wrapper.flags = flags;
    wrapper.lun = lun;
    wrapper.command_length = command.len() as u8;
    wrapper.command[..command.len()].copy_from_slice(command);
    wrapper.to_data()
}

/// Decode the CSW at the end of the bytes sent on bulk-IN
pub fn last_csw(bytes: &[u8]) -> CommandStatusWrapper {
    assert!(bytes.len() >= CSW_SIZE, "no CSW in {} bytes", bytes.len());
    let csw = CommandStatusWrapper::from_data(&bytes[bytes.len() - CSW_SIZE..]).expect("CSW status byte");
    assert_eq!(&bytes[bytes.len() - CSW_SIZE..bytes.len() - 9], b"USBS");
    csw
}

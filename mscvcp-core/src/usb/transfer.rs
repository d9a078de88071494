//! DMA transfers between memory and endpoint FIFOs.
//!
//! Every wait spins on a hardware condition and gives up as soon as the
//! session's connected flag drops. A transfer that returns
//! [`TransferError::Disconnected`] moved an unknown number of bytes.

#[cfg(feature = "defmt")]
use defmt::Format;

use super::{EndpointId, SessionFlags, UsbDeviceController};

/// Transfer primitive failures
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum TransferError {
    /// Bus disconnected or reset while waiting on the hardware
    Disconnected,
}

/// Spin while `busy` holds, bailing out if the session disconnects
pub fn spin_while(flags: &SessionFlags, mut busy: impl FnMut() -> bool) -> Result<(), TransferError> {
    loop {
        if !flags.is_connected() {
            return Err(TransferError::Disconnected);
        }
        if !busy() {
            return Ok(());
        }
        core::hint::spin_loop();
    }
}

/// One DMA burst from `src` into the FIFO of IN endpoint `ep`.
///
/// Terminates the packet when `src` is not a whole number of max packets.
pub fn dma_in<H: UsbDeviceController>(
    hal: &mut H,
    flags: &SessionFlags,
    ep: EndpointId,
    src: &[u8],
) -> Result<usize, TransferError> {
    if src.is_empty() {
        return Ok(0);
    }
    hal.dma_start_in(ep, src);
    if let Err(e) = spin_while(flags, || hal.dma_busy()) {
        hal.dma_abort();
        return Err(e);
    }
    if src.len() % hal.max_packet_size(ep) != 0 {
        hal.packet_end(ep);
    }
    Ok(src.len())
}

/// One DMA burst from the FIFO of OUT endpoint `ep` into `dst`
pub fn dma_out<H: UsbDeviceController>(
    hal: &mut H,
    flags: &SessionFlags,
    ep: EndpointId,
    dst: &mut [u8],
) -> Result<usize, TransferError> {
    if dst.is_empty() {
        return Ok(0);
    }
    hal.dma_start_out(ep, dst);
    if let Err(e) = spin_while(flags, || hal.dma_busy()) {
        hal.dma_abort();
        return Err(e);
    }
    Ok(dst.len())
}

/// Send `src` on IN endpoint `ep`.
///
/// Each burst of at most `burst_limit` bytes goes out as its whole max packets
/// followed by the short remainder, each part waiting for an IN token first.
/// Returns once the FIFO has drained.
pub fn sdram_to_usb<H: UsbDeviceController>(
    hal: &mut H,
    flags: &SessionFlags,
    ep: EndpointId,
    burst_limit: usize,
    src: &[u8],
) -> Result<usize, TransferError> {
    let max_packet_size = hal.max_packet_size(ep);
    let mut sent = 0;
    for burst in src.chunks(burst_limit.max(max_packet_size)) {
        let whole = burst.len() - burst.len() % max_packet_size;
        let (packets, remainder) = burst.split_at(whole);
        for part in [packets, remainder] {
            if part.is_empty() {
                continue;
            }
            spin_while(flags, || !hal.in_token_pending(ep))?;
            sent += dma_in(hal, flags, ep, part)?;
        }
    }
    spin_while(flags, || hal.data_count(ep) != 0)?;
    Ok(sent)
}

/// Fill `dst` from OUT endpoint `ep` in bursts of at most `burst_limit` bytes
pub fn usb_to_sdram<H: UsbDeviceController>(
    hal: &mut H,
    flags: &SessionFlags,
    ep: EndpointId,
    burst_limit: usize,
    dst: &mut [u8],
) -> Result<usize, TransferError> {
    let mut received = 0;
    for burst in dst.chunks_mut(burst_limit.max(1)) {
        received += dma_out(hal, flags, ep, burst)?;
    }
    Ok(received)
}

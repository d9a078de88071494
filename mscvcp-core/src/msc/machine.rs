use heapless::Vec;

#[cfg(feature = "defmt")]
use defmt::Format;

use super::scsi::{AdditionalSenseCodeType, ScsiCommand, Sense, SenseKey};
use super::session::{BotState, Session};
use super::wrapper::{CommandBlockWrapper, CommandStatusWrapper};
use crate::config::{ConfigError, MscConfig, COMMAND_BUFFER_SIZE, MAX_LUN};
use crate::storage::StorageInterface;
use crate::usb::transfer::{sdram_to_usb, usb_to_sdram, TransferError};
use crate::usb::{EndpointId, SessionFlags, UsbDeviceController};

/// Errors that abandon the current command
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum BotError {
    Transfer(TransferError),
}

impl From<TransferError> for BotError {
    fn from(e: TransferError) -> Self {
        BotError::Transfer(e)
    }
}

/// How a command handler left the transport
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum Outcome {
    /// Send the CSW now
    Complete,
    /// Halt the endpoint; the CSW waits for the host to clear it
    Stall(EndpointId),
}

/// Bulk-Only Transport command processor.
///
/// Owns the command and data buffers of the session. Call [`BotMachine::process`]
/// from the polling task; interrupt hooks communicate through [`SessionFlags`].
pub struct BotMachine<'a, S: StorageInterface, const DATA_BUFFER_SIZE: usize> {
    pub(super) config: MscConfig,
    pub(super) flags: &'a SessionFlags,
    pub(super) luns: Vec<&'a S, MAX_LUN>,
    pub(super) session: Session,
    pub(super) state: BotState,
    pub(super) cbw: CommandBlockWrapper,
    pub(super) cmd_buf: [u8; COMMAND_BUFFER_SIZE],
    pub(super) data_buf: [u8; DATA_BUFFER_SIZE],
}

impl<'a, S: StorageInterface, const DATA_BUFFER_SIZE: usize> BotMachine<'a, S, DATA_BUFFER_SIZE> {
    pub fn new(config: MscConfig, flags: &'a SessionFlags, luns: &[&'a S]) -> Result<Self, ConfigError> {
        config.validate(DATA_BUFFER_SIZE)?;
        let luns = Vec::from_slice(luns).map_err(|_| ConfigError::TooManyLuns(luns.len()))?;
        Ok(Self {
            config,
            flags,
            luns,
            session: Session::default(),
            state: BotState::AwaitCbw,
            cbw: CommandBlockWrapper::new(),
            cmd_buf: [0; COMMAND_BUFFER_SIZE],
            data_buf: [0; DATA_BUFFER_SIZE],
        })
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn lun_count(&self) -> u8 {
        self.luns.len() as u8
    }

    /// Return to `AwaitCbw` with default session state
    pub fn reset(&mut self) {
        self.state = BotState::AwaitCbw;
        self.session = Session::default();
    }

    /// Advance the state machine by at most one command.
    ///
    /// Returns an error only when a transfer was cancelled by a disconnect; the
    /// command is dropped and the machine waits for the next CBW.
    pub async fn process<H: UsbDeviceController>(&mut self, hal: &mut H) -> Result<(), BotError> {
        if self.flags.take_reset_request() {
            info!("bot: reset");
            self.reset();
        }
        if !self.flags.is_connected() {
            return Ok(());
        }

        match self.state {
            BotState::AwaitCbw => {
                if !self.flags.cbw_pending() || !self.receive_cbw(hal)? {
                    return Ok(());
                }
            }
            BotState::CswPending => {
                if let Some(ep) = self.session.stalled {
                    if hal.is_halted(ep) {
                        return Ok(());
                    }
                }
                return self.send_csw(hal);
            }
            BotState::CbwReceived => {}
        }

        let result = self.dispatch(hal).await;
        if let Err(e) = result {
            warn!("bot: command {:#x} abandoned: {:?}", self.cbw.opcode(), e);
            self.state = BotState::AwaitCbw;
            self.session.finish_command();
        }
        result
    }

    /// Read and validate a CBW. Returns whether a command is ready to dispatch
    fn receive_cbw<H: UsbDeviceController>(&mut self, hal: &mut H) -> Result<bool, BotError> {
        let count = hal.data_count(EndpointId::MscOut).min(COMMAND_BUFFER_SIZE);
        if count == 0 {
            self.flags.clear_cbw_pending();
            return Ok(false);
        }
        usb_to_sdram(
            hal,
            self.flags,
            EndpointId::MscOut,
            self.config.dma_burst_limit,
            &mut self.cmd_buf[..count],
        )?;
        self.flags.clear_cbw_pending();

        match CommandBlockWrapper::decode(&self.cmd_buf[..count]) {
            Ok(cbw) => {
                trace!("bot: CBW tag={:#x} op={:#x} len={}", cbw.tag, cbw.opcode(), cbw.data_transfer_length);
                self.cbw = cbw;
                self.session.begin_command();
                self.state = BotState::CbwReceived;
                Ok(true)
            }
            Err(e) => {
                warn!("bot: invalid CBW: {:?}", e);
                hal.halt(EndpointId::MscIn);
                hal.halt(EndpointId::MscOut);
                self.session.prevent = true;
                self.session.report_residue = true;
                Ok(false)
            }
        }
    }

    async fn dispatch<H: UsbDeviceController>(&mut self, hal: &mut H) -> Result<(), BotError> {
        let storage = self.luns.get(self.cbw.lun as usize).copied();
        let outcome = match (ScsiCommand::try_from(self.cbw.opcode()), storage) {
            (Ok(ScsiCommand::RequestSense), _) => self.request_sense(hal)?,
            (Ok(ScsiCommand::Inquiry), _) => self.inquiry(hal)?,
            (_, None) => {
                debug!("bot: LUN {} not present", self.cbw.lun);
                self.reject(Sense::new(
                    SenseKey::IllegalRequest,
                    AdditionalSenseCodeType::LogicalUnitNotSupported,
                ))
            }
            (Ok(ScsiCommand::TestUnitReady), Some(storage)) => self.test_unit_ready(storage).await,
            (Ok(ScsiCommand::ModeSense6), Some(_)) => self.mode_sense6(hal)?,
            (Ok(ScsiCommand::ModeSense10), Some(storage)) => self.mode_sense10(hal, storage).await?,
            (Ok(ScsiCommand::StartStopUnit), Some(_)) => self.start_stop_unit(),
            (Ok(ScsiCommand::PreventAllowMediumRemoval), Some(_)) => self.prevent_allow_medium_removal(),
            (Ok(ScsiCommand::ReadFormatCapacities), Some(storage)) => {
                self.read_format_capacities(hal, storage).await?
            }
            (Ok(ScsiCommand::ReadCapacity10), Some(storage)) => self.read_capacity10(hal, storage).await?,
            (Ok(ScsiCommand::Read10), Some(storage)) => {
                let blocks = self.cbw.transfer_length10();
                self.read(hal, storage, blocks).await?
            }
            (Ok(ScsiCommand::Read12), Some(storage)) => {
                let blocks = self.cbw.transfer_length12();
                self.read(hal, storage, blocks).await?
            }
            (Ok(ScsiCommand::Write10), Some(storage)) => {
                let blocks = self.cbw.transfer_length10();
                self.write(hal, storage, blocks).await?
            }
            (Ok(ScsiCommand::Write12), Some(storage)) => {
                let blocks = self.cbw.transfer_length12();
                self.write(hal, storage, blocks).await?
            }
            (Ok(ScsiCommand::Verify10), Some(_)) => Outcome::Complete,
            (Ok(ScsiCommand::ModeSelect10), Some(_)) => self.mode_select10(hal)?,
            (Ok(ScsiCommand::ModeSelect6), Some(_)) | (Err(_), Some(_)) => {
                debug!("bot: unsupported opcode {:#x}", self.cbw.opcode());
                self.reject(Sense::new(
                    SenseKey::IllegalRequest,
                    AdditionalSenseCodeType::InvalidFieldInCdb,
                ))
            }
        };
        self.finish(hal, outcome)
    }

    fn finish<H: UsbDeviceController>(&mut self, hal: &mut H, outcome: Outcome) -> Result<(), BotError> {
        match outcome {
            Outcome::Complete => self.send_csw(hal),
            Outcome::Stall(ep) => {
                debug!("bot: halt {:?} for op {:#x}", ep, self.cbw.opcode());
                hal.halt(ep);
                self.session.stalled = Some(ep);
                self.state = BotState::CswPending;
                Ok(())
            }
        }
    }

    fn send_csw<H: UsbDeviceController>(&mut self, hal: &mut H) -> Result<(), BotError> {
        let csw = CommandStatusWrapper::new(
            self.cbw.tag,
            self.session.residue(self.cbw.data_transfer_length),
            self.session.status(),
        );
        let len = csw.prepare_to_buf(&mut self.cmd_buf);
        self.state = BotState::AwaitCbw;
        self.session.finish_command();

        sdram_to_usb(
            hal,
            self.flags,
            EndpointId::MscIn,
            self.config.dma_burst_limit,
            &self.cmd_buf[..len],
        )?;
        if hal.data_count(EndpointId::MscOut) == 0 {
            self.flags.clear_cbw_pending();
        }
        Ok(())
    }

    /// Send `len` bytes of prepared response from the command buffer, capped by the host's length
    pub(super) fn send_response<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        len: usize,
    ) -> Result<Outcome, BotError> {
        let host_len = self.cbw.data_transfer_length as usize;
        let n = len.min(host_len);
        let sent = sdram_to_usb(
            hal,
            self.flags,
            EndpointId::MscIn,
            self.config.dma_burst_limit,
            &self.cmd_buf[..n],
        )?;
        self.session.add_used(sent);
        if sent < host_len {
            self.session.report_residue = true;
        }
        Ok(Outcome::Complete)
    }

    /// Fill `len` bytes of the command buffer from the host
    pub(super) fn receive_parameters<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        len: usize,
    ) -> Result<usize, BotError> {
        let n = len.min(COMMAND_BUFFER_SIZE);
        let received = usb_to_sdram(
            hal,
            self.flags,
            EndpointId::MscOut,
            self.config.dma_burst_limit,
            &mut self.cmd_buf[..n],
        )?;
        self.session.add_used(received);
        Ok(received)
    }

    /// Fail the command without a data stage
    pub(super) fn reject(&mut self, sense: Sense) -> Outcome {
        self.session.fail(sense);
        self.session.report_residue = true;
        Outcome::Complete
    }

    /// Fail the command, halting the data endpoint if the host still expects data
    pub(super) fn fail_data_stage(&mut self, sense: Sense, ep: EndpointId) -> Outcome {
        self.session.fail(sense);
        self.session.report_residue = true;
        if self.session.used_bytes < self.cbw.data_transfer_length {
            Outcome::Stall(ep)
        } else {
            Outcome::Complete
        }
    }
}

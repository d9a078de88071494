//! SCSI command handlers run from the CbwReceived state.

use bit_field::BitField;

use super::cases::{classify_no_data, classify_read, classify_write};
use super::machine::{BotError, BotMachine, Outcome};
use super::media::{read_media, write_media, MediaError};
use super::scsi::{
    mode_sense10, mode_sense6, read_capacity10, read_format_capacities, AdditionalSenseCodeType, InquiryData,
    RequestSenseData, Sense, SenseKey, MODE_SENSE_MAX_DATA_SIZE,
};
use crate::config::CONNECT_CHECK_PER_LUN;
use crate::storage::{StorageError, StorageInterface};
use crate::usb::transfer::{sdram_to_usb, usb_to_sdram};
use crate::usb::{EndpointId, UsbDeviceController};

/// Sense data for a failed storage access. `medium` is the code used for hardware faults
fn storage_sense(e: StorageError, medium: AdditionalSenseCodeType) -> Sense {
    match e {
        StorageError::NotReady => Sense::new(SenseKey::NotReady, AdditionalSenseCodeType::MediumNotPresent),
        StorageError::OutOfRange => Sense::new(
            SenseKey::IllegalRequest,
            AdditionalSenseCodeType::LogicalBlockAddressOutOfRange,
        ),
        StorageError::Io | StorageError::Device => Sense::new(SenseKey::MediumError, medium),
    }
}

fn media_sense(e: MediaError, medium: AdditionalSenseCodeType) -> Sense {
    match e {
        MediaError::Storage(e) => storage_sense(e, medium),
        MediaError::OutOfMemory | MediaError::InvalidGeometry => {
            Sense::new(SenseKey::IllegalRequest, AdditionalSenseCodeType::InvalidFieldInCdb)
        }
    }
}

impl<'a, S: StorageInterface, const DATA_BUFFER_SIZE: usize> BotMachine<'a, S, DATA_BUFFER_SIZE> {
    fn stage_response(&mut self, data: &[u8]) -> usize {
        self.cmd_buf[..data.len()].copy_from_slice(data);
        data.len()
    }

    pub(super) fn request_sense<H: UsbDeviceController>(&mut self, hal: &mut H) -> Result<Outcome, BotError> {
        let data = RequestSenseData {
            valid: !self.session.prevent,
            sense: self.session.sense,
        }
        .to_data();
        self.session.prevent = false;
        let len = self.stage_response(&data);
        let outcome = self.send_response(hal, len)?;
        self.session.sense = Sense::NONE;
        Ok(outcome)
    }

    pub(super) fn inquiry<H: UsbDeviceController>(&mut self, hal: &mut H) -> Result<Outcome, BotError> {
        let data = InquiryData::new(self.config.vendor_id, self.config.product_id, self.config.revision).to_data();
        let len = self.stage_response(&data);
        self.send_response(hal, len)
    }

    pub(super) async fn test_unit_ready(&mut self, storage: &S) -> Outcome {
        self.flags.tick_connect_check();

        let action = classify_no_data(self.cbw.data_transfer_length, self.cbw.data_direction());
        self.session.apply(&action);
        if let Some(ep) = action.stall {
            return Outcome::Stall(ep);
        }
        if self.flags.media_removed() || !storage.detect().await {
            self.session.fail(Sense::new(SenseKey::NotReady, AdditionalSenseCodeType::MediumNotPresent));
        }
        Outcome::Complete
    }

    pub(super) fn mode_sense6<H: UsbDeviceController>(&mut self, hal: &mut H) -> Result<Outcome, BotError> {
        let len = self.stage_response(&mode_sense6(self.config.write_protect));
        self.send_response(hal, len)
    }

    pub(super) async fn mode_sense10<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        storage: &S,
    ) -> Result<Outcome, BotError> {
        let page_code = self.cbw.command[2].get_bits(0..6);
        let blocks = match storage.get_info().await {
            Ok(info) => info.logical_blocks(self.config.logical_block_size),
            Err(e) => {
                let sense = storage_sense(e, AdditionalSenseCodeType::UnrecoveredReadError);
                return Ok(self.fail_data_stage(sense, EndpointId::MscIn));
            }
        };

        let mut data = [0u8; MODE_SENSE_MAX_DATA_SIZE];
        match mode_sense10(page_code, blocks, self.config.write_protect, &mut data) {
            Some(len) => {
                let len = self.stage_response(&data[..len]);
                self.send_response(hal, len)
            }
            None => {
                debug!("scsi: mode page {:#x} not supported", page_code);
                Ok(self.reject(Sense::new(
                    SenseKey::IllegalRequest,
                    AdditionalSenseCodeType::InvalidFieldInCdb,
                )))
            }
        }
    }

    pub(super) fn start_stop_unit(&mut self) -> Outcome {
        // LoEj=1, Start=0
        if self.cbw.command[4].get_bits(0..2) == 0b10 {
            info!("scsi: medium ejected");
            self.flags.set_media_removed(true);
        }
        Outcome::Complete
    }

    pub(super) fn prevent_allow_medium_removal(&mut self) -> Outcome {
        if self.cbw.command[4].get_bit(0) {
            self.session.fail(Sense::new(
                SenseKey::IllegalRequest,
                AdditionalSenseCodeType::InvalidFieldInCdb,
            ));
        } else {
            self.session.prevent = false;
        }
        Outcome::Complete
    }

    pub(super) async fn read_format_capacities<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        storage: &S,
    ) -> Result<Outcome, BotError> {
        let block_length = self.config.logical_block_size;
        match storage.get_info().await {
            Ok(info) => {
                let len = self.stage_response(&read_format_capacities(info.logical_blocks(block_length), block_length));
                self.send_response(hal, len)
            }
            Err(e) => {
                let sense = storage_sense(e, AdditionalSenseCodeType::UnrecoveredReadError);
                Ok(self.fail_data_stage(sense, EndpointId::MscIn))
            }
        }
    }

    pub(super) async fn read_capacity10<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        storage: &S,
    ) -> Result<Outcome, BotError> {
        let block_length = self.config.logical_block_size;
        match storage.get_info().await {
            Ok(info) => {
                let len = self.stage_response(&read_capacity10(info.logical_blocks(block_length), block_length));
                self.send_response(hal, len)
            }
            Err(e) => {
                let sense = storage_sense(e, AdditionalSenseCodeType::UnrecoveredReadError);
                Ok(self.fail_data_stage(sense, EndpointId::MscIn))
            }
        }
    }

    /// MODE SELECT(10): the parameter list is consumed and ignored
    pub(super) fn mode_select10<H: UsbDeviceController>(&mut self, hal: &mut H) -> Result<Outcome, BotError> {
        let host_len = self.cbw.data_transfer_length as usize;
        if host_len == 0 {
            return Ok(Outcome::Complete);
        }
        let received = self.receive_parameters(hal, host_len)?;
        if received < host_len {
            self.session.report_residue = true;
            return Ok(Outcome::Stall(EndpointId::MscOut));
        }
        Ok(Outcome::Complete)
    }

    /// READ(10) and READ(12)
    pub(super) async fn read<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        storage: &S,
        blocks: u32,
    ) -> Result<Outcome, BotError> {
        let block_length = u64::from(self.config.logical_block_size);
        let action = classify_read(
            self.cbw.data_transfer_length,
            self.cbw.data_direction(),
            u64::from(blocks) * block_length,
        );
        self.session.apply(&action);
        self.flags
            .seed_connect_check(self.luns.len() as i32 * CONNECT_CHECK_PER_LUN);
        if let Some(ep) = action.stall {
            return Ok(Outcome::Stall(ep));
        }

        let total = action.transfer as usize;
        let mut addr = u64::from(self.cbw.logical_block_address()) * block_length;
        let mut done = 0;
        while done < total {
            let n = (total - done).min(DATA_BUFFER_SIZE);
            if let Err(e) = read_media(storage, addr, &mut self.data_buf[..n]).await {
                warn!("scsi: read at {} failed: {:?}", addr, e);
                let sense = media_sense(e, AdditionalSenseCodeType::UnrecoveredReadError);
                return Ok(self.fail_data_stage(sense, EndpointId::MscIn));
            }
            let sent = sdram_to_usb(
                hal,
                self.flags,
                EndpointId::MscIn,
                self.config.dma_burst_limit,
                &self.data_buf[..n],
            )?;
            self.session.add_used(sent);
            addr += n as u64;
            done += n;
        }
        Ok(Outcome::Complete)
    }

    /// WRITE(10) and WRITE(12)
    pub(super) async fn write<H: UsbDeviceController>(
        &mut self,
        hal: &mut H,
        storage: &S,
        blocks: u32,
    ) -> Result<Outcome, BotError> {
        let block_length = self.config.logical_block_size;
        let action = classify_write(
            self.cbw.data_transfer_length,
            self.cbw.data_direction(),
            u64::from(blocks) * u64::from(block_length),
        );
        self.session.apply(&action);
        if let Some(ep) = action.stall {
            return Ok(Outcome::Stall(ep));
        }
        if self.config.write_protect && action.transfer > 0 {
            debug!("scsi: write refused, medium is write protected");
            self.session
                .fail(Sense::new(SenseKey::DataProtect, AdditionalSenseCodeType::WriteProtected));
            self.session.report_residue = true;
            return Ok(Outcome::Stall(EndpointId::MscOut));
        }

        let total = (action.transfer - action.transfer % block_length) as usize;
        let mut addr = u64::from(self.cbw.logical_block_address()) * u64::from(block_length);
        let mut done = 0;
        while done < total {
            let n = (total - done).min(DATA_BUFFER_SIZE);
            let received = usb_to_sdram(
                hal,
                self.flags,
                EndpointId::MscOut,
                self.config.dma_burst_limit,
                &mut self.data_buf[..n],
            )?;
            self.session.add_used(received);
            if let Err(e) = write_media(storage, addr, &self.data_buf[..n]).await {
                warn!("scsi: write at {} failed: {:?}", addr, e);
                let sense = media_sense(e, AdditionalSenseCodeType::WriteError);
                return Ok(self.fail_data_stage(sense, EndpointId::MscOut));
            }
            addr += n as u64;
            done += n;
        }

        // Host data past the written blocks is drained and dropped, not counted as used
        let mut excess = (self.cbw.data_transfer_length as usize).saturating_sub(done);
        if excess > 0 {
            debug!("scsi: dropping {} bytes past the write", excess);
        }
        while excess > 0 {
            let n = excess.min(DATA_BUFFER_SIZE);
            usb_to_sdram(
                hal,
                self.flags,
                EndpointId::MscOut,
                self.config.dma_burst_limit,
                &mut self.data_buf[..n],
            )?;
            excess -= n;
        }
        Ok(Outcome::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StorageError::NotReady, SenseKey::NotReady, 0x3a)]
    #[case(StorageError::OutOfRange, SenseKey::IllegalRequest, 0x21)]
    #[case(StorageError::Io, SenseKey::MediumError, 0x0c)]
    #[case(StorageError::Device, SenseKey::MediumError, 0x0c)]
    fn test_storage_sense_for_write(#[case] error: StorageError, #[case] key: SenseKey, #[case] asc: u8) {
        let sense = media_sense(MediaError::Storage(error), AdditionalSenseCodeType::WriteError);
        assert_eq!(sense.key, key);
        assert_eq!(sense.code.asc, asc);
    }

    #[rstest]
    #[case(MediaError::OutOfMemory)]
    #[case(MediaError::InvalidGeometry)]
    fn test_media_faults_are_illegal_requests(#[case] error: MediaError) {
        assert_eq!(
            media_sense(error, AdditionalSenseCodeType::UnrecoveredReadError),
            Sense::new(SenseKey::IllegalRequest, AdditionalSenseCodeType::InvalidFieldInCdb)
        );
    }
}

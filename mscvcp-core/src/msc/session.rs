#[cfg(feature = "defmt")]
use defmt::Format;

use super::cases::CaseAction;
use super::scsi::Sense;
use super::wrapper::CommandBlockStatus;
use crate::usb::EndpointId;

/// State machine position
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum BotState {
    /// Idle, waiting for the host to send a CBW
    #[default]
    AwaitCbw,
    /// Valid CBW decoded, command being dispatched
    CbwReceived,
    /// Command ended in an endpoint halt; CSW goes out once the host clears it
    CswPending,
}

/// Session state carried across commands
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Session {
    /// Sense data reported by the next REQUEST SENSE
    pub sense: Sense,
    /// Command failure flag; becomes the CSW status
    pub prevent: bool,
    /// Bytes moved in the current data stage
    pub used_bytes: u32,
    /// Current CSW reports H minus `used_bytes`
    pub report_residue: bool,
    /// Endpoint halted by the current command
    pub stalled: Option<EndpointId>,
}

impl Session {
    pub(crate) fn begin_command(&mut self) {
        self.used_bytes = 0;
        self.report_residue = false;
        self.stalled = None;
    }

    pub(crate) fn finish_command(&mut self) {
        self.begin_command();
    }

    /// Record sense data and fail the command
    pub(crate) fn fail(&mut self, sense: Sense) {
        self.sense = sense;
        self.prevent = true;
    }

    pub(crate) fn apply(&mut self, action: &CaseAction) {
        self.prevent |= action.fail;
        self.report_residue |= action.report_residue;
    }

    pub(crate) fn add_used(&mut self, bytes: usize) {
        self.used_bytes = self.used_bytes.saturating_add(bytes as u32);
    }

    pub fn residue(&self, host_len: u32) -> u32 {
        if self.report_residue {
            host_len.saturating_sub(self.used_bytes)
        } else {
            0
        }
    }

    pub fn status(&self) -> CommandBlockStatus {
        if self.prevent {
            CommandBlockStatus::CommandFailed
        } else {
            CommandBlockStatus::CommandPassed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msc::scsi::{AdditionalSenseCodeType, SenseKey};

    #[test]
    fn test_residue_only_when_reported() {
        let mut session = Session::default();
        session.add_used(4096);
        assert_eq!(session.residue(8192), 0);

        session.report_residue = true;
        assert_eq!(session.residue(8192), 4096);
        assert_eq!(session.residue(1024), 0);
    }

    #[test]
    fn test_fail_sets_status_and_survives_finish() {
        let mut session = Session::default();
        let sense = Sense::new(SenseKey::NotReady, AdditionalSenseCodeType::MediumNotPresent);
        session.fail(sense);
        session.report_residue = true;
        session.finish_command();

        assert_eq!(session.status(), CommandBlockStatus::CommandFailed);
        assert_eq!(session.sense, sense);
        assert!(!session.report_residue);
    }
}

use crate::kiss::{KissCommand, KissFrame};
use core::time::Duration;
use log::debug;

/// Granularity of KISS command arguments: TxDelay, slot time and TX tail all
/// arrive in units of 10 ms.
pub const TIMING_UNIT: Duration = Duration::from_millis(10);

/// Radio timing parameters the host can adjust over the serial link.
///
/// One value of this travels with the scheduler and is replaced wholesale by
/// `apply_command`; nothing else mutates it. The persistence and slot time
/// are accepted and stored but the scheduler does not run CSMA, so only the
/// keyup delay has any effect on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioTimingConfig {
    /// Wait between keying the transmitter and the first byte hitting the
    /// FIFO, giving the peer's antenna switch time to settle.
    pub keyup_delay: Duration,
    /// CSMA persistence parameter, stored only.
    pub persistence: u8,
    /// CSMA slot time, stored only.
    pub slot_time: Duration,
    /// Keep-transmitting tail after the last frame, long obsolete.
    pub tx_tail: Duration,
}

impl RadioTimingConfig {
    pub fn new(keyup_delay: Duration) -> Self {
        Self {
            keyup_delay,
            persistence: 63,
            slot_time: Duration::from_millis(100),
            tx_tail: Duration::ZERO,
        }
    }

    /// Fold a KISS frame into the configuration.
    ///
    /// Returns the (possibly updated) configuration and what the scheduler
    /// should do with the frame. Anything other than `CommandAction::Data`
    /// means the frame has been consumed and must not reach the radio.
    pub fn apply_command(&self, frame: &KissFrame) -> (Self, CommandAction) {
        let command = match frame.command() {
            Ok(command) => command,
            Err(_) => {
                debug!("ignoring KISS frame with unsupported command");
                return (*self, CommandAction::Ignored);
            }
        };
        if command == KissCommand::DataFrame {
            return (*self, CommandAction::Data);
        }
        if command == KissCommand::HardwareReset {
            return (*self, CommandAction::ResetRadio);
        }
        let Some(arg) = frame.command_arg() else {
            debug!("ignoring KISS command with missing argument");
            return (*self, CommandAction::Ignored);
        };
        let mut updated = *self;
        match command {
            KissCommand::TxDelay => updated.keyup_delay = TIMING_UNIT * arg as u32,
            KissCommand::Persistence => updated.persistence = arg,
            KissCommand::SlotTime => updated.slot_time = TIMING_UNIT * arg as u32,
            KissCommand::TxTail => updated.tx_tail = TIMING_UNIT * arg as u32,
            KissCommand::DataFrame | KissCommand::HardwareReset => unreachable!(),
        }
        debug!("timing update: {updated:?}");
        (updated, CommandAction::TimingUpdated)
    }
}

impl Default for RadioTimingConfig {
    fn default() -> Self {
        Self::new(Duration::from_micros(4000))
    }
}

/// What the scheduler should do after showing a frame to `apply_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// A data frame: forward the payload to the radio.
    Data,
    /// A timing parameter changed; frame consumed.
    TimingUpdated,
    /// The host requested a radio reset; frame consumed.
    ResetRadio,
    /// Unknown or malformed command; frame consumed.
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kiss::KissBuffer;

    fn apply(config: &RadioTimingConfig, frame_bytes: &[u8]) -> (RadioTimingConfig, CommandAction) {
        let mut buffer = Box::new(KissBuffer::new());
        let buf = buffer.buf_remaining();
        buf[..frame_bytes.len()].copy_from_slice(frame_bytes);
        buffer.did_write(frame_bytes.len());
        let frame = buffer.next_frame().unwrap();
        config.apply_command(&frame)
    }

    #[test]
    fn tx_delay_scales_to_microseconds() {
        let config = RadioTimingConfig::default();
        let (updated, action) = apply(&config, &[0xC0, 0x01, 5, 0xC0]);
        assert_eq!(action, CommandAction::TimingUpdated);
        assert_eq!(updated.keyup_delay, Duration::from_micros(50_000));
    }

    #[test]
    fn data_frame_changes_nothing() {
        let config = RadioTimingConfig::default();
        let (updated, action) = apply(&config, &[0xC0, 0x00, 1, 2, 3, 0xC0]);
        assert_eq!(action, CommandAction::Data);
        assert_eq!(updated, config);
    }

    #[test]
    fn persistence_and_slot_time_are_stored() {
        let config = RadioTimingConfig::default();
        let (updated, _) = apply(&config, &[0xC0, 0x02, 200, 0xC0]);
        assert_eq!(updated.persistence, 200);
        let (updated, _) = apply(&updated, &[0xC0, 0x03, 3, 0xC0]);
        assert_eq!(updated.slot_time, Duration::from_millis(30));
        assert_eq!(updated.persistence, 200);
    }

    #[test]
    fn hardware_reset_is_surfaced() {
        let config = RadioTimingConfig::default();
        let (updated, action) = apply(&config, &[0xC0, 0x0F, 0xC0]);
        assert_eq!(action, CommandAction::ResetRadio);
        assert_eq!(updated, config);
    }

    #[test]
    fn unknown_command_is_ignored() {
        let config = RadioTimingConfig::default();
        let (updated, action) = apply(&config, &[0xC0, 0x06, 1, 0xC0]);
        assert_eq!(action, CommandAction::Ignored);
        assert_eq!(updated, config);
    }
}

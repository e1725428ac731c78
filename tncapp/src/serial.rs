use crate::error::TncError;
use serialport::SerialPort;
use std::time::Duration;

/// Serial read timeout. The bridge loop blocks on reads for at most this
/// long, so it doubles as the loop's idle pacing.
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Open the host-facing serial device in raw mode with a short read timeout.
pub fn open_serial(device: &str, baud: u32) -> Result<Box<dyn SerialPort>, TncError> {
    serialport::new(device, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| TncError::SerialOpen(device.to_owned(), e))
}

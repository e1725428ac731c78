use thiserror::Error;

#[derive(Debug, Error)]
pub enum TncError {
    #[error("unable to open serial device {0}: {1}")]
    SerialOpen(String, serialport::Error),

    #[error("serial I/O failed: {0}")]
    SerialIo(#[from] std::io::Error),

    #[error("SPI transaction failed: {0}")]
    Spi(#[from] rppal::spi::Error),

    #[error("GPIO setup failed: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("no such SPI bus: {0}")]
    SpiBus(u8),

    #[error("no such SPI slave select: {0}")]
    SpiSlaveSelect(u8),

    #[error("radio worker has shut down")]
    WorkerGone,
}

use std::time::Duration;

/// Modulation schemes the CC1101 can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Ook,
    Fsk2,
    Fsk4,
    Msk,
    Gfsk,
}

impl Modulation {
    /// MOD_FORMAT field of MDMCFG2.
    pub(crate) fn format_word(&self) -> u8 {
        match self {
            Modulation::Ook => 3,
            Modulation::Fsk2 => 0,
            Modulation::Fsk4 => 4,
            Modulation::Msk => 7,
            Modulation::Gfsk => 1,
        }
    }
}

/// Supported air data rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    R50,
    R110,
    R300,
    R600,
    R1200,
    R2400,
    R4800,
    R9600,
    R14400,
    R19200,
    R28800,
    R38400,
    R57600,
    R76800,
    R115200,
    R250K,
    R500K,
}

impl DataRate {
    pub fn bauds(&self) -> u32 {
        match self {
            DataRate::R50 => 50,
            DataRate::R110 => 110,
            DataRate::R300 => 300,
            DataRate::R600 => 600,
            DataRate::R1200 => 1200,
            DataRate::R2400 => 2400,
            DataRate::R4800 => 4800,
            DataRate::R9600 => 9600,
            DataRate::R14400 => 14400,
            DataRate::R19200 => 19200,
            DataRate::R28800 => 28800,
            DataRate::R38400 => 38400,
            DataRate::R57600 => 57600,
            DataRate::R76800 => 76800,
            DataRate::R115200 => 115200,
            DataRate::R250K => 250_000,
            DataRate::R500K => 500_000,
        }
    }

    pub fn from_bauds(bauds: u32) -> Option<Self> {
        Some(match bauds {
            50 => DataRate::R50,
            110 => DataRate::R110,
            300 => DataRate::R300,
            600 => DataRate::R600,
            1200 => DataRate::R1200,
            2400 => DataRate::R2400,
            4800 => DataRate::R4800,
            9600 => DataRate::R9600,
            14400 => DataRate::R14400,
            19200 => DataRate::R19200,
            28800 => DataRate::R28800,
            38400 => DataRate::R38400,
            57600 => DataRate::R57600,
            76800 => DataRate::R76800,
            115200 => DataRate::R115200,
            250_000 => DataRate::R250K,
            500_000 => DataRate::R500K,
            _ => return None,
        })
    }
}

/// Preamble lengths the modem supports (NUM_PREAMBLE in MDMCFG1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preamble {
    Bytes2,
    Bytes3,
    Bytes4,
    Bytes6,
    Bytes8,
    Bytes12,
    Bytes16,
    Bytes24,
}

impl Preamble {
    pub fn byte_count(&self) -> u32 {
        match self {
            Preamble::Bytes2 => 2,
            Preamble::Bytes3 => 3,
            Preamble::Bytes4 => 4,
            Preamble::Bytes6 => 6,
            Preamble::Bytes8 => 8,
            Preamble::Bytes12 => 12,
            Preamble::Bytes16 => 16,
            Preamble::Bytes24 => 24,
        }
    }

    pub(crate) fn word(&self) -> u8 {
        match self {
            Preamble::Bytes2 => 0,
            Preamble::Bytes3 => 1,
            Preamble::Bytes4 => 2,
            Preamble::Bytes6 => 3,
            Preamble::Bytes8 => 4,
            Preamble::Bytes12 => 5,
            Preamble::Bytes16 => 6,
            Preamble::Bytes24 => 7,
        }
    }
}

/// Everything configurable about one end of the link.
///
/// Built once from the command line at startup; the only parameters that
/// change afterwards are the KISS-adjustable timings, which live in
/// `tnccore::timing::RadioTimingConfig`.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub serial_device: String,
    pub serial_speed: u32,
    pub spi_bus: u8,
    pub spi_cs: u8,
    /// BCM pin wired to GDO0 (sync word / end of packet).
    pub gdo0_pin: u8,
    /// BCM pin wired to GDO2 (FIFO threshold).
    pub gdo2_pin: u8,
    pub modulation: Modulation,
    pub rate: DataRate,
    /// Deviation as a fraction of the data rate.
    pub modulation_index: f32,
    pub freq_hz: u32,
    /// Radio frame length; in variable-length mode this is the maximum.
    pub packet_length: u8,
    pub variable_length: bool,
    pub whitening: bool,
    pub fec: bool,
    pub preamble: Preamble,
    /// How long serial bytes may accumulate before they must go to air.
    pub serial_window: Duration,
    /// How long received packets may accumulate before the serial write.
    pub radio_window: Duration,
    /// Wait after keying the transmitter, KISS TxDelay adjustable.
    pub keyup_delay: Duration,
    /// Wait after the last transmitted block before re-arming receive.
    pub keydown_delay: Duration,
    /// Wait when switching the radio from receive to transmit.
    pub switchover_delay: Duration,
    /// Gap between consecutive blocks of one logical packet.
    pub packet_delay: Duration,
}

impl LinkConfig {
    /// Airtime of one byte at the configured rate. 4-FSK moves two bits per
    /// symbol, halving it.
    pub fn byte_time(&self) -> Duration {
        let mut micros = 8_000_000u64 / self.rate.bauds() as u64;
        if self.modulation == Modulation::Fsk4 {
            micros /= 2;
        }
        Duration::from_micros(micros.max(1))
    }

    /// Airtime of one full radio frame including preamble, sync word and the
    /// hardware CRC.
    pub fn block_airtime(&self) -> Duration {
        let bytes = self.preamble.byte_count() + 4 + self.packet_length as u32 + 2;
        self.byte_time() * bytes
    }

    /// How long reception waits between blocks of one packet before giving
    /// the partial packet up. Scales with frame airtime so slow links get
    /// proportionally more patience.
    pub fn block_timeout(&self) -> Duration {
        self.block_airtime() * 4 + Duration::from_millis(50)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            serial_device: "/var/ax25/axp2".to_owned(),
            serial_speed: 9600,
            spi_bus: 0,
            spi_cs: 0,
            gdo0_pin: 24,
            gdo2_pin: 25,
            modulation: Modulation::Fsk2,
            rate: DataRate::R9600,
            modulation_index: 0.5,
            freq_hz: 433_600_000,
            packet_length: 250,
            variable_length: false,
            whitening: false,
            fec: false,
            preamble: Preamble::Bytes4,
            serial_window: Duration::from_millis(40),
            radio_window: Duration::ZERO,
            keyup_delay: Duration::from_millis(4),
            keydown_delay: Duration::ZERO,
            switchover_delay: Duration::ZERO,
            packet_delay: Duration::from_millis(10),
        }
    }
}

//! CC1101 transceiver driver over SPI.

pub mod registers;

use crate::config::{LinkConfig, Modulation};
use crate::error::TncError;
use log::{debug, info};
use self::registers as regs;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use std::thread;
use std::time::Duration;

const SPI_CLOCK_HZ: u32 = 5_000_000;

/// 26 MHz crystal on every CC1101 module this targets.
const F_XTAL: u32 = 26_000_000;

/// Intermediate frequency, lowest synthesizer point below 310 kHz.
const F_IF: u32 = 310_000;

pub struct Cc1101 {
    spi: Spi,
}

impl Cc1101 {
    pub fn open(bus: u8, slave_select: u8) -> Result<Self, TncError> {
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            other => return Err(TncError::SpiBus(other)),
        };
        let slave_select = match slave_select {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            other => return Err(TncError::SpiSlaveSelect(other)),
        };
        let spi = Spi::new(bus, slave_select, SPI_CLOCK_HZ, Mode::Mode0)?;
        Ok(Self { spi })
    }

    /// Reset the chip and wait for the crystal to come back.
    pub fn power_up_reset(&mut self) -> Result<(), TncError> {
        self.strobe(regs::SRES)?;
        thread::sleep(Duration::from_micros(200));
        Ok(())
    }

    /// Program the full register set for the given link parameters.
    pub fn configure(&mut self, config: &LinkConfig) -> Result<(), TncError> {
        let params = RadioParams::derive(config);
        params.log_actual(config);

        self.write_register(regs::IOCFG2, regs::IOCFG2_RX_FIFO)?;
        self.write_register(regs::IOCFG0, regs::IOCFG0_SYNC)?;
        self.write_register(regs::FIFOTHR, regs::FIFOTHR_VALUE)?;
        self.write_register(regs::PKTLEN, config.packet_length)?;

        // CRC on, FIFOs in normal mode, fixed or variable length
        let length_mode = if config.variable_length { 0x01 } else { 0x00 };
        let pktctrl0 = ((config.whitening as u8) << 6) | 0x04 | length_mode;
        self.write_register(regs::PKTCTRL0, pktctrl0)?;
        // append RSSI and LQI/CRC status bytes, no address check, no autoflush
        self.write_register(regs::PKTCTRL1, 0x04)?;
        self.write_register(regs::ADDR, 0x00)?;
        self.write_register(regs::CHANNR, 0x00)?;

        self.write_register(regs::FSCTRL0, 0x00)?;
        self.write_register(regs::FSCTRL1, (params.if_word & 0x1F) as u8)?;
        self.write_register(regs::FREQ2, ((params.freq_word >> 16) & 0xFF) as u8)?;
        self.write_register(regs::FREQ1, ((params.freq_word >> 8) & 0xFF) as u8)?;
        self.write_register(regs::FREQ0, (params.freq_word & 0xFF) as u8)?;

        let mdmcfg4 = (params.chanbw_e << 6) | (params.chanbw_m << 4) | params.drate_e;
        self.write_register(regs::MDMCFG4, mdmcfg4)?;
        self.write_register(regs::MDMCFG3, params.drate_m)?;
        // DC blocking on, 30/32 sync word qualifier
        let mdmcfg2 = (config.modulation.format_word() << 4) | 0x03;
        self.write_register(regs::MDMCFG2, mdmcfg2)?;
        let mdmcfg1 = ((config.fec as u8) << 7) | (config.preamble.word() << 4);
        self.write_register(regs::MDMCFG1, mdmcfg1)?;
        self.write_register(regs::MDMCFG0, 0x00)?;
        self.write_register(regs::DEVIATN, (params.deviat_e << 4) | params.deviat_m)?;

        self.write_register(regs::MCSM2, 0x00)?;
        // stay in RX after a packet, go to RX after TX
        self.write_register(regs::MCSM1, 0x3F)?;
        // calibrate on IDLE-to-RX/TX transitions
        self.write_register(regs::MCSM0, 0x18)?;

        self.write_register(regs::FOCCFG, 0x1D)?;
        self.write_register(regs::BSCFG, 0x1C)?;
        self.write_register(regs::AGCCTRL2, 0xC7)?;
        self.write_register(regs::AGCCTRL1, 0x00)?;
        self.write_register(regs::AGCCTRL0, 0xB2)?;
        self.write_register(regs::FREND1, 0xB6)?;
        self.write_register(regs::FREND0, 0x10)?;
        self.write_register(regs::FSCAL3, 0xEA)?;
        self.write_register(regs::FSCAL2, 0x0A)?;
        self.write_register(regs::FSCAL1, 0x00)?;
        self.write_register(regs::FSCAL0, 0x11)?;
        self.write_register(regs::FSTEST, 0x59)?;
        self.write_register(regs::TEST2, 0x88)?;
        self.write_register(regs::TEST1, 0x31)?;
        self.write_register(regs::TEST0, 0x09)?;
        Ok(())
    }

    pub fn strobe(&mut self, command: u8) -> Result<(), TncError> {
        self.spi.write(&[command])?;
        Ok(())
    }

    pub fn write_register(&mut self, addr: u8, value: u8) -> Result<(), TncError> {
        self.spi.write(&[addr, value])?;
        Ok(())
    }

    pub fn read_register(&mut self, addr: u8) -> Result<u8, TncError> {
        let mut rx = [0u8; 2];
        self.spi.transfer(&mut rx, &[addr | regs::READ_SINGLE, 0])?;
        Ok(rx[1])
    }

    /// Status registers share addresses with strobes and need the burst bit.
    pub fn read_status(&mut self, addr: u8) -> Result<u8, TncError> {
        let mut rx = [0u8; 2];
        self.spi.transfer(&mut rx, &[addr | regs::READ_BURST, 0])?;
        Ok(rx[1])
    }

    pub fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), TncError> {
        let mut tx = vec![0u8; buf.len() + 1];
        tx[0] = regs::FIFO | regs::READ_BURST;
        let mut rx = vec![0u8; buf.len() + 1];
        self.spi.transfer(&mut rx, &tx)?;
        buf.copy_from_slice(&rx[1..]);
        Ok(())
    }

    pub fn write_fifo(&mut self, data: &[u8]) -> Result<(), TncError> {
        let mut tx = Vec::with_capacity(data.len() + 1);
        tx.push(regs::FIFO | regs::WRITE_BURST);
        tx.extend_from_slice(data);
        self.spi.write(&tx)?;
        Ok(())
    }

    pub fn set_packet_length(&mut self, len: u8) -> Result<(), TncError> {
        self.write_register(regs::PKTLEN, len)
    }

    pub fn marc_state(&mut self) -> Result<u8, TncError> {
        Ok(self.read_status(regs::MARCSTATE)? & regs::MARCSTATE_MASK)
    }

    /// Dump the chip status registers through the logger.
    pub fn log_status(&mut self) -> Result<(), TncError> {
        let mut status = [0u8; 12];
        for (i, value) in status.iter_mut().enumerate() {
            *value = self.read_status(regs::PARTNUM + i as u8)?;
        }
        info!("Part number ........: {}", status[0]);
        info!("Version ............: {}", status[1]);
        info!("Freq offset est ....: {}", status[2]);
        info!("CRC OK .............: {}", (status[3] & regs::CRC_OK) >> 7);
        info!("LQI ................: {}", 0x7F - (status[3] & 0x7F));
        info!("RSSI ...............: {:.1} dBm", tnccore::block::rssi_dbm(status[4]));
        info!(
            "Radio FSM state ....: {}",
            regs::STATE_NAMES[(status[5] & regs::MARCSTATE_MASK) as usize]
        );
        info!("Carrier sense ......: {}", (status[8] & 0x40) >> 6);
        info!("Clear channel ......: {}", (status[8] & 0x10) >> 4);
        info!("GDO2 ...............: {}", (status[8] & 0x04) >> 2);
        info!("GDO0 ...............: {}", status[8] & 0x01);
        info!("TX FIFO underflow ..: {}", (status[10] & regs::FIFO_UNDERFLOW) >> 7);
        info!("TX FIFO bytes ......: {}", status[10] & regs::NUM_TXBYTES);
        info!("RX FIFO overflow ...: {}", (status[11] & regs::FIFO_OVERFLOW) >> 7);
        info!("RX FIFO bytes ......: {}", status[11] & regs::NUM_RXBYTES);
        Ok(())
    }
}

/// Register words derived from the link configuration, all per the datasheet
/// formulas for a 26 MHz crystal:
///
///   rate      = (Fxosc / 2^28) * (256 + DRATE_M) * 2^DRATE_E
///   bandwidth = Fxosc / (8 * (4 + CHANBW_M) * 2^CHANBW_E)
///   deviation = (Fxosc / 2^17) * (8 + DEVIAT_M) * 2^DEVIAT_E
#[derive(Debug, PartialEq)]
pub(crate) struct RadioParams {
    pub freq_word: u32,
    pub if_word: u32,
    pub drate_m: u8,
    pub drate_e: u8,
    pub chanbw_m: u8,
    pub chanbw_e: u8,
    pub deviat_m: u8,
    pub deviat_e: u8,
}

impl RadioParams {
    pub(crate) fn derive(config: &LinkConfig) -> Self {
        let mut drate = config.rate.bauds() as f64;
        if config.modulation == Modulation::Fsk4 && drate > 300_000.0 {
            debug!("4-FSK caps the data rate at 300 kBaud");
            drate = 300_000.0;
        }
        let deviation = drate * config.modulation_index as f64;
        let f_xtal = F_XTAL as f64;

        // Carson's rule for the occupied bandwidth
        let (chanbw_e, chanbw_m) = chanbw_words(2.0 * (deviation + drate));

        let drate_e = (drate * (1u64 << 20) as f64 / f_xtal).log2().floor().max(0.0) as u8 & 0x0F;
        let drate_m = ((drate * (1u64 << 28) as f64) / (f_xtal * (1u64 << drate_e) as f64) - 256.0)
            .max(0.0) as u8;

        let deviat_e =
            (deviation * (1u64 << 14) as f64 / f_xtal).log2().floor().max(0.0) as u8 & 0x07;
        let deviat_m = (((deviation * (1u64 << 17) as f64)
            / (f_xtal * (1u64 << deviat_e) as f64)
            - 8.0)
            .max(0.0) as u8)
            & 0x07;

        Self {
            freq_word: freq_word(F_XTAL, config.freq_hz),
            if_word: if_word(F_XTAL, F_IF),
            drate_m,
            drate_e,
            chanbw_m,
            chanbw_e,
            deviat_m,
            deviat_e,
        }
    }

    /// Log the channel parameters the chip will actually run, recomputed
    /// from the register words.
    fn log_actual(&self, config: &LinkConfig) {
        let f_xtal = F_XTAL as f64;
        debug!(
            "operating frequency: {:.3} MHz (W={})",
            (f_xtal / 1e6 / (1u64 << 16) as f64) * self.freq_word as f64,
            self.freq_word
        );
        debug!(
            "channel bandwidth: {:.3} kHz (M={}, E={})",
            f_xtal / 1e3 / (8.0 * (4 + self.chanbw_m) as f64 * (1u64 << self.chanbw_e) as f64),
            self.chanbw_m,
            self.chanbw_e
        );
        debug!(
            "data rate: {:.1} Baud (M={}, E={})",
            (f_xtal / (1u64 << 28) as f64)
                * (256 + self.drate_m as u32) as f64
                * (1u64 << self.drate_e) as f64,
            self.drate_m,
            self.drate_e
        );
        debug!(
            "deviation: {:.3} kHz (M={}, E={})",
            (f_xtal / 1e3 / (1u64 << 17) as f64)
                * (8 + self.deviat_m) as f64
                * (1u64 << self.deviat_e) as f64,
            self.deviat_m,
            self.deviat_e
        );
        debug!("packet length: {} bytes", config.packet_length);
    }
}

/// FREQ[23..0] = freq * 2^16 / Fxosc, in 64 bits to keep the precision.
fn freq_word(f_xtal: u32, freq_hz: u32) -> u32 {
    ((freq_hz as u64 * (1 << 16)) / f_xtal as u64) as u32
}

/// FREQ_IF[4..0] = IF * 2^10 / Fxosc.
fn if_word(f_xtal: u32, if_hz: u32) -> u32 {
    (if_hz as u64 * (1 << 10) / f_xtal as u64) as u32
}

/// Walk the 4x4 grid of CHANBW exponent/mantissa steps for the smallest
/// bandwidth still above the requested one.
fn chanbw_words(bw: f64) -> (u8, u8) {
    const CHANBW_LIMITS: [f64; 16] = [
        812_000.0, 650_000.0, 541_000.0, 464_000.0, 406_000.0, 325_000.0, 270_000.0, 232_000.0,
        203_000.0, 162_000.0, 135_000.0, 116_000.0, 102_000.0, 81_000.0, 68_000.0, 58_000.0,
    ];
    for e in 0..4u8 {
        for m in 0..4u8 {
            if bw > CHANBW_LIMITS[(4 * e + m) as usize] {
                return (e, m);
            }
        }
    }
    (3, 3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataRate;

    #[test]
    fn freq_word_433_6_mhz() {
        assert_eq!(freq_word(F_XTAL, 433_600_000), 1_092_938);
    }

    #[test]
    fn freq_word_inverse_sanity() {
        // the datasheet example: FREQ = 0x10A762 is 432.99982 MHz
        let word = freq_word(F_XTAL, 433_000_000);
        assert!((word as i64 - 0x10A762).abs() <= 1);
    }

    #[test]
    fn if_word_310_khz() {
        // 310 kHz lands on 12, i.e. 304.6875 kHz actual
        assert_eq!(if_word(F_XTAL, F_IF), 12);
    }

    #[test]
    fn rate_words_9600_2fsk() {
        let config = LinkConfig {
            rate: DataRate::R9600,
            ..LinkConfig::default()
        };
        let params = RadioParams::derive(&config);
        assert_eq!((params.drate_e, params.drate_m), (8, 131));
        assert_eq!((params.deviat_e, params.deviat_m), (1, 4));
        // 2*(4800+9600) = 28.8 kHz wanted; narrowest filter wins
        assert_eq!((params.chanbw_e, params.chanbw_m), (3, 3));
    }

    #[test]
    fn wide_bandwidth_selects_low_exponent() {
        assert_eq!(chanbw_words(700_000.0), (0, 1));
        assert_eq!(chanbw_words(900_000.0), (0, 0));
        assert_eq!(chanbw_words(30_000.0), (3, 3));
    }
}

//! CC1101 register map, strobe commands and status registers.

// Configuration registers
pub const IOCFG2: u8 = 0x00;
pub const IOCFG1: u8 = 0x01;
pub const IOCFG0: u8 = 0x02;
pub const FIFOTHR: u8 = 0x03;
pub const SYNC1: u8 = 0x04;
pub const SYNC0: u8 = 0x05;
pub const PKTLEN: u8 = 0x06;
pub const PKTCTRL1: u8 = 0x07;
pub const PKTCTRL0: u8 = 0x08;
pub const ADDR: u8 = 0x09;
pub const CHANNR: u8 = 0x0A;
pub const FSCTRL1: u8 = 0x0B;
pub const FSCTRL0: u8 = 0x0C;
pub const FREQ2: u8 = 0x0D;
pub const FREQ1: u8 = 0x0E;
pub const FREQ0: u8 = 0x0F;
pub const MDMCFG4: u8 = 0x10;
pub const MDMCFG3: u8 = 0x11;
pub const MDMCFG2: u8 = 0x12;
pub const MDMCFG1: u8 = 0x13;
pub const MDMCFG0: u8 = 0x14;
pub const DEVIATN: u8 = 0x15;
pub const MCSM2: u8 = 0x16;
pub const MCSM1: u8 = 0x17;
pub const MCSM0: u8 = 0x18;
pub const FOCCFG: u8 = 0x19;
pub const BSCFG: u8 = 0x1A;
pub const AGCCTRL2: u8 = 0x1B;
pub const AGCCTRL1: u8 = 0x1C;
pub const AGCCTRL0: u8 = 0x1D;
pub const FREND1: u8 = 0x21;
pub const FREND0: u8 = 0x22;
pub const FSCAL3: u8 = 0x23;
pub const FSCAL2: u8 = 0x24;
pub const FSCAL1: u8 = 0x25;
pub const FSCAL0: u8 = 0x26;
pub const FSTEST: u8 = 0x29;
pub const TEST2: u8 = 0x2C;
pub const TEST1: u8 = 0x2D;
pub const TEST0: u8 = 0x2E;

// Command strobes
pub const SRES: u8 = 0x30;
pub const SFSTXON: u8 = 0x31;
pub const SXOFF: u8 = 0x32;
pub const SCAL: u8 = 0x33;
pub const SRX: u8 = 0x34;
pub const STX: u8 = 0x35;
pub const SIDLE: u8 = 0x36;
pub const SFRX: u8 = 0x3A;
pub const SFTX: u8 = 0x3B;
pub const SNOP: u8 = 0x3D;

// Status registers (read with the burst bit set)
pub const PARTNUM: u8 = 0x30;
pub const VERSION: u8 = 0x31;
pub const FREQEST: u8 = 0x32;
pub const LQI: u8 = 0x33;
pub const RSSI: u8 = 0x34;
pub const MARCSTATE: u8 = 0x35;
pub const PKTSTATUS: u8 = 0x38;
pub const TXBYTES: u8 = 0x3A;
pub const RXBYTES: u8 = 0x3B;

pub const PATABLE: u8 = 0x3E;
pub const FIFO: u8 = 0x3F;

// SPI header bits
pub const WRITE_BURST: u8 = 0x40;
pub const READ_SINGLE: u8 = 0x80;
pub const READ_BURST: u8 = 0xC0;

// Field masks
pub const NUM_RXBYTES: u8 = 0x7F;
pub const NUM_TXBYTES: u8 = 0x7F;
pub const FIFO_OVERFLOW: u8 = 0x80;
pub const FIFO_UNDERFLOW: u8 = 0x80;
pub const CRC_OK: u8 = 0x80;
pub const MARCSTATE_MASK: u8 = 0x1F;

/// GDO2 watches the RX FIFO threshold while receiving and the TX FIFO
/// threshold while transmitting.
pub const IOCFG2_RX_FIFO: u8 = 0x00;
pub const IOCFG2_TX_FIFO: u8 = 0x02;

/// GDO0 asserts on sync word and deasserts at end of packet.
pub const IOCFG0_SYNC: u8 = 0x06;

/// FIFOTHR = 14: GDO2 asserts at 60 bytes in the RX FIFO, or 5 bytes left in
/// the TX FIFO.
pub const FIFOTHR_VALUE: u8 = 0x0E;
pub const RX_FIFO_THRESHOLD: usize = 60;
pub const TX_FIFO_THRESHOLD: usize = 5;

// MARCSTATE values of interest
pub const MARC_IDLE: u8 = 0x01;
pub const MARC_RX: u8 = 0x0D;
pub const MARC_TX: u8 = 0x13;
pub const MARC_RXFIFO_OVERFLOW: u8 = 0x11;
pub const MARC_TXFIFO_UNDERFLOW: u8 = 0x16;

/// Radio FSM state names indexed by MARCSTATE.
pub const STATE_NAMES: [&str; 32] = [
    "SLEEP",
    "IDLE",
    "XOFF",
    "VCOON_MC",
    "REGON_MC",
    "MANCAL",
    "VCOON",
    "REGON",
    "STARTCAL",
    "BWBOOST",
    "FS_LOCK",
    "IFADCON",
    "ENDCAL",
    "RX",
    "RX_END",
    "RX_RST",
    "TXRX_SWITCH",
    "RXFIFO_OVERFLOW",
    "FSTXON",
    "TX",
    "TX_END",
    "RXTX_SWITCH",
    "TXFIFO_UNDERFLOW",
    "undefined",
    "undefined",
    "undefined",
    "undefined",
    "undefined",
    "undefined",
    "undefined",
    "undefined",
    "undefined",
];

use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use rppal::gpio::Gpio;
use tncapp::bridge::Bridge;
use tncapp::cc1101::Cc1101;
use tncapp::config::{DataRate, LinkConfig, Modulation, Preamble};
use tncapp::error::TncError;
use tncapp::radio::{attach_interrupts, spawn_radio_worker, LinkEvent, RadioHandle, SendRequest};
use tncapp::serial::open_serial;

#[derive(Parser)]
#[command(
    name = "cc1101-tnc",
    about = "Virtual KISS TNC bridging a serial device to a CC1101 transceiver"
)]
struct Args {
    #[arg(short = 'v', long, action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,

    #[arg(
        short = 'D',
        long,
        default_value = "/var/ax25/axp2",
        help = "Host-facing serial device"
    )]
    serial_device: String,

    #[arg(short = 'B', long, default_value = "9600", help = "Serial speed in Bauds")]
    serial_speed: u32,

    #[arg(long, default_value = "0", help = "SPI bus of the CC1101")]
    spi_bus: u8,

    #[arg(long, default_value = "0", help = "SPI chip select of the CC1101")]
    spi_cs: u8,

    #[arg(long, default_value = "24", help = "BCM pin wired to GDO0 (packet edges)")]
    gdo0_pin: u8,

    #[arg(long, default_value = "25", help = "BCM pin wired to GDO2 (FIFO threshold)")]
    gdo2_pin: u8,

    #[arg(
        short = 'M',
        long,
        default_value = "2fsk",
        value_parser = parse_modulation,
        help = "Modulation: ook, 2fsk, 4fsk, msk or gfsk"
    )]
    modulation: Modulation,

    #[arg(
        short = 'R',
        long,
        default_value = "9600",
        value_parser = parse_rate,
        help = "Air data rate in Bauds (50 to 500000)"
    )]
    rate: DataRate,

    #[arg(short = 'f', long, default_value = "433600000", help = "Frequency in Hz")]
    frequency: u32,

    #[arg(short = 'm', long, default_value = "0.5", help = "Modulation index")]
    modulation_index: f32,

    #[arg(
        short = 'P',
        long,
        default_value = "250",
        value_parser = clap::value_parser!(u8).range(8..=255),
        help = "Radio block length in bytes"
    )]
    packet_length: u8,

    #[arg(
        short = 'V',
        long,
        help = "Variable length packets; the block length becomes the maximum"
    )]
    variable_length: bool,

    #[arg(long, help = "Enable data whitening")]
    whitening: bool,

    #[arg(long, help = "Enable hardware FEC")]
    fec: bool,

    #[arg(
        long,
        default_value = "4",
        value_parser = parse_preamble,
        help = "Preamble length in bytes: 2, 3, 4, 6, 8, 12, 16 or 24"
    )]
    preamble: Preamble,

    #[arg(
        short = 'w',
        long,
        default_value = "40000",
        help = "Serial concatenation window in microseconds"
    )]
    serial_window: u64,

    #[arg(
        short = 'W',
        long,
        default_value = "0",
        help = "Radio concatenation window in microseconds"
    )]
    radio_window: u64,

    #[arg(short = 'k', long, default_value = "4000", help = "Keyup delay in microseconds")]
    keyup_delay: u64,

    #[arg(short = 'l', long, default_value = "0", help = "Keydown delay in microseconds")]
    keydown_delay: u64,

    #[arg(
        long,
        default_value = "0",
        help = "Receive-to-transmit switchover delay in microseconds"
    )]
    switchover_delay: u64,

    #[arg(
        long,
        default_value = "10000",
        help = "Delay between blocks of one packet in microseconds"
    )]
    packet_delay: u64,

    #[arg(short = 's', long, help = "Print radio status registers and exit")]
    radio_status: bool,

    #[arg(long, value_parser = ["tx", "rx"], help = "Run a link test instead of bridging")]
    test: Option<String>,

    #[arg(short = 'n', long, default_value = "5", help = "Number of test packets")]
    repetition: u32,

    #[arg(long, default_value = "Hello, World!", help = "Payload for the transmit test")]
    test_phrase: String,
}

impl Args {
    fn link_config(&self) -> LinkConfig {
        LinkConfig {
            serial_device: self.serial_device.clone(),
            serial_speed: self.serial_speed,
            spi_bus: self.spi_bus,
            spi_cs: self.spi_cs,
            gdo0_pin: self.gdo0_pin,
            gdo2_pin: self.gdo2_pin,
            modulation: self.modulation,
            rate: self.rate,
            modulation_index: self.modulation_index,
            freq_hz: self.frequency,
            packet_length: self.packet_length,
            variable_length: self.variable_length,
            whitening: self.whitening,
            fec: self.fec,
            preamble: self.preamble,
            serial_window: Duration::from_micros(self.serial_window),
            radio_window: Duration::from_micros(self.radio_window),
            keyup_delay: Duration::from_micros(self.keyup_delay),
            keydown_delay: Duration::from_micros(self.keydown_delay),
            switchover_delay: Duration::from_micros(self.switchover_delay),
            packet_delay: Duration::from_micros(self.packet_delay),
        }
    }
}

fn parse_modulation(s: &str) -> Result<Modulation, String> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "ook" => Modulation::Ook,
        "2fsk" => Modulation::Fsk2,
        "4fsk" => Modulation::Fsk4,
        "msk" => Modulation::Msk,
        "gfsk" => Modulation::Gfsk,
        _ => return Err("expected one of: ook, 2fsk, 4fsk, msk, gfsk".to_owned()),
    })
}

fn parse_rate(s: &str) -> Result<DataRate, String> {
    let bauds: u32 = s.parse().map_err(|_| "rate must be a number".to_owned())?;
    DataRate::from_bauds(bauds).ok_or_else(|| format!("unsupported data rate: {bauds}"))
}

fn parse_preamble(s: &str) -> Result<Preamble, String> {
    Ok(match s {
        "2" => Preamble::Bytes2,
        "3" => Preamble::Bytes3,
        "4" => Preamble::Bytes4,
        "6" => Preamble::Bytes6,
        "8" => Preamble::Bytes8,
        "12" => Preamble::Bytes12,
        "16" => Preamble::Bytes16,
        "24" => Preamble::Bytes24,
        _ => return Err("expected one of: 2, 3, 4, 6, 8, 12, 16, 24".to_owned()),
    })
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_default_env()
        .filter_level(match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .init();

    if let Err(e) = run(&args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), TncError> {
    let config = args.link_config();
    let mut radio = Cc1101::open(config.spi_bus, config.spi_cs)?;
    radio.power_up_reset()?;

    if args.radio_status {
        radio.configure(&config)?;
        return radio.log_status();
    }

    let gpio = Gpio::new()?;
    let mut gdo0 = gpio.get(config.gdo0_pin)?.into_input();
    let mut gdo2 = gpio.get(config.gdo2_pin)?.into_input();
    let handle = spawn_radio_worker(radio, config.clone());
    attach_interrupts(&mut gdo0, &mut gdo2, handle.event_sender())?;

    match args.test.as_deref() {
        Some("tx") => transmit_test(&handle, &config, args.repetition, &args.test_phrase),
        Some("rx") => receive_test(&handle, args.repetition),
        _ => {
            let serial = open_serial(&config.serial_device, config.serial_speed)?;
            Bridge::new(serial, handle, config).run()
        }
    }
}

/// Put the test phrase on the air `repetition` times, as a KISS data frame
/// payload so a bridging peer forwards it to its host.
fn transmit_test(
    handle: &RadioHandle,
    config: &LinkConfig,
    repetition: u32,
    phrase: &str,
) -> Result<(), TncError> {
    let mut payload = vec![0x00u8];
    payload.extend_from_slice(phrase.as_bytes());
    info!(
        "sending a test packet of {} bytes {} times",
        payload.len(),
        repetition
    );
    for i in 0..repetition {
        handle.send(SendRequest {
            payload: payload.clone(),
            keyup_delay: config.keyup_delay,
        })?;
        loop {
            match handle.wait(Duration::from_secs(10)) {
                Some(LinkEvent::SendComplete) => {
                    info!("test packet {} of {repetition} sent", i + 1);
                    break;
                }
                Some(LinkEvent::PacketReceived(other)) => {
                    info!("meanwhile received {} bytes", other.len());
                }
                None => {
                    warn!("transmission did not complete in time");
                    break;
                }
            }
        }
        thread::sleep(Duration::from_millis(200));
    }
    Ok(())
}

/// Print `repetition` received packets, then exit.
fn receive_test(handle: &RadioHandle, repetition: u32) -> Result<(), TncError> {
    info!("waiting for {repetition} packets");
    let mut count = 0;
    while count < repetition {
        match handle.wait(Duration::from_secs(1)) {
            Some(LinkEvent::PacketReceived(payload)) => {
                count += 1;
                info!(
                    "packet {count}: {} bytes: {:?}",
                    payload.len(),
                    String::from_utf8_lossy(&payload)
                );
            }
            Some(LinkEvent::SendComplete) | None => {}
        }
    }
    Ok(())
}

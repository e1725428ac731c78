//! The half-duplex bridge: the program's main loop.
//!
//! Each iteration picks up completed packets from the radio worker and fresh
//! bytes from the serial device, batches each side inside its concatenation
//! window, then flushes: received packets are re-framed as KISS and written
//! to the serial port; complete serial frames are either consumed as KISS
//! commands or handed to the radio worker for transmission. The serial read
//! timeout paces the loop, so an idle link costs one bounded read per tick
//! and the windows bound how long traffic can sit unflushed in either
//! direction.

use crate::config::LinkConfig;
use crate::error::TncError;
use crate::radio::{LinkEvent, RadioHandle, SendRequest};
use log::{debug, info, trace, warn};
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tnccore::block;
use tnccore::kiss::{self, KissBuffer};
use tnccore::timing::{CommandAction, RadioTimingConfig};

pub struct Bridge<S> {
    serial: S,
    radio: RadioHandle,
    config: LinkConfig,
    pub(crate) timing: RadioTimingConfig,
    kiss_buffer: Box<KissBuffer>,
    /// Received packets re-framed as KISS, waiting for the serial write.
    rx_accum: Vec<u8>,
    /// When the oldest unflushed byte in each direction arrived.
    rx_oldest: Option<Instant>,
    tx_oldest: Option<Instant>,
}

impl<S: Read + Write> Bridge<S> {
    pub fn new(serial: S, radio: RadioHandle, config: LinkConfig) -> Self {
        let timing = RadioTimingConfig::new(config.keyup_delay);
        Self {
            serial,
            radio,
            config,
            timing,
            kiss_buffer: Box::new(KissBuffer::new()),
            rx_accum: Vec::new(),
            rx_oldest: None,
            tx_oldest: None,
        }
    }

    /// Run the bridge until the process dies. There is no clean shutdown:
    /// like any TNC it works until unplugged.
    pub fn run(&mut self) -> Result<(), TncError> {
        info!(
            "virtual TNC up: {} <-> {:.3} MHz, {} byte blocks",
            self.config.serial_device,
            self.config.freq_hz as f64 / 1e6,
            self.config.packet_length
        );
        loop {
            self.poll()?;
        }
    }

    /// One scheduler iteration.
    pub(crate) fn poll(&mut self) -> Result<(), TncError> {
        while let Some(event) = self.radio.poll() {
            match event {
                LinkEvent::PacketReceived(body) => self.accumulate_rx(&body),
                LinkEvent::SendComplete => trace!("radio send complete"),
            }
        }

        // the serial port's read timeout is this loop's idle sleep
        let buf = self.kiss_buffer.buf_remaining();
        match self.serial.read(buf) {
            Ok(n) if n > 0 => {
                self.kiss_buffer.did_write(n);
                if self.tx_oldest.is_none() {
                    self.tx_oldest = Some(Instant::now());
                }
            }
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                // transient serial trouble is survivable; don't spin on it
                warn!("serial read failed: {e}");
                thread::sleep(Duration::from_millis(10));
            }
        }

        self.flush_rx_if_due();
        self.flush_tx_if_due()
    }

    /// Re-frame a packet off the air and queue it for the serial side.
    fn accumulate_rx(&mut self, body: &[u8]) {
        let mut framed = vec![0u8; body.len() * 2 + 2];
        let n = kiss::frame_body(body, &mut framed);
        self.rx_accum.extend_from_slice(&framed[..n]);
        if self.rx_oldest.is_none() {
            self.rx_oldest = Some(Instant::now());
        }
    }

    fn flush_rx_if_due(&mut self) {
        let Some(oldest) = self.rx_oldest else {
            return;
        };
        if oldest.elapsed() < self.config.radio_window {
            return;
        }
        debug!("writing {} bytes to the serial port", self.rx_accum.len());
        if let Err(e) = self.serial.write_all(&self.rx_accum) {
            warn!("serial write failed, dropping {} bytes: {e}", self.rx_accum.len());
        }
        let _ = self.serial.flush();
        self.rx_accum.clear();
        self.rx_oldest = None;
    }

    fn flush_tx_if_due(&mut self) -> Result<(), TncError> {
        let Some(oldest) = self.tx_oldest else {
            return Ok(());
        };
        if oldest.elapsed() < self.config.serial_window {
            return Ok(());
        }
        if !self.kiss_buffer.has_frame() {
            // a partial frame keeps accumulating until its closing FEND
            return Ok(());
        }

        let mut outgoing: Vec<Vec<u8>> = Vec::new();
        let mut reset_requested = false;
        loop {
            let Some(frame) = self.kiss_buffer.next_frame() else {
                break;
            };
            if frame.is_empty() {
                continue;
            }
            let (updated, action) = self.timing.apply_command(&frame);
            self.timing = updated;
            match action {
                CommandAction::Data => {
                    let mut body = vec![0u8; frame.body().len()];
                    let n = frame.unescaped_body(&mut body);
                    body.truncate(n);
                    outgoing.push(body);
                }
                CommandAction::TimingUpdated => {
                    info!("host adjusted radio timing: {:?}", self.timing)
                }
                CommandAction::ResetRadio => reset_requested = true,
                CommandAction::Ignored => {}
            }
        }
        self.tx_oldest = None;

        if reset_requested {
            self.radio.reset()?;
        }
        for body in outgoing {
            if body.len() > block::max_payload(self.config.packet_length as usize) {
                warn!("dropping oversized frame of {} bytes", body.len());
                continue;
            }
            debug!("queueing {} bytes for transmission", body.len());
            self.radio.send(SendRequest {
                payload: body,
                keyup_delay: self.timing.keyup_delay,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{test_handle, RadioEvent};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::mpsc::{Receiver, SyncSender};
    use std::sync::{Arc, Mutex};

    const FEND: u8 = 0xC0;
    const FESC: u8 = 0xDB;
    const TFEND: u8 = 0xDC;

    struct FakeSerial {
        input: VecDeque<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl FakeSerial {
        fn new(chunks: &[&[u8]]) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let serial = Self {
                input: chunks.iter().map(|c| c.to_vec()).collect(),
                written: written.clone(),
            };
            (serial, written)
        }
    }

    impl Read for FakeSerial {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Err(io::Error::new(ErrorKind::TimedOut, "no data")),
            }
        }
    }

    impl Write for FakeSerial {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn instant_config() -> LinkConfig {
        LinkConfig {
            serial_window: Duration::ZERO,
            radio_window: Duration::ZERO,
            ..LinkConfig::default()
        }
    }

    fn bridge_with(
        chunks: &[&[u8]],
        config: LinkConfig,
    ) -> (
        Bridge<FakeSerial>,
        Arc<Mutex<Vec<u8>>>,
        Receiver<RadioEvent>,
        SyncSender<LinkEvent>,
    ) {
        let (handle, event_rx, link_tx) = test_handle();
        let (serial, written) = FakeSerial::new(chunks);
        (Bridge::new(serial, handle, config), written, event_rx, link_tx)
    }

    fn expect_send(event_rx: &Receiver<RadioEvent>) -> SendRequest {
        match event_rx.try_recv() {
            Ok(RadioEvent::Send(request)) => request,
            _ => panic!("expected a send request"),
        }
    }

    #[test]
    fn data_frame_goes_to_radio() {
        let (mut bridge, _, event_rx, _link_tx) =
            bridge_with(&[&[FEND, 0x00, b'H', b'E', b'L', b'L', b'O', FEND]], instant_config());
        bridge.poll().unwrap();
        let request = expect_send(&event_rx);
        assert_eq!(request.payload, b"\x00HELLO");
        assert_eq!(request.keyup_delay, Duration::from_millis(4));
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn tx_delay_command_updates_timing_and_is_not_forwarded() {
        let (mut bridge, _, event_rx, _link_tx) =
            bridge_with(&[&[FEND, 0x01, 5, FEND]], instant_config());
        bridge.poll().unwrap();
        assert!(event_rx.try_recv().is_err(), "command frames must stay local");
        assert_eq!(bridge.timing.keyup_delay, Duration::from_micros(50_000));

        // the new keyup delay rides along with the next data frame
        bridge.kiss_buffer.buf_remaining()[..4].copy_from_slice(&[FEND, 0x00, b'X', FEND]);
        bridge.kiss_buffer.did_write(4);
        bridge.tx_oldest = Some(Instant::now() - Duration::from_secs(1));
        bridge.flush_tx_if_due().unwrap();
        let request = expect_send(&event_rx);
        assert_eq!(request.keyup_delay, Duration::from_micros(50_000));
    }

    #[test]
    fn escaped_serial_frame_is_unescaped_for_the_air() {
        let (mut bridge, _, event_rx, _link_tx) = bridge_with(
            &[&[FEND, 0x00, FESC, TFEND, b'A', FEND]],
            instant_config(),
        );
        bridge.poll().unwrap();
        let request = expect_send(&event_rx);
        assert_eq!(request.payload, &[0x00, FEND, b'A']);
    }

    #[test]
    fn received_packet_is_framed_onto_serial() {
        let (mut bridge, written, _event_rx, link_tx) = bridge_with(&[], instant_config());
        link_tx
            .send(LinkEvent::PacketReceived(vec![0x00, b'H', b'I']))
            .unwrap();
        bridge.poll().unwrap();
        assert_eq!(
            written.lock().unwrap().as_slice(),
            &[FEND, 0x00, b'H', b'I', FEND]
        );
    }

    #[test]
    fn received_fend_byte_is_escaped_on_serial() {
        let (mut bridge, written, _event_rx, link_tx) = bridge_with(&[], instant_config());
        link_tx
            .send(LinkEvent::PacketReceived(vec![0x00, FEND]))
            .unwrap();
        bridge.poll().unwrap();
        assert_eq!(
            written.lock().unwrap().as_slice(),
            &[FEND, 0x00, FESC, TFEND, FEND]
        );
    }

    #[test]
    fn serial_window_batches_frames() {
        let mut config = instant_config();
        config.serial_window = Duration::from_millis(40);
        let (mut bridge, _, event_rx, _link_tx) = bridge_with(
            &[&[FEND, 0x00, b'A', FEND], &[FEND, 0x00, b'B', FEND]],
            config,
        );
        bridge.poll().unwrap();
        bridge.poll().unwrap();
        assert!(
            event_rx.try_recv().is_err(),
            "nothing may go out before the window closes"
        );
        thread::sleep(Duration::from_millis(50));
        bridge.poll().unwrap();
        assert_eq!(expect_send(&event_rx).payload, b"\x00A");
        assert_eq!(expect_send(&event_rx).payload, b"\x00B");
    }

    #[test]
    fn hardware_reset_command_resets_radio() {
        let (mut bridge, _, event_rx, _link_tx) =
            bridge_with(&[&[FEND, 0x0F, FEND]], instant_config());
        bridge.poll().unwrap();
        assert!(matches!(event_rx.try_recv(), Ok(RadioEvent::Reset)));
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let mut big = vec![FEND, 0x00];
        big.resize(block::max_payload(250) + 10, 0x42);
        big.push(FEND);
        let (mut bridge, _, event_rx, _link_tx) = bridge_with(&[&big], instant_config());
        bridge.poll().unwrap();
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn radio_window_concatenates_received_packets() {
        let mut config = instant_config();
        config.radio_window = Duration::from_millis(40);
        let (mut bridge, written, _event_rx, link_tx) = bridge_with(&[], config);
        link_tx
            .send(LinkEvent::PacketReceived(vec![0x00, b'A']))
            .unwrap();
        bridge.poll().unwrap();
        link_tx
            .send(LinkEvent::PacketReceived(vec![0x00, b'B']))
            .unwrap();
        bridge.poll().unwrap();
        assert!(written.lock().unwrap().is_empty());
        thread::sleep(Duration::from_millis(50));
        bridge.poll().unwrap();
        assert_eq!(
            written.lock().unwrap().as_slice(),
            &[FEND, 0x00, b'A', FEND, FEND, 0x00, b'B', FEND]
        );
    }
}

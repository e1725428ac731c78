//! Radio worker: owns the transceiver and pumps frames through its FIFO.
//!
//! GPIO edge callbacks and the bridge both talk to a single worker thread
//! through one event channel, so every SPI transaction happens on one
//! thread and the interrupt handlers never share mutable state with the
//! control loop. The worker reassembles received blocks into logical
//! packets and cuts outgoing payloads into blocks, arbitrating the
//! half-duplex turnaround: reception in progress holds off queued sends
//! until the countdown chain completes, aborts or times out.

use crate::cc1101::registers as regs;
use crate::cc1101::Cc1101;
use crate::config::LinkConfig;
use crate::error::TncError;
use log::{debug, error, info, trace, warn};
use rppal::gpio::{InputPin, Level, Trigger};
use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};
use tnccore::block::{self, Block, ReceivedBlock, Reassembler, Reassembly, MAX_BLOCK_LEN, TRAILER_LEN};
use tnccore::pump::{LinkStats, Transfer, FIFO_SIZE};

/// Most the worker will sleep between deadline checks.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes loaded per TX FIFO refill: the free space guaranteed once GDO2
/// deasserts, less one for safety.
const TX_REFILL: usize = FIFO_SIZE - regs::TX_FIFO_THRESHOLD - 1;

/// The six register-level operations the worker needs from a transceiver.
pub trait RadioPort: Send {
    fn configure(&mut self, config: &LinkConfig) -> Result<(), TncError>;
    fn strobe(&mut self, command: u8) -> Result<(), TncError>;
    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), TncError>;
    fn read_status(&mut self, addr: u8) -> Result<u8, TncError>;
    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), TncError>;
    fn write_fifo(&mut self, data: &[u8]) -> Result<(), TncError>;
    fn set_packet_length(&mut self, len: u8) -> Result<(), TncError>;
}

impl RadioPort for Cc1101 {
    fn configure(&mut self, config: &LinkConfig) -> Result<(), TncError> {
        Cc1101::configure(self, config)
    }

    fn strobe(&mut self, command: u8) -> Result<(), TncError> {
        Cc1101::strobe(self, command)
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), TncError> {
        Cc1101::write_register(self, addr, value)
    }

    fn read_status(&mut self, addr: u8) -> Result<u8, TncError> {
        Cc1101::read_status(self, addr)
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), TncError> {
        Cc1101::read_fifo(self, buf)
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), TncError> {
        Cc1101::write_fifo(self, data)
    }

    fn set_packet_length(&mut self, len: u8) -> Result<(), TncError> {
        Cc1101::set_packet_length(self, len)
    }
}

/// Everything that can wake the radio worker.
pub enum RadioEvent {
    /// GDO0 changed level: sync word found (rising) or end of packet
    /// (falling).
    PacketEdge(bool),
    /// GDO2 changed level: a FIFO crossed the programmed threshold.
    FifoLevel(bool),
    /// Transmit one logical packet.
    Send(SendRequest),
    /// Reset and reprogram the transceiver (KISS hardware-reset command).
    Reset,
    Shutdown,
}

/// One logical packet to put on the air, with the timing in force when the
/// bridge queued it.
pub struct SendRequest {
    pub payload: Vec<u8>,
    pub keyup_delay: Duration,
}

/// What the worker reports back to the bridge.
pub enum LinkEvent {
    /// A fully reassembled logical packet.
    PacketReceived(Vec<u8>),
    /// The most recent `Send` finished (or was dropped as unsendable).
    SendComplete,
}

/// Bridge-side handle to the radio worker.
pub struct RadioHandle {
    event_tx: SyncSender<RadioEvent>,
    link_rx: Receiver<LinkEvent>,
}

impl RadioHandle {
    pub fn send(&self, request: SendRequest) -> Result<(), TncError> {
        self.event_tx
            .send(RadioEvent::Send(request))
            .map_err(|_| TncError::WorkerGone)
    }

    pub fn reset(&self) -> Result<(), TncError> {
        self.event_tx
            .send(RadioEvent::Reset)
            .map_err(|_| TncError::WorkerGone)
    }

    /// Non-blocking check for worker output.
    pub fn poll(&self) -> Option<LinkEvent> {
        self.link_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for worker output.
    pub fn wait(&self, timeout: Duration) -> Option<LinkEvent> {
        self.link_rx.recv_timeout(timeout).ok()
    }

    /// A sender for wiring GPIO interrupt callbacks to the worker.
    pub fn event_sender(&self) -> SyncSender<RadioEvent> {
        self.event_tx.clone()
    }
}

/// Route the two GDO edge interrupts into the worker's event channel.
///
/// The callbacks run on rppal's interrupt threads and do nothing but post a
/// message; a full channel drops the edge rather than blocking interrupt
/// dispatch.
pub fn attach_interrupts(
    gdo0: &mut InputPin,
    gdo2: &mut InputPin,
    events: SyncSender<RadioEvent>,
) -> Result<(), TncError> {
    let packet_tx = events.clone();
    gdo0.set_async_interrupt(Trigger::Both, move |level| {
        let _ = packet_tx.try_send(RadioEvent::PacketEdge(level == Level::High));
    })?;
    gdo2.set_async_interrupt(Trigger::Both, move |level| {
        let _ = events.try_send(RadioEvent::FifoLevel(level == Level::High));
    })?;
    Ok(())
}

/// Start the worker thread. The returned handle is the only way to reach it.
pub fn spawn_radio_worker<R: RadioPort + 'static>(radio: R, config: LinkConfig) -> RadioHandle {
    let (event_tx, event_rx) = sync_channel(128);
    let (link_tx, link_rx) = sync_channel(128);
    thread::spawn(move || {
        RadioWorker::new(radio, config, event_rx, link_tx).run();
    });
    RadioHandle { event_tx, link_rx }
}

#[cfg(test)]
pub(crate) fn test_handle() -> (RadioHandle, Receiver<RadioEvent>, SyncSender<LinkEvent>) {
    let (event_tx, event_rx) = sync_channel(128);
    let (link_tx, link_rx) = sync_channel(128);
    (RadioHandle { event_tx, link_rx }, event_rx, link_tx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Receive,
    Transmit,
}

struct RadioWorker<R> {
    radio: R,
    config: LinkConfig,
    event_rx: Receiver<RadioEvent>,
    link_tx: SyncSender<LinkEvent>,
    mode: Mode,
    /// A frame is currently streaming through the FIFO in either direction.
    frame_active: bool,
    transfer: Option<Transfer>,
    rx_frame: [u8; MAX_BLOCK_LEN + TRAILER_LEN],
    rx_len: usize,
    tx_frame: [u8; MAX_BLOCK_LEN],
    tx_len: usize,
    tx_blocks: VecDeque<Block>,
    queued_sends: VecDeque<SendRequest>,
    reassembler: Box<Reassembler>,
    /// When the next block of an in-progress packet must have arrived.
    block_deadline: Option<Instant>,
    stats: LinkStats,
}

impl<R: RadioPort> RadioWorker<R> {
    fn new(
        radio: R,
        config: LinkConfig,
        event_rx: Receiver<RadioEvent>,
        link_tx: SyncSender<LinkEvent>,
    ) -> Self {
        Self {
            radio,
            config,
            event_rx,
            link_tx,
            mode: Mode::Receive,
            frame_active: false,
            transfer: None,
            rx_frame: [0u8; MAX_BLOCK_LEN + TRAILER_LEN],
            rx_len: 0,
            tx_frame: [0u8; MAX_BLOCK_LEN],
            tx_len: 0,
            tx_blocks: VecDeque::new(),
            queued_sends: VecDeque::new(),
            reassembler: Box::new(Reassembler::new()),
            block_deadline: None,
            stats: LinkStats::default(),
        }
    }

    fn run(&mut self) {
        if let Err(e) = self.radio.configure(&self.config) {
            error!("radio configuration failed: {e}");
            return;
        }
        if let Err(e) = self.arm_rx() {
            error!("could not enter receive mode: {e}");
            return;
        }
        loop {
            match self.event_rx.recv_timeout(self.poll_timeout()) {
                Ok(event) => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => self.check_block_deadline(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("radio worker stopping");
    }

    fn poll_timeout(&self) -> Duration {
        match self.block_deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        }
    }

    fn handle_event(&mut self, event: RadioEvent) -> bool {
        let result = match event {
            RadioEvent::PacketEdge(true) => self.on_sync(),
            RadioEvent::PacketEdge(false) => self.on_packet_end(),
            RadioEvent::FifoLevel(level) => self.on_fifo_level(level),
            RadioEvent::Send(request) => {
                self.queued_sends.push_back(request);
                self.service_sends()
            }
            RadioEvent::Reset => self.reset_radio(),
            RadioEvent::Shutdown => return false,
        };
        if let Err(e) = result {
            // SPI trouble is logged and the link keeps trying
            warn!("radio transaction failed: {e}");
        }
        true
    }

    fn check_block_deadline(&mut self) {
        let Some(deadline) = self.block_deadline else {
            return;
        };
        if Instant::now() < deadline {
            return;
        }
        warn!(
            "timed out waiting for the next block, dropping {} partial bytes",
            self.reassembler.payload().len()
        );
        self.reassembler.abort();
        self.block_deadline = None;
        if let Err(e) = self.service_sends() {
            warn!("radio transaction failed: {e}");
        }
    }

    // --- receive path -----------------------------------------------------

    fn arm_rx(&mut self) -> Result<(), TncError> {
        self.mode = Mode::Receive;
        self.frame_active = false;
        self.transfer = None;
        self.rx_len = 0;
        self.radio.strobe(regs::SIDLE)?;
        self.radio.write_register(regs::IOCFG2, regs::IOCFG2_RX_FIFO)?;
        self.radio.strobe(regs::SFRX)?;
        self.radio.strobe(regs::SRX)?;
        Ok(())
    }

    fn on_sync(&mut self) -> Result<(), TncError> {
        match self.mode {
            Mode::Receive => {
                trace!("sync word detected");
                self.frame_active = true;
                self.rx_len = 0;
                // fixed-length frames have a known size up front; variable
                // mode learns it from the first FIFO byte
                self.transfer = if self.config.variable_length {
                    None
                } else {
                    Some(Transfer::new(self.config.packet_length as usize + TRAILER_LEN))
                };
            }
            Mode::Transmit => trace!("sync word sent"),
        }
        Ok(())
    }

    fn on_packet_end(&mut self) -> Result<(), TncError> {
        match self.mode {
            Mode::Receive => {
                if !self.frame_active {
                    return Ok(());
                }
                self.drain_rx_final()?;
                if !self.frame_active {
                    // the final drain already gave up on the frame
                    return Ok(());
                }
                let complete = match &self.transfer {
                    Some(transfer) => transfer.finish(),
                    None => {
                        // variable mode with not even a length byte drained
                        warn!("end of packet before any bytes arrived");
                        self.abort_rx_frame()?;
                        return Ok(());
                    }
                };
                if let Err(anomaly) = complete {
                    warn!("RX FIFO anomaly, dropping frame: {anomaly:?}");
                    self.abort_rx_frame()?;
                    return Ok(());
                }
                self.frame_active = false;
                self.transfer = None;
                self.process_rx_frame();
                self.service_sends()
            }
            Mode::Transmit => self.on_tx_frame_done(),
        }
    }

    fn on_fifo_level(&mut self, asserted: bool) -> Result<(), TncError> {
        match (self.mode, asserted) {
            (Mode::Receive, true) => {
                if self.frame_active {
                    self.stats.threshold_hits += 1;
                    self.drain_once(true)?;
                }
                Ok(())
            }
            (Mode::Transmit, false) => {
                if self.frame_active {
                    self.stats.threshold_hits += 1;
                    self.refill_tx()?;
                }
                Ok(())
            }
            // RX deassert after a drain and TX assert after a refill carry
            // no work
            _ => Ok(()),
        }
    }

    /// Move waiting bytes out of the RX FIFO into the frame buffer, at most
    /// one chunk. With `leave_one` the last waiting byte stays put: reading
    /// the FIFO empty while the radio is still filling it corrupts data.
    /// Returns the number of bytes drained.
    fn drain_once(&mut self, leave_one: bool) -> Result<usize, TncError> {
        let raw = self.radio.read_status(regs::RXBYTES)?;
        if raw & regs::FIFO_OVERFLOW != 0 {
            warn!("RX FIFO overflow, dropping frame");
            self.abort_rx_frame()?;
            return Ok(0);
        }
        let mut avail = (raw & regs::NUM_RXBYTES) as usize;
        if leave_one {
            avail = avail.saturating_sub(1);
        }
        if let Some(transfer) = &self.transfer {
            avail = avail.min(transfer.remaining());
        }
        if avail == 0 {
            return Ok(0);
        }
        if self.rx_len + avail > self.rx_frame.len() {
            warn!("frame overruns the receive buffer, dropping it");
            self.abort_rx_frame()?;
            return Ok(0);
        }
        self.radio
            .read_fifo(&mut self.rx_frame[self.rx_len..self.rx_len + avail])?;
        self.rx_len += avail;

        if self.transfer.is_none() {
            // first drain in variable mode: byte 0 declares the frame size
            let total = self.rx_frame[0] as usize + 1 + TRAILER_LEN;
            if total > self.rx_frame.len() {
                warn!("declared frame length {total} is impossible, dropping frame");
                self.abort_rx_frame()?;
                return Ok(0);
            }
            self.transfer = Some(Transfer::new(total));
        }
        let Some(transfer) = &mut self.transfer else {
            return Ok(0);
        };
        if let Err(anomaly) = transfer.advance(avail) {
            warn!("RX FIFO anomaly, dropping frame: {anomaly:?}");
            self.abort_rx_frame()?;
            return Ok(0);
        }
        Ok(avail)
    }

    /// End of packet: everything left for this frame is in the FIFO now.
    fn drain_rx_final(&mut self) -> Result<(), TncError> {
        loop {
            if !self.frame_active {
                return Ok(());
            }
            if let Some(transfer) = &self.transfer {
                if transfer.is_complete() {
                    return Ok(());
                }
            }
            if self.drain_once(false)? == 0 {
                return Ok(());
            }
        }
    }

    /// One whole raw frame is in the buffer; feed it to the reassembler.
    fn process_rx_frame(&mut self) {
        let block = match ReceivedBlock::from_raw(&self.rx_frame[..self.rx_len]) {
            Ok(block) => block,
            Err(e) => {
                warn!("received a malformed block: {e:?}");
                self.reassembler.abort();
                self.block_deadline = None;
                return;
            }
        };
        self.rx_len = 0;
        self.stats.packets_received += 1;
        debug!(
            "block #{}: countdown {}, {} bytes, RSSI {:.1} dBm, LQI {}",
            self.stats.packets_received,
            block.countdown(),
            block.payload().len(),
            block.rssi_dbm(),
            block.lqi()
        );
        match self.reassembler.push(&block) {
            Ok(Reassembly::Complete) => {
                let payload = self.reassembler.payload().to_vec();
                self.reassembler.abort();
                self.block_deadline = None;
                debug!("logical packet complete: {} bytes", payload.len());
                if self.link_tx.try_send(LinkEvent::PacketReceived(payload)).is_err() {
                    warn!("bridge is not draining received packets, dropping one");
                }
            }
            Ok(Reassembly::MoreBlocks(remaining)) => {
                trace!("{remaining} blocks still to come");
                self.block_deadline = Some(Instant::now() + self.config.block_timeout());
            }
            Err(e) => {
                warn!("packet reassembly aborted: {e:?}");
                self.block_deadline = None;
            }
        }
    }

    /// Drop the frame in flight and put the radio back into a clean RX.
    fn abort_rx_frame(&mut self) -> Result<(), TncError> {
        self.reassembler.abort();
        self.block_deadline = None;
        self.arm_rx()
    }

    // --- transmit path ----------------------------------------------------

    /// Start the next queued send, unless reception holds the channel.
    fn service_sends(&mut self) -> Result<(), TncError> {
        if self.mode == Mode::Transmit || self.frame_active || self.reassembler.in_progress() {
            return Ok(());
        }
        let Some(request) = self.queued_sends.pop_front() else {
            return Ok(());
        };
        self.start_send(request)
    }

    fn start_send(&mut self, request: SendRequest) -> Result<(), TncError> {
        let block_len = self.config.packet_length as usize;
        if request.payload.len() > block::max_payload(block_len) {
            warn!(
                "payload of {} bytes cannot be fragmented at block length {}, dropping it",
                request.payload.len(),
                block_len
            );
            let _ = self.link_tx.try_send(LinkEvent::SendComplete);
            return Ok(());
        }
        self.tx_blocks = block::fragment(&request.payload, block_len).collect();
        debug!(
            "transmitting {} bytes in {} blocks",
            request.payload.len(),
            self.tx_blocks.len()
        );
        self.mode = Mode::Transmit;
        self.radio.strobe(regs::SIDLE)?;
        thread::sleep(self.config.switchover_delay);
        self.radio.write_register(regs::IOCFG2, regs::IOCFG2_TX_FIFO)?;
        if !self.config.variable_length {
            self.radio.set_packet_length(self.config.packet_length)?;
        }
        thread::sleep(request.keyup_delay);
        self.begin_next_block()
    }

    /// Prime the FIFO with the head of the next block and key up.
    fn begin_next_block(&mut self) -> Result<(), TncError> {
        let Some(block) = self.tx_blocks.pop_front() else {
            return self.finish_send();
        };
        let frame = if self.config.variable_length {
            block.as_bytes()
        } else {
            block.padded(self.config.packet_length as usize)
        };
        self.tx_len = frame.len();
        self.tx_frame[..self.tx_len].copy_from_slice(frame);

        self.radio.strobe(regs::SFTX)?;
        let initial = self.tx_len.min(FIFO_SIZE);
        self.radio.write_fifo(&self.tx_frame[..initial])?;
        let mut transfer = Transfer::new(self.tx_len);
        if let Err(anomaly) = transfer.advance(initial) {
            warn!("TX FIFO anomaly on initial load: {anomaly:?}");
        }
        self.transfer = Some(transfer);
        self.frame_active = true;
        self.radio.strobe(regs::STX)
    }

    /// GDO2 deasserted mid-transmission: top the FIFO back up.
    fn refill_tx(&mut self) -> Result<(), TncError> {
        let Some(transfer) = &mut self.transfer else {
            return Ok(());
        };
        if transfer.is_complete() {
            return Ok(());
        }
        let chunk = transfer.remaining().min(TX_REFILL);
        let start = transfer.index();
        self.radio.write_fifo(&self.tx_frame[start..start + chunk])?;
        if let Err(anomaly) = transfer.advance(chunk) {
            warn!("TX FIFO anomaly on refill: {anomaly:?}");
        }
        Ok(())
    }

    /// GDO0 fell in transmit mode: the block on the air is done.
    fn on_tx_frame_done(&mut self) -> Result<(), TncError> {
        if !self.frame_active {
            return Ok(());
        }
        self.frame_active = false;
        let txbytes = self.radio.read_status(regs::TXBYTES)?;
        if txbytes & regs::FIFO_UNDERFLOW != 0 {
            warn!("TX FIFO underflowed during the block");
            self.radio.strobe(regs::SFTX)?;
        }
        if let Some(transfer) = self.transfer.take() {
            if let Err(anomaly) = transfer.finish() {
                warn!("TX FIFO anomaly at end of block: {anomaly:?}");
            }
        }
        self.stats.packets_sent += 1;
        if self.tx_blocks.is_empty() {
            self.finish_send()
        } else {
            // give the peer's drain a head start before the next fragment
            thread::sleep(self.config.packet_delay);
            self.begin_next_block()
        }
    }

    /// Turn around to receive, report completion, then take on any send
    /// queued meanwhile.
    fn finish_send(&mut self) -> Result<(), TncError> {
        trace!(
            "send done; {} sent / {} received / {} threshold services",
            self.stats.packets_sent, self.stats.packets_received, self.stats.threshold_hits
        );
        thread::sleep(self.config.keydown_delay);
        self.arm_rx()?;
        let _ = self.link_tx.try_send(LinkEvent::SendComplete);
        self.service_sends()
    }

    fn reset_radio(&mut self) -> Result<(), TncError> {
        info!("resetting the transceiver");
        self.queued_sends.clear();
        self.tx_blocks.clear();
        self.reassembler.abort();
        self.block_deadline = None;
        self.radio.strobe(regs::SRES)?;
        thread::sleep(Duration::from_micros(200));
        self.radio.configure(&self.config)?;
        self.arm_rx()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockState {
        rx_fifo: VecDeque<u8>,
        tx_written: Vec<u8>,
        strobes: Vec<u8>,
        registers: Vec<(u8, u8)>,
    }

    #[derive(Clone, Default)]
    struct MockRadio {
        state: Arc<Mutex<MockState>>,
    }

    impl RadioPort for MockRadio {
        fn configure(&mut self, _config: &LinkConfig) -> Result<(), TncError> {
            Ok(())
        }

        fn strobe(&mut self, command: u8) -> Result<(), TncError> {
            self.state.lock().unwrap().strobes.push(command);
            Ok(())
        }

        fn write_register(&mut self, addr: u8, value: u8) -> Result<(), TncError> {
            self.state.lock().unwrap().registers.push((addr, value));
            Ok(())
        }

        fn read_status(&mut self, addr: u8) -> Result<u8, TncError> {
            let state = self.state.lock().unwrap();
            Ok(match addr {
                regs::RXBYTES => state.rx_fifo.len().min(63) as u8,
                regs::TXBYTES => 0,
                _ => 0,
            })
        }

        fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), TncError> {
            let mut state = self.state.lock().unwrap();
            for byte in buf.iter_mut() {
                *byte = state.rx_fifo.pop_front().unwrap_or(0);
            }
            Ok(())
        }

        fn write_fifo(&mut self, data: &[u8]) -> Result<(), TncError> {
            self.state.lock().unwrap().tx_written.extend_from_slice(data);
            Ok(())
        }

        fn set_packet_length(&mut self, _len: u8) -> Result<(), TncError> {
            Ok(())
        }
    }

    fn test_config(packet_length: u8) -> LinkConfig {
        LinkConfig {
            packet_length,
            keyup_delay: Duration::ZERO,
            keydown_delay: Duration::ZERO,
            packet_delay: Duration::ZERO,
            ..LinkConfig::default()
        }
    }

    /// Pad a transmitted block to the fixed frame length and append a
    /// clean-CRC trailer, as the hardware would deliver it.
    fn ota_frame(block: &Block, packet_length: u8) -> Vec<u8> {
        let mut frame = block.padded(packet_length as usize).to_vec();
        frame.push(0x40); // RSSI
        frame.push(regs::CRC_OK | 0x10);
        frame
    }

    fn feed_frame(mock: &MockRadio, events: &SyncSender<RadioEvent>, frame: &[u8]) {
        mock.state
            .lock()
            .unwrap()
            .rx_fifo
            .extend(frame.iter().copied());
        events.send(RadioEvent::PacketEdge(true)).unwrap();
        events.send(RadioEvent::PacketEdge(false)).unwrap();
    }

    #[test]
    fn receives_single_block_packet() {
        let mock = MockRadio::default();
        let handle = spawn_radio_worker(mock.clone(), test_config(32));
        let events = handle.event_sender();

        let blocks: Vec<Block> = block::fragment(b"\x00HELLO", 32).collect();
        feed_frame(&mock, &events, &ota_frame(&blocks[0], 32));

        match handle.wait(Duration::from_secs(1)) {
            Some(LinkEvent::PacketReceived(payload)) => assert_eq!(payload, b"\x00HELLO"),
            _ => panic!("expected a received packet"),
        }
    }

    #[test]
    fn reassembles_multi_block_packet() {
        let mock = MockRadio::default();
        let handle = spawn_radio_worker(mock.clone(), test_config(16));
        let events = handle.event_sender();

        let payload: Vec<u8> = (0..40u8).collect();
        let blocks: Vec<Block> = block::fragment(&payload, 16).collect();
        assert_eq!(blocks.len(), 3);
        for block in &blocks {
            feed_frame(&mock, &events, &ota_frame(block, 16));
        }

        match handle.wait(Duration::from_secs(1)) {
            Some(LinkEvent::PacketReceived(received)) => assert_eq!(received, payload),
            _ => panic!("expected a reassembled packet"),
        }
    }

    #[test]
    fn drains_large_frame_in_chunks() {
        let mock = MockRadio::default();
        let handle = spawn_radio_worker(mock.clone(), test_config(200));
        let events = handle.event_sender();

        let payload = vec![0x5Au8; 198];
        let blocks: Vec<Block> = block::fragment(&payload, 200).collect();
        let frame = ota_frame(&blocks[0], 200);

        mock.state
            .lock()
            .unwrap()
            .rx_fifo
            .extend(frame.iter().copied());
        events.send(RadioEvent::PacketEdge(true)).unwrap();
        // frame exceeds the FIFO: two threshold services before the edge
        events.send(RadioEvent::FifoLevel(true)).unwrap();
        events.send(RadioEvent::FifoLevel(true)).unwrap();
        events.send(RadioEvent::PacketEdge(false)).unwrap();

        match handle.wait(Duration::from_secs(1)) {
            Some(LinkEvent::PacketReceived(received)) => assert_eq!(received, payload),
            _ => panic!("expected the chunk-drained packet"),
        }
    }

    #[test]
    fn sequence_gap_drops_packet_and_recovers() {
        let mock = MockRadio::default();
        let handle = spawn_radio_worker(mock.clone(), test_config(16));
        let events = handle.event_sender();

        let payload: Vec<u8> = (0..40u8).collect();
        let blocks: Vec<Block> = block::fragment(&payload, 16).collect();
        // countdown jumps 2 -> 0
        feed_frame(&mock, &events, &ota_frame(&blocks[0], 16));
        feed_frame(&mock, &events, &ota_frame(&blocks[2], 16));
        assert!(handle.wait(Duration::from_millis(200)).is_none());

        // a later single-block packet still goes through
        let single: Vec<Block> = block::fragment(b"\x00OK", 16).collect();
        feed_frame(&mock, &events, &ota_frame(&single[0], 16));
        match handle.wait(Duration::from_secs(1)) {
            Some(LinkEvent::PacketReceived(received)) => assert_eq!(received, b"\x00OK"),
            _ => panic!("expected recovery after the sequence error"),
        }
    }

    #[test]
    fn bad_crc_drops_packet() {
        let mock = MockRadio::default();
        let handle = spawn_radio_worker(mock.clone(), test_config(16));
        let events = handle.event_sender();

        let blocks: Vec<Block> = block::fragment(b"\x00NO", 16).collect();
        let mut frame = blocks[0].padded(16).to_vec();
        frame.push(0x40);
        frame.push(0x10); // CRC_OK clear
        feed_frame(&mock, &events, &frame);
        assert!(handle.wait(Duration::from_millis(200)).is_none());
    }

    #[test]
    fn transmits_fixed_length_block() {
        let mock = MockRadio::default();
        let handle = spawn_radio_worker(mock.clone(), test_config(32));
        let events = handle.event_sender();

        handle
            .send(SendRequest {
                payload: b"\x00HI".to_vec(),
                keyup_delay: Duration::ZERO,
            })
            .unwrap();

        // wait for the worker to key up, then simulate the packet edges
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if mock.state.lock().unwrap().strobes.contains(&regs::STX) {
                break;
            }
            assert!(Instant::now() < deadline, "worker never strobed STX");
            thread::sleep(Duration::from_millis(5));
        }
        events.send(RadioEvent::PacketEdge(true)).unwrap();
        events.send(RadioEvent::PacketEdge(false)).unwrap();

        match handle.wait(Duration::from_secs(1)) {
            Some(LinkEvent::SendComplete) => {}
            _ => panic!("expected send completion"),
        }

        let state = mock.state.lock().unwrap();
        // one fixed-length frame: length byte, countdown 0, payload, padding
        assert_eq!(state.tx_written.len(), 32);
        assert_eq!(&state.tx_written[..5], &[4, 0, 0x00, b'H', b'I']);
        assert!(state.tx_written[5..].iter().all(|b| *b == 0));
        // turnaround re-armed the receiver
        assert!(state.strobes.ends_with(&[regs::SIDLE, regs::SFRX, regs::SRX]));
    }

    #[test]
    fn transmits_multi_block_packet_with_refills() {
        let mock = MockRadio::default();
        let mut config = test_config(100);
        config.variable_length = true;
        let handle = spawn_radio_worker(mock.clone(), config);
        let events = handle.event_sender();

        // two blocks of a 120-byte payload, each larger than the FIFO
        let payload = vec![0xA5u8; 120];
        handle
            .send(SendRequest {
                payload: payload.clone(),
                keyup_delay: Duration::ZERO,
            })
            .unwrap();

        for i in 0..2 {
            let deadline = Instant::now() + Duration::from_secs(1);
            loop {
                let strobes = mock.state.lock().unwrap().strobes.clone();
                if strobes.iter().filter(|s| **s == regs::STX).count() > i {
                    break;
                }
                assert!(Instant::now() < deadline);
                thread::sleep(Duration::from_millis(5));
            }
            // FIFO drained below threshold, then the block ends
            events.send(RadioEvent::FifoLevel(false)).unwrap();
            events.send(RadioEvent::PacketEdge(true)).unwrap();
            events.send(RadioEvent::PacketEdge(false)).unwrap();
        }

        match handle.wait(Duration::from_secs(1)) {
            Some(LinkEvent::SendComplete) => {}
            _ => panic!("expected send completion"),
        }

        let state = mock.state.lock().unwrap();
        // first block: 98 bytes of payload, countdown 1; second: 22, countdown 0
        let expected_first = 2 + 98;
        let expected_second = 2 + 22;
        assert_eq!(state.tx_written.len(), expected_first + expected_second);
        assert_eq!(state.tx_written[0], 99);
        assert_eq!(state.tx_written[1], 1);
        assert_eq!(state.tx_written[expected_first], 23);
        assert_eq!(state.tx_written[expected_first + 1], 0);
    }

    #[test]
    fn send_waits_for_reception_to_finish() {
        let mock = MockRadio::default();
        // slow rate: a long block timeout keeps the reassembly alive across
        // the sleeps below
        let mut config = test_config(16);
        config.rate = crate::config::DataRate::R1200;
        let handle = spawn_radio_worker(mock.clone(), config);
        let events = handle.event_sender();

        // first block of a two-block packet: reassembly now in progress
        let payload: Vec<u8> = (0..20u8).collect();
        let blocks: Vec<Block> = block::fragment(&payload, 16).collect();
        feed_frame(&mock, &events, &ota_frame(&blocks[0], 16));
        thread::sleep(Duration::from_millis(50));

        handle
            .send(SendRequest {
                payload: b"\x00LATER".to_vec(),
                keyup_delay: Duration::ZERO,
            })
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(
            !mock.state.lock().unwrap().strobes.contains(&regs::STX),
            "send must hold off while a packet is mid-reassembly"
        );

        // the chain completes; now the send may go out
        feed_frame(&mock, &events, &ota_frame(&blocks[1], 16));
        match handle.wait(Duration::from_secs(1)) {
            Some(LinkEvent::PacketReceived(received)) => assert_eq!(received, payload),
            _ => panic!("expected the packet first"),
        }
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if mock.state.lock().unwrap().strobes.contains(&regs::STX) {
                break;
            }
            assert!(Instant::now() < deadline, "queued send never started");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

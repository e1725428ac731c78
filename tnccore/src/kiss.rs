use crate::block::MAX_PACKET_LEN;
use log::{debug, warn};

const FEND: u8 = 0xC0;
const FESC: u8 = 0xDB;
const TFEND: u8 = 0xDC;
const TFESC: u8 = 0xDD;

/// Maximum size of a single KISS frame on the serial line.
///
/// The radio side caps a logical packet at 64 KiB. In the (impossible) worst
/// case every body byte is FEND or FESC and doubles under escaping; add the
/// delimiting FEND at each end.
pub const MAX_FRAME_LEN: usize = 2 * MAX_PACKET_LEN + 2;

/// Accumulates raw bytes read from the serial device and hands out one
/// delimited KISS frame at a time.
///
/// Bytes arrive in arbitrary chunks with no relation to frame boundaries, so
/// writing happens via `buf_remaining`/`did_write` and frames are taken out
/// with `next_frame` until it returns `None`. Consecutive frames carry their
/// own delimiters (`FEND body FEND FEND body FEND`); bytes preceding the
/// first FEND are line noise and get discarded.
///
/// At 128 KiB this wants to live in a `Box` on the host side.
pub struct KissBuffer {
    data: [u8; MAX_FRAME_LEN],
    len: usize,
    /// Bytes at the front belonging to the frame returned by the previous
    /// `next_frame` call, reclaimed lazily on the next buffer access.
    consumed: usize,
}

impl KissBuffer {
    pub fn new() -> Self {
        Self {
            data: [0u8; MAX_FRAME_LEN],
            len: 0,
            consumed: 0,
        }
    }

    /// Space into which new serial bytes can be written.
    pub fn buf_remaining(&mut self) -> &mut [u8] {
        self.compact();
        if self.len == self.data.len() {
            // A frame longer than the buffer can never complete.
            warn!("KISS buffer overflowed with no complete frame, discarding");
            self.len = 0;
        }
        &mut self.data[self.len..]
    }

    /// Record how many bytes were just written into `buf_remaining`.
    pub fn did_write(&mut self, n: usize) {
        self.len += n;
    }

    /// True if at least one complete frame is waiting to be taken.
    pub fn has_frame(&self) -> bool {
        let data = &self.data[self.consumed..self.len];
        match data.iter().position(|b| *b == FEND) {
            Some(start) => data[(start + 1)..].contains(&FEND),
            None => false,
        }
    }

    /// Take the next complete frame, delimiters included.
    ///
    /// Returns `None` until a full `FEND ... FEND` span has arrived. The
    /// returned frame borrows the buffer; it is reclaimed on the next call.
    pub fn next_frame(&mut self) -> Option<KissFrame<'_>> {
        self.compact();
        let start = match self.data[..self.len].iter().position(|b| *b == FEND) {
            Some(start) => start,
            None => {
                // nothing framed at all; whatever is here is noise
                if self.len > 0 {
                    debug!("discarding {} unframed bytes from serial", self.len);
                    self.len = 0;
                }
                return None;
            }
        };
        if start > 0 {
            debug!("discarding {start} bytes preceding FEND");
            self.data.copy_within(start..self.len, 0);
            self.len -= start;
        }
        let end = self.data[1..self.len].iter().position(|b| *b == FEND)? + 1;
        self.consumed = end + 1;
        Some(KissFrame {
            data: &self.data[..=end],
        })
    }

    fn compact(&mut self) {
        if self.consumed > 0 {
            self.data.copy_within(self.consumed..self.len, 0);
            self.len -= self.consumed;
            self.consumed = 0;
        }
    }
}

impl Default for KissBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// One delimited KISS frame borrowed out of a `KissBuffer`.
pub struct KissFrame<'a> {
    data: &'a [u8],
}

impl<'a> KissFrame<'a> {
    /// The full frame including both FEND delimiters.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// The bytes between the delimiters, still escaped.
    pub fn body(&self) -> &'a [u8] {
        &self.data[1..self.data.len() - 1]
    }

    /// A frame of two adjacent FENDs carries nothing, not even a header byte.
    pub fn is_empty(&self) -> bool {
        self.body().is_empty()
    }

    /// Remove the delimiters and undo byte-stuffing, yielding the payload
    /// that goes to the radio. The header byte stays in: forwarding it keeps
    /// the serial byte stream bit-exact end to end, port nibble included.
    pub fn unescaped_body(&self, out: &mut [u8]) -> usize {
        unescape(self.body(), out)
    }

    /// This frame's KISS command, taken from the low nibble of the header
    /// byte. The high nibble is the port number, which a single-port TNC
    /// ignores.
    pub fn command(&self) -> Result<KissCommand, KissError> {
        let mut head = [0u8; 2];
        if unescape(self.body(), &mut head) == 0 {
            return Err(KissError::MalformedKissFrame);
        }
        KissCommand::from_proto(head[0] & 0x0f)
    }

    /// Argument byte of a command frame, if present.
    pub fn command_arg(&self) -> Option<u8> {
        let mut head = [0u8; 2];
        if unescape(self.body(), &mut head) >= 2 {
            Some(head[1])
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KissCommand {
    DataFrame,
    TxDelay,
    Persistence,
    SlotTime,
    TxTail,
    HardwareReset,
}

impl KissCommand {
    pub fn from_proto(value: u8) -> Result<Self, KissError> {
        Ok(match value {
            0 => KissCommand::DataFrame,
            1 => KissCommand::TxDelay,
            2 => KissCommand::Persistence,
            3 => KissCommand::SlotTime,
            4 => KissCommand::TxTail,
            15 => KissCommand::HardwareReset,
            _ => return Err(KissError::UnsupportedKissCommand),
        })
    }

    pub fn proto_value(&self) -> u8 {
        match self {
            KissCommand::DataFrame => 0,
            KissCommand::TxDelay => 1,
            KissCommand::Persistence => 2,
            KissCommand::SlotTime => 3,
            KissCommand::TxTail => 4,
            KissCommand::HardwareReset => 15,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum KissError {
    MalformedKissFrame,
    UnsupportedKissCommand,
}

/// Wrap a radio payload back into a delimited KISS frame for the serial side.
///
/// Emits `FEND escape(body) FEND` into `out` and returns the length used.
/// `out` must hold at least `2 * body.len() + 2` bytes.
pub fn frame_body(body: &[u8], out: &mut [u8]) -> usize {
    let mut i = 0;
    out[i] = FEND;
    i += 1;
    i += escape(body, &mut out[i..]);
    out[i] = FEND;
    i + 1
}

fn escape(src: &[u8], dst: &mut [u8]) -> usize {
    let mut i = 0;
    let mut j = 0;
    while i < src.len() && j < dst.len() {
        if src[i] == FEND {
            dst[j] = FESC;
            j += 1;
            dst[j] = TFEND;
        } else if src[i] == FESC {
            dst[j] = FESC;
            j += 1;
            dst[j] = TFESC;
        } else {
            dst[j] = src[i];
        }
        i += 1;
        j += 1;
    }
    j
}

/// Undo KISS byte-stuffing.
///
/// A FESC followed by anything other than TFEND or TFESC drops both bytes,
/// as does a FESC with nothing after it. Hosts never produce such sequences;
/// when one shows up it vanishes silently rather than aborting the frame.
fn unescape(src: &[u8], dst: &mut [u8]) -> usize {
    let mut i = 0;
    let mut j = 0;
    while i < src.len() && j < dst.len() {
        if src[i] == FESC {
            if i == src.len() - 1 {
                break;
            }
            i += 1;
            if src[i] == TFEND {
                dst[j] = FEND;
                j += 1;
            } else if src[i] == TFESC {
                dst[j] = FESC;
                j += 1;
            }
        } else {
            dst[j] = src[i];
            j += 1;
        }
        i += 1;
    }
    j
}

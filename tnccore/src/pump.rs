//! Bookkeeping for moving one frame through the radio's 64-byte FIFO.
//!
//! A frame of up to 257 bytes (data plus status trailer) never fits in the
//! FIFO at once, so the interrupt handlers drain or refill it in chunks. A
//! `Transfer` tracks how far along one frame is and holds the invariant that
//! the byte index plus the bytes remaining always equals the full frame
//! length; any step that would break it is a `FifoAnomaly` and the frame in
//! flight gets dropped rather than silently truncated or overrun.

/// Hardware FIFO depth in each direction.
pub const FIFO_SIZE: usize = 64;

/// Chunked progress of one frame through the FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    total: usize,
    index: usize,
}

impl Transfer {
    pub fn new(total: usize) -> Self {
        Self { total, index: 0 }
    }

    /// Next byte position in the frame buffer.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> usize {
        self.total - self.index
    }

    pub fn is_complete(&self) -> bool {
        self.index == self.total
    }

    /// Account for `n` bytes drained from or loaded into the FIFO.
    pub fn advance(&mut self, n: usize) -> Result<(), FifoAnomaly> {
        if n > self.remaining() {
            return Err(FifoAnomaly::Overrun {
                index: self.index,
                total: self.total,
                attempted: n,
            });
        }
        self.index += n;
        Ok(())
    }

    /// Check that the frame moved in full once the hardware signals
    /// end-of-packet.
    pub fn finish(&self) -> Result<(), FifoAnomaly> {
        if self.index != self.total {
            return Err(FifoAnomaly::Underrun {
                index: self.index,
                total: self.total,
            });
        }
        Ok(())
    }
}

/// Mismatch between the declared frame length and the bytes that actually
/// moved. Recoverable: drop the frame, flush the FIFO, carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoAnomaly {
    /// More bytes offered than the frame has left.
    Overrun {
        index: usize,
        total: usize,
        attempted: usize,
    },
    /// End of packet with bytes still owed.
    Underrun { index: usize, total: usize },
}

/// Running counters mirrored from the interrupt path, for periodic logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub packets_received: u32,
    pub packets_sent: u32,
    pub threshold_hits: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_transfer_preserves_invariant() {
        let mut transfer = Transfer::new(252);
        let mut drained = 0;
        for chunk in [56, 56, 56, 56, 28] {
            transfer.advance(chunk).unwrap();
            drained += chunk;
            assert_eq!(transfer.index(), drained);
            assert_eq!(transfer.index() + transfer.remaining(), 252);
        }
        assert!(transfer.is_complete());
        transfer.finish().unwrap();
    }

    #[test]
    fn overrun_is_detected() {
        let mut transfer = Transfer::new(60);
        transfer.advance(56).unwrap();
        assert_eq!(
            transfer.advance(8),
            Err(FifoAnomaly::Overrun {
                index: 56,
                total: 60,
                attempted: 8
            })
        );
        // the failed step must not move the index
        assert_eq!(transfer.index(), 56);
    }

    #[test]
    fn short_frame_is_an_underrun() {
        let mut transfer = Transfer::new(60);
        transfer.advance(40).unwrap();
        assert_eq!(
            transfer.finish(),
            Err(FifoAnomaly::Underrun {
                index: 40,
                total: 60
            })
        );
    }

    #[test]
    fn whole_frame_in_one_chunk() {
        let mut transfer = Transfer::new(30);
        transfer.advance(30).unwrap();
        transfer.finish().unwrap();
        assert_eq!(transfer.remaining(), 0);
    }
}

//! Transfer session - cursor state for one dump/program/stream command

use crate::clock::Clock;
use crate::error::{Error, Result};

/// Size of one streamed or driver-programmed block
pub const BLOCK_LEN: usize = 256;

/// Progress through an address range
///
/// A session is created per command and dropped when the command ends, so
/// nothing leaks from one transfer into the next.
#[derive(Debug)]
pub struct TransferSession {
    /// Next address to transfer
    pub current: u32,
    /// First address past the range
    pub end: u32,
    /// Scratch space for one block
    pub block: [u8; BLOCK_LEN],
    started_us: u64,
}

impl TransferSession {
    /// Start a session over `start..end`
    pub fn new<C: Clock + ?Sized>(clock: &C, start: u32, end: u32) -> Result<Self> {
        if start > end {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(Self {
            current: start,
            end,
            block: [0; BLOCK_LEN],
            started_us: clock.now_us(),
        })
    }

    /// Bytes left in the range
    pub fn remaining(&self) -> u32 {
        self.end.saturating_sub(self.current)
    }

    /// Whether the cursor reached the end of the range
    pub fn is_done(&self) -> bool {
        self.current >= self.end
    }

    /// Length of the next block, at most `max`
    pub fn next_len(&self, max: usize) -> usize {
        (self.remaining() as usize).min(max)
    }

    /// Move the cursor forward
    pub fn advance(&mut self, n: u32) {
        self.current = self.current.saturating_add(n);
    }

    /// Completed share of `total` bytes in percent
    pub fn percent(&self, total: u32) -> u32 {
        if total == 0 {
            return 100;
        }
        ((self.current as u64 * 100) / total as u64) as u32
    }

    /// Milliseconds since the session started
    pub fn elapsed_ms<C: Clock + ?Sized>(&self, clock: &C) -> u64 {
        clock.now_us().saturating_sub(self.started_us) / 1000
    }
}

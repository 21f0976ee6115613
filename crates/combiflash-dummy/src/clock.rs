//! Simulated time for driving the polling loops in tests

use core::sync::atomic::{AtomicU64, Ordering};

use combiflash_core::clock::Clock;

/// Clock that only moves when it is read or asked to wait
///
/// Every [`Clock::now_us`] call advances time by the configured step, so
/// busy-poll loops make progress towards their deadline without sleeping.
/// Delays advance time by exactly the requested amount.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    step: u64,
}

impl ManualClock {
    /// Clock advancing 1 us per read
    pub fn new() -> Self {
        Self::with_step(1)
    }

    /// Clock advancing `step_us` per read
    pub fn with_step(step_us: u64) -> Self {
        Self {
            now: AtomicU64::new(0),
            step: step_us,
        }
    }

    /// Move time forward
    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::Relaxed);
    }

    /// Current time without advancing
    pub fn peek_us(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::Relaxed) + self.step
    }

    fn delay_us(&self, us: u32) {
        self.advance(us as u64);
    }

    fn delay_ms(&self, ms: u32) {
        self.advance(ms as u64 * 1000);
    }
}

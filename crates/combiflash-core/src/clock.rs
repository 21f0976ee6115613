//! Monotonic time source for the polling loops
//!
//! Every hardware wait in this crate is a busy-poll bounded by a
//! [`Deadline`]. The time source is injected so the algorithms can be
//! driven by a simulated clock in tests.

/// Monotonic microsecond clock
pub trait Clock {
    /// Microseconds since an arbitrary fixed origin
    fn now_us(&self) -> u64;

    /// Busy-wait or sleep for at least `us` microseconds
    fn delay_us(&self, us: u32);

    /// Sleep for at least `ms` milliseconds
    fn delay_ms(&self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1000);
        }
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }

    fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// A point in time after which a polling loop gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started_us: u64,
    expires_us: u64,
}

impl Deadline {
    /// Deadline `us` microseconds from now
    pub fn after_us<C: Clock + ?Sized>(clock: &C, us: u64) -> Self {
        let now = clock.now_us();
        Self {
            started_us: now,
            expires_us: now.saturating_add(us),
        }
    }

    /// Deadline `ms` milliseconds from now
    pub fn after_ms<C: Clock + ?Sized>(clock: &C, ms: u64) -> Self {
        Self::after_us(clock, ms.saturating_mul(1000))
    }

    /// Deadline `s` seconds from now
    pub fn after_secs<C: Clock + ?Sized>(clock: &C, s: u64) -> Self {
        Self::after_us(clock, s.saturating_mul(1_000_000))
    }

    /// Check whether the deadline has passed
    pub fn expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        clock.now_us() > self.expires_us
    }

    /// Microseconds elapsed since the deadline was created
    pub fn elapsed_us<C: Clock + ?Sized>(&self, clock: &C) -> u64 {
        clock.now_us().saturating_sub(self.started_us)
    }
}

/// Clock backed by [`std::time::Instant`]
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn delay_us(&self, us: u32) {
        // Sleep granularity is too coarse for the BDM debounce waits
        if us < 1000 {
            let until = std::time::Instant::now() + std::time::Duration::from_micros(us as u64);
            while std::time::Instant::now() < until {
                core::hint::spin_loop();
            }
        } else {
            std::thread::sleep(std::time::Duration::from_micros(us as u64));
        }
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct StepClock(Cell<u64>);

    impl Clock for StepClock {
        fn now_us(&self) -> u64 {
            self.0.get()
        }

        fn delay_us(&self, us: u32) {
            self.0.set(self.0.get() + us as u64);
        }
    }

    #[test]
    fn test_deadline_expires_after_interval() {
        let clock = StepClock(Cell::new(100));
        let deadline = Deadline::after_us(&clock, 500);
        assert!(!deadline.expired(&clock));
        clock.delay_us(500);
        assert!(!deadline.expired(&clock));
        clock.delay_us(1);
        assert!(deadline.expired(&clock));
        assert_eq!(deadline.elapsed_us(&clock), 501);
    }

    #[test]
    fn test_delay_ms_uses_microsecond_steps() {
        let clock = StepClock(Cell::new(0));
        clock.delay_ms(10);
        assert_eq!(clock.now_us(), 10_000);
    }
}

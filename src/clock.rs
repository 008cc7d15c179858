//! Microsecond clocks for throughput accounting.
//!
//! Timestamps are 32-bit microsecond counters that wrap roughly every 71
//! minutes. Elapsed time is always computed with [`elapsed_micros`], which
//! uses modular subtraction so a single wrap between two samples is harmless.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic microsecond timestamps.
pub trait Clock {
    /// Current time in microseconds, wrapping at `u32::MAX`.
    fn now_micros(&self) -> u32;
}

/// Microseconds elapsed from `earlier` to `later`, tolerant of one wrap.
pub fn elapsed_micros(later: u32, earlier: u32) -> u32 {
    later.wrapping_sub(earlier)
}

/// Wall-independent clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_micros(&self) -> u32 {
        // Truncation is the wrap.
        self.origin.elapsed().as_micros() as u32
    }
}

/// Manually advanced clock.
///
/// Clones share the same counter, so a test can hand one copy to a
/// [`Stats`](crate::stats::Stats) and keep another to move time forward.
///
/// # Examples
///
/// ```
/// use edgeperf3::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(0);
/// let handle = clock.clone();
/// handle.advance(1_500);
/// assert_eq!(clock.now_micros(), 1_500);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start_micros: u32) -> Self {
        Self {
            micros: Arc::new(AtomicU32::new(start_micros)),
        }
    }

    /// Moves the clock forward, wrapping like the hardware counter does.
    pub fn advance(&self, micros: u32) {
        let current = self.micros.load(Ordering::SeqCst);
        self.micros
            .store(current.wrapping_add(micros), Ordering::SeqCst);
    }

    pub fn set(&self, micros: u32) {
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u32 {
        self.micros.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_without_wrap() {
        assert_eq!(elapsed_micros(1_000_000, 250_000), 750_000);
    }

    #[test]
    fn test_elapsed_across_wrap() {
        let earlier = u32::MAX - 99;
        let later = 400;
        assert_eq!(elapsed_micros(later, earlier), 500);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(10);
        let other = clock.clone();
        other.advance(90);
        assert_eq!(clock.now_micros(), 100);

        clock.set(u32::MAX);
        other.advance(2);
        assert_eq!(clock.now_micros(), 1);
    }

    #[test]
    fn test_monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let first = clock.now_micros();
        let second = clock.now_micros();
        assert!(elapsed_micros(second, first) < 1_000_000);
    }
}

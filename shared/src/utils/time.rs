//! Timestamp sources
//!
//! Meters never read a clock directly; they ask a `TimestampSource`, which
//! also knows how to turn its ticks into nanoseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Timestamp in a source-defined monotonic unit
pub type Tick = u64;

/// Abstraction over "now" for CPU meters
pub trait TimestampSource: Send + Sync {
    /// Current timestamp
    fn now(&self) -> Tick;

    /// Convert a tick delta to nanoseconds
    fn ticks_to_nanos(&self, ticks: Tick) -> u64 {
        ticks
    }
}

impl<T: TimestampSource + ?Sized> TimestampSource for Arc<T> {
    fn now(&self) -> Tick {
        (**self).now()
    }

    fn ticks_to_nanos(&self, ticks: Tick) -> u64 {
        (**self).ticks_to_nanos(ticks)
    }
}

/// Monotonic wall clock, ticks are nanoseconds since construction
#[derive(Debug, Clone, Copy)]
pub struct CpuClock {
    origin: Instant,
}

impl CpuClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for CpuClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampSource for CpuClock {
    fn now(&self) -> Tick {
        self.origin.elapsed().as_nanos() as Tick
    }
}

/// Clock that only moves when told to, ticks are nanoseconds
///
/// Clones share the same counter, so a test can keep one handle while the
/// center reads through another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, nanos: u64) {
        self.now.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Move the clock forward by whole milliseconds
    pub fn advance_ms(&self, millis: u64) {
        self.advance(millis * 1_000_000);
    }

    /// Jump to an absolute timestamp
    pub fn set(&self, nanos: u64) {
        self.now.store(nanos, Ordering::Relaxed);
    }
}

impl TimestampSource for ManualClock {
    fn now(&self) -> Tick {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_clock_is_monotonic() {
        let clock = CpuClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let reader = clock.clone();
        clock.advance_ms(2);
        assert_eq!(reader.now(), 2_000_000);
        clock.set(5);
        assert_eq!(reader.now(), 5);
    }

    #[test]
    fn test_default_conversion_is_identity() {
        let clock = ManualClock::new();
        assert_eq!(clock.ticks_to_nanos(1234), 1234);
    }
}

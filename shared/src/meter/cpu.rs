//! CPU-timed meters

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::{CompletedFrame, Cursor, Meter, Track};
use crate::types::section::Color;
use crate::utils::time::{Tick, TimestampSource};

/// A meter whose sections are timed by a CPU clock
///
/// `begin_measure` / `end_measure` read the clock synchronously on the
/// calling thread and are O(1).
#[derive(Clone)]
pub struct CpuMeter {
    meter: Meter,
    clock: Arc<dyn TimestampSource>,
}

impl CpuMeter {
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        buffer_count: usize,
        clock: Arc<dyn TimestampSource>,
    ) -> Self {
        Self {
            meter: Meter::new(name, capacity, buffer_count),
            clock,
        }
    }

    /// Open a section at the current time
    pub fn begin_measure(&mut self, name: Option<&'static str>, tag: u32) {
        if self.meter.is_enabled() {
            let now = self.clock.now();
            self.meter.begin(name, tag, Some(now));
        }
    }

    /// Close the most recently opened section at the current time
    pub fn end_measure(&mut self) {
        if self.meter.is_enabled() {
            let now = self.clock.now();
            self.meter.end(Some(now));
        }
    }

    /// Measure until the returned guard is dropped
    pub fn scope(&mut self, name: Option<&'static str>, tag: u32) -> ScopedMeasure<'_> {
        self.begin_measure(name, tag);
        ScopedMeasure { meter: self }
    }

    pub fn set_color(&mut self, color: Color) {
        self.meter.set_color(color);
    }

    /// Retire the active slot
    pub fn next(&mut self) {
        self.meter.next();
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn meter_mut(&mut self) -> &mut Meter {
        &mut self.meter
    }

    pub fn clock(&self) -> &Arc<dyn TimestampSource> {
        &self.clock
    }
}

impl std::fmt::Debug for CpuMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuMeter").field("meter", &self.meter).finish_non_exhaustive()
    }
}

impl Track for CpuMeter {
    fn name(&self) -> &str {
        self.meter.name()
    }

    fn completed(&self) -> Option<CompletedFrame<'_>> {
        let slot = self.meter.last_completed()?;
        Some(CompletedFrame {
            frame: slot.frame()?,
            sections: slot.sections(),
        })
    }

    fn ticks_to_nanos(&self, ticks: Tick) -> u64 {
        self.clock.ticks_to_nanos(ticks)
    }

    fn cursor(&self) -> Cursor {
        self.meter.cursor()
    }
}

/// RAII guard ending a CPU section on drop
///
/// Dereferences to the meter, so nested scopes can be opened through it.
pub struct ScopedMeasure<'a> {
    meter: &'a mut CpuMeter,
}

impl Deref for ScopedMeasure<'_> {
    type Target = CpuMeter;

    fn deref(&self) -> &CpuMeter {
        &*self.meter
    }
}

impl DerefMut for ScopedMeasure<'_> {
    fn deref_mut(&mut self) -> &mut CpuMeter {
        &mut *self.meter
    }
}

impl Drop for ScopedMeasure<'_> {
    fn drop(&mut self) {
        self.meter.end_measure();
    }
}

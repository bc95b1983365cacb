//! The whole-frame meter

use std::sync::Arc;
use std::time::Duration;

use super::{CompletedFrame, CpuMeter, Cursor, Meter, Track};
use crate::types::section::Color;
use crate::utils::time::{Tick, TimestampSource};

/// Name of the frame meter and of the section it records
pub const FRAME_METER_NAME: &str = "Frame";

/// A CPU meter recording exactly one section per frame
///
/// Other meters are attached to it only for display grouping; for
/// aggregation it is one more CPU track.
#[derive(Debug, Clone)]
pub struct FrameMeter {
    inner: CpuMeter,
}

impl FrameMeter {
    pub fn new(buffer_count: usize, clock: Arc<dyn TimestampSource>) -> Self {
        Self {
            inner: CpuMeter::new(FRAME_METER_NAME, 1, buffer_count, clock),
        }
    }

    pub fn begin_frame(&mut self) {
        self.inner.begin_measure(Some(FRAME_METER_NAME), 0);
    }

    pub fn end_frame(&mut self) {
        self.inner.end_measure();
    }

    pub fn set_color(&mut self, color: Color) {
        self.inner.set_color(color);
    }

    pub fn next(&mut self) {
        self.inner.next();
    }

    /// Duration of the most recently completed frame
    pub fn last_frame_time(&self) -> Option<Duration> {
        let completed = self.inner.completed()?;
        let ticks = completed.sections.first()?.elapsed()?;
        Some(Duration::from_nanos(self.inner.ticks_to_nanos(ticks)))
    }

    pub fn meter(&self) -> &Meter {
        self.inner.meter()
    }

    pub fn meter_mut(&mut self) -> &mut Meter {
        self.inner.meter_mut()
    }
}

impl Track for FrameMeter {
    fn name(&self) -> &str {
        Track::name(&self.inner)
    }

    fn completed(&self) -> Option<CompletedFrame<'_>> {
        self.inner.completed()
    }

    fn ticks_to_nanos(&self, ticks: Tick) -> u64 {
        self.inner.ticks_to_nanos(ticks)
    }

    fn cursor(&self) -> Cursor {
        self.inner.cursor()
    }
}

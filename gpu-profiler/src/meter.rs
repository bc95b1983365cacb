//! GPU meter
//!
//! Sections are opened and closed by writing timestamp queries into the
//! caller's command buffer. Query `2 * (slot * capacity + section)` holds the
//! begin timestamp and the following query the end timestamp.
//!
//! At every `next()` the meter reads back whatever results the GPU has
//! produced for retired slots and exposes the oldest not-yet-exposed frame
//! once all of its closed sections are resolved. Until then the previously
//! exposed frame stays readable, so a frame the GPU has not finished is
//! simply not visible until a later rotation.

use loadmeter_shared::meter::{CompletedFrame, Cursor, Meter, Track};
use loadmeter_shared::{Color, Tick};
use tracing::{debug, warn};

use crate::{
    GpuCommandBuffer, GpuDevice, GpuError, QueryIndex, QueryPoolLayout, TimestampQueryPool,
};

/// Name given to the GPU meter
pub const GPU_METER_NAME: &str = "GPU";

const QUERIES_PER_SECTION: usize = 2;
const QUERY_RESULT_SIZE: usize = std::mem::size_of::<u64>();

/// GPU-specific diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuMeterStats {
    /// Closed sections whose slot was reused before their results arrived
    pub discarded_pending: u64,
}

/// A meter timed by GPU timestamp queries
pub struct GpuMeter {
    meter: Meter,
    pool: Box<dyn TimestampQueryPool>,
    /// Per slot, per section: end query was written
    closed: Vec<Vec<bool>>,
    /// Retired slot currently exposed for aggregation
    readable: Option<usize>,
    /// Frame number of the last slot exposed
    exposed_frame: Option<u64>,
    stats: GpuMeterStats,
}

impl GpuMeter {
    /// Number of queries a meter with this shape uses, or `None` when it
    /// does not fit a query index
    pub fn query_count(capacity: usize, buffer_count: usize) -> Option<u32> {
        let buffer_count = buffer_count.max(loadmeter_shared::meter::MIN_BUFFER_COUNT);
        let count = capacity
            .checked_mul(buffer_count)?
            .checked_mul(QUERIES_PER_SECTION)?;
        u32::try_from(count).ok()
    }

    /// Bytes of query result memory a meter with this shape needs
    pub fn calculate_memory_pool_size(capacity: usize, buffer_count: usize) -> usize {
        capacity
            .saturating_mul(buffer_count.max(loadmeter_shared::meter::MIN_BUFFER_COUNT))
            .saturating_mul(QUERIES_PER_SECTION * QUERY_RESULT_SIZE)
    }

    /// Alignment of query result memory on this device
    pub fn memory_pool_alignment(device: &dyn GpuDevice) -> usize {
        device
            .memory_pool_alignment()
            .max(std::mem::align_of::<u64>())
    }

    /// Allocate the meter's query pool on `device`
    pub fn new(
        capacity: usize,
        buffer_count: usize,
        device: &mut dyn GpuDevice,
    ) -> Result<Self, GpuError> {
        let query_count =
            Self::query_count(capacity, buffer_count).ok_or(GpuError::TooManyQueries {
                capacity,
                buffer_count,
            })?;
        let layout = QueryPoolLayout {
            query_count,
            size: Self::calculate_memory_pool_size(capacity, buffer_count),
            alignment: Self::memory_pool_alignment(device),
        };
        let pool = device.create_query_pool(&layout)?;
        if pool.query_count() < layout.query_count {
            let provided = pool.query_count();
            device.destroy_query_pool(pool);
            return Err(GpuError::QueryCountMismatch {
                required: layout.query_count,
                provided,
            });
        }

        let meter = Meter::new(GPU_METER_NAME, capacity, buffer_count);
        let closed = vec![vec![false; capacity]; meter.buffer_count()];
        debug!(
            "GPU meter created: {} queries, {} bytes",
            layout.query_count, layout.size
        );

        Ok(Self {
            meter,
            pool,
            closed,
            readable: None,
            exposed_frame: None,
            stats: GpuMeterStats::default(),
        })
    }

    /// Return the query pool to the device that created it
    pub fn destroy(self, device: &mut dyn GpuDevice) {
        device.destroy_query_pool(self.pool);
    }

    fn query(&self, slot: usize, section: usize, end: bool) -> QueryIndex {
        ((slot * self.meter.capacity() + section) * QUERIES_PER_SECTION + end as usize)
            as QueryIndex
    }

    /// Open a section by writing a begin timestamp into `cmd`
    pub fn begin_measure(
        &mut self,
        cmd: &mut dyn GpuCommandBuffer,
        name: Option<&'static str>,
        tag: u32,
    ) {
        let slot = self.meter.active_index();
        if let Some(index) = self.meter.begin(name, tag, None) {
            cmd.write_timestamp(self.pool.handle(), self.query(slot, index, false));
        }
    }

    /// Close the innermost open section by writing an end timestamp into `cmd`
    pub fn end_measure(&mut self, cmd: &mut dyn GpuCommandBuffer) {
        let slot = self.meter.active_index();
        if let Some(index) = self.meter.end(None) {
            cmd.write_timestamp(self.pool.handle(), self.query(slot, index, true));
            self.closed[slot][index] = true;
        }
    }

    pub fn set_color(&mut self, color: Color) {
        self.meter.set_color(color);
    }

    /// Retire the active slot and pick up any newly available results
    pub fn next(&mut self) {
        let n = self.meter.buffer_count();
        let upcoming = (self.meter.active_index() + 1) % n;
        self.recycle(upcoming);

        self.meter.next();
        self.resolve();
    }

    /// Forget everything in a slot that is about to be written again
    fn recycle(&mut self, slot: usize) {
        let pending = self
            .meter
            .slot(slot)
            .sections()
            .iter()
            .zip(&self.closed[slot])
            .filter(|(section, &closed)| closed && !section.is_resolved())
            .count() as u64;
        if pending > 0 {
            self.stats.discarded_pending += pending;
            warn!(
                "GPU meter: {} section(s) of frame {:?} never resolved, discarding",
                pending,
                self.meter.slot(slot).frame()
            );
        }

        if self.readable == Some(slot) {
            self.readable = None;
        }
        self.closed[slot].fill(false);

        let first = self.query(slot, 0, false);
        let last = self.query(slot, self.meter.capacity(), false);
        self.pool.reset(first..last);
    }

    fn resolve(&mut self) {
        let retired: Vec<usize> = self.meter.history_indices().collect();
        for &slot in &retired {
            self.read_back(slot);
        }

        // Frames are exposed in order, one per rotation, so accumulated
        // aggregates never skip a frame that resolved late.
        let candidate = retired
            .into_iter()
            .filter_map(|slot| Some((self.meter.slot(slot).frame()?, slot)))
            .filter(|&(frame, _)| self.exposed_frame.map_or(true, |exposed| frame > exposed))
            .min();
        if let Some((frame, slot)) = candidate {
            if self.is_complete(slot) {
                self.readable = Some(slot);
                self.exposed_frame = Some(frame);
            }
        }
    }

    fn read_back(&mut self, slot: usize) {
        let count = self.meter.slot(slot).sections().len();
        for index in 0..count {
            if !self.closed[slot][index] {
                continue;
            }
            let begin_query = self.query(slot, index, false);
            let end_query = self.query(slot, index, true);
            let section = &mut self.meter.slot_mut(slot).sections_mut()[index];
            if section.is_resolved() {
                continue;
            }
            section.begin = section.begin.or_else(|| self.pool.read(begin_query));
            section.end = section.end.or_else(|| self.pool.read(end_query));
        }
    }

    /// Every closed section in the slot has both timestamps
    fn is_complete(&self, slot: usize) -> bool {
        self.meter
            .slot(slot)
            .sections()
            .iter()
            .zip(&self.closed[slot])
            .all(|(section, &closed)| !closed || section.is_resolved())
    }

    /// Closed sections across retired slots still waiting for results
    pub fn pending_count(&self) -> usize {
        self.meter
            .history_indices()
            .map(|slot| {
                self.meter
                    .slot(slot)
                    .sections()
                    .iter()
                    .zip(&self.closed[slot])
                    .filter(|(section, &closed)| closed && !section.is_resolved())
                    .count()
            })
            .sum()
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn meter_mut(&mut self) -> &mut Meter {
        &mut self.meter
    }

    pub fn stats(&self) -> GpuMeterStats {
        self.stats
    }
}

impl std::fmt::Debug for GpuMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuMeter")
            .field("meter", &self.meter)
            .field("pool", &self.pool.handle())
            .field("readable", &self.readable)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Track for GpuMeter {
    fn name(&self) -> &str {
        self.meter.name()
    }

    fn completed(&self) -> Option<CompletedFrame<'_>> {
        let slot = self.meter.slot(self.readable?);
        Some(CompletedFrame {
            frame: slot.frame()?,
            sections: slot.sections(),
        })
    }

    fn ticks_to_nanos(&self, ticks: Tick) -> u64 {
        self.pool.ticks_to_nanos(ticks)
    }

    fn cursor(&self) -> Cursor {
        self.meter.cursor()
    }
}

//! Host-side simulated GPU
//!
//! Implements the device, query pool and command buffer seams without any
//! graphics API. Command buffers record timestamp writes and simulated work;
//! nothing is executed until `execute_submitted()`, which lets callers
//! reproduce arbitrary GPU latency deterministically.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use loadmeter_shared::{Tick, TimestampSource};
use tracing::debug;

use crate::{
    GpuCommandBuffer, GpuDevice, GpuError, PoolHandle, QueryIndex, QueryPoolLayout,
    TimestampQueryPool,
};

const DEFAULT_ALIGNMENT: usize = 256;

#[derive(Debug, Default)]
struct SimState {
    pools: HashMap<PoolHandle, Vec<Option<Tick>>>,
    next_handle: u64,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Timestamp(PoolHandle, QueryIndex),
    Work(Duration),
}

/// Recorded commands waiting for submission
#[derive(Debug, Default)]
pub struct SimCommandBuffer {
    commands: Vec<Command>,
}

impl SimCommandBuffer {
    /// Simulated GPU work between timestamps
    pub fn work(&mut self, duration: Duration) {
        self.commands.push(Command::Work(duration));
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl GpuCommandBuffer for SimCommandBuffer {
    fn write_timestamp(&mut self, pool: PoolHandle, query: QueryIndex) {
        self.commands.push(Command::Timestamp(pool, query));
    }
}

/// Query pool backed by shared simulator state
#[derive(Debug)]
pub struct SimQueryPool {
    handle: PoolHandle,
    query_count: u32,
    nanos_per_tick: u64,
    state: Arc<Mutex<SimState>>,
}

impl TimestampQueryPool for SimQueryPool {
    fn handle(&self) -> PoolHandle {
        self.handle
    }

    fn query_count(&self) -> u32 {
        self.query_count
    }

    fn reset(&mut self, queries: Range<QueryIndex>) {
        let mut state = lock(&self.state);
        if let Some(results) = state.pools.get_mut(&self.handle) {
            let end = (queries.end as usize).min(results.len());
            let start = (queries.start as usize).min(end);
            results[start..end].fill(None);
        }
    }

    fn read(&self, query: QueryIndex) -> Option<Tick> {
        let state = lock(&self.state);
        state.pools.get(&self.handle)?.get(query as usize).copied().flatten()
    }

    fn ticks_to_nanos(&self, ticks: Tick) -> u64 {
        ticks.saturating_mul(self.nanos_per_tick)
    }
}

/// A GPU that runs submitted command buffers on demand
pub struct SimulatedGpu {
    clock: Arc<dyn TimestampSource>,
    state: Arc<Mutex<SimState>>,
    submitted: VecDeque<SimCommandBuffer>,
    /// GPU timeline in nanoseconds, never behind the host clock
    cursor_ns: u64,
    nanos_per_tick: u64,
    alignment: usize,
}

impl SimulatedGpu {
    /// Simulated GPU whose timeline starts at the host clock
    pub fn new(clock: Arc<dyn TimestampSource>) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(SimState::default())),
            submitted: VecDeque::new(),
            cursor_ns: 0,
            nanos_per_tick: 1,
            alignment: DEFAULT_ALIGNMENT,
        }
    }

    /// Device tick period (timestamps are reported in these units)
    pub fn with_tick_period(mut self, nanos_per_tick: u64) -> Self {
        self.nanos_per_tick = nanos_per_tick.max(1);
        self
    }

    /// Alignment reported for query result memory
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn command_buffer(&self) -> SimCommandBuffer {
        SimCommandBuffer::default()
    }

    /// Queue a command buffer; it runs on the next `execute_submitted()`
    pub fn submit(&mut self, cmd: SimCommandBuffer) {
        self.submitted.push_back(cmd);
    }

    /// Number of command buffers waiting to run
    pub fn queued(&self) -> usize {
        self.submitted.len()
    }

    /// Run every queued command buffer in submission order
    pub fn execute_submitted(&mut self) {
        self.cursor_ns = self.cursor_ns.max(self.clock.now());
        let mut state = lock(&self.state);
        while let Some(cmd) = self.submitted.pop_front() {
            for command in cmd.commands {
                match command {
                    Command::Work(duration) => {
                        self.cursor_ns += duration.as_nanos() as u64;
                    }
                    Command::Timestamp(handle, query) => {
                        let ticks = self.cursor_ns / self.nanos_per_tick;
                        if let Some(slot) = state
                            .pools
                            .get_mut(&handle)
                            .and_then(|results| results.get_mut(query as usize))
                        {
                            *slot = Some(ticks);
                        }
                    }
                }
            }
        }
    }

    /// Pools created and not yet destroyed
    pub fn live_pools(&self) -> usize {
        lock(&self.state).pools.len()
    }
}

impl GpuDevice for SimulatedGpu {
    fn memory_pool_alignment(&self) -> usize {
        self.alignment
    }

    fn create_query_pool(
        &mut self,
        layout: &QueryPoolLayout,
    ) -> Result<Box<dyn TimestampQueryPool>, GpuError> {
        if !layout.alignment.is_power_of_two() {
            return Err(GpuError::BadAlignment(layout.alignment));
        }
        let required = layout.query_count as usize * std::mem::size_of::<u64>();
        if layout.size < required {
            return Err(GpuError::MemoryPoolTooSmall {
                required,
                provided: layout.size,
            });
        }

        let mut state = lock(&self.state);
        let handle = PoolHandle(state.next_handle);
        state.next_handle += 1;
        state
            .pools
            .insert(handle, vec![None; layout.query_count as usize]);
        debug!("Simulated GPU: created query pool {:?}", handle);

        Ok(Box::new(SimQueryPool {
            handle,
            query_count: layout.query_count,
            nanos_per_tick: self.nanos_per_tick,
            state: Arc::clone(&self.state),
        }))
    }

    fn destroy_query_pool(&mut self, pool: Box<dyn TimestampQueryPool>) {
        lock(&self.state).pools.remove(&pool.handle());
        debug!("Simulated GPU: destroyed query pool {:?}", pool.handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadmeter_shared::ManualClock;

    fn layout(query_count: u32) -> QueryPoolLayout {
        QueryPoolLayout {
            query_count,
            size: query_count as usize * 8,
            alignment: 8,
        }
    }

    #[test]
    fn test_timestamps_written_on_execute() {
        let clock = ManualClock::new();
        clock.advance_ms(1);
        let mut gpu = SimulatedGpu::new(Arc::new(clock.clone()));
        let pool = gpu.create_query_pool(&layout(4)).unwrap();

        let mut cmd = gpu.command_buffer();
        cmd.write_timestamp(pool.handle(), 0);
        cmd.work(Duration::from_micros(50));
        cmd.write_timestamp(pool.handle(), 1);
        gpu.submit(cmd);
        assert_eq!(pool.read(0), None);

        gpu.execute_submitted();
        assert_eq!(pool.read(0), Some(1_000_000));
        assert_eq!(pool.read(1), Some(1_050_000));
        assert_eq!(gpu.queued(), 0);
    }

    #[test]
    fn test_tick_period_conversion() {
        let clock = ManualClock::new();
        let mut gpu = SimulatedGpu::new(Arc::new(clock)).with_tick_period(10);
        let pool = gpu.create_query_pool(&layout(2)).unwrap();

        let mut cmd = gpu.command_buffer();
        cmd.write_timestamp(pool.handle(), 0);
        cmd.work(Duration::from_nanos(1000));
        cmd.write_timestamp(pool.handle(), 1);
        gpu.submit(cmd);
        gpu.execute_submitted();

        let ticks = pool.read(1).unwrap() - pool.read(0).unwrap();
        assert_eq!(ticks, 100);
        assert_eq!(pool.ticks_to_nanos(ticks), 1000);
    }

    #[test]
    fn test_reset_clears_results() {
        let clock = ManualClock::new();
        let mut gpu = SimulatedGpu::new(Arc::new(clock));
        let mut pool = gpu.create_query_pool(&layout(4)).unwrap();

        let mut cmd = gpu.command_buffer();
        for query in 0..4 {
            cmd.write_timestamp(pool.handle(), query);
        }
        gpu.submit(cmd);
        gpu.execute_submitted();

        pool.reset(0..2);
        assert_eq!(pool.read(0), None);
        assert_eq!(pool.read(1), None);
        assert!(pool.read(2).is_some());
    }

    #[test]
    fn test_rejects_small_memory() {
        let clock = ManualClock::new();
        let mut gpu = SimulatedGpu::new(Arc::new(clock));
        let err = gpu
            .create_query_pool(&QueryPoolLayout {
                query_count: 4,
                size: 16,
                alignment: 8,
            })
            .unwrap_err();
        assert!(matches!(err, GpuError::MemoryPoolTooSmall { required: 32, .. }));
    }

    #[test]
    fn test_rejects_bad_alignment() {
        let clock = ManualClock::new();
        let mut gpu = SimulatedGpu::new(Arc::new(clock));
        let err = gpu
            .create_query_pool(&QueryPoolLayout {
                query_count: 1,
                size: 8,
                alignment: 12,
            })
            .unwrap_err();
        assert!(matches!(err, GpuError::BadAlignment(12)));
    }
}

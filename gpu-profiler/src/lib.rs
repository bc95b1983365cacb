//! GPU timestamp-query meters
//!
//! The GPU track records sections by inserting timestamp-query commands into
//! host command buffers. Results come back asynchronously, some frames
//! later, through a query pool owned by the host's device.

pub mod meter;
pub mod simulated;

pub use meter::{GpuMeter, GpuMeterStats};
pub use simulated::{SimCommandBuffer, SimulatedGpu};

use loadmeter_shared::Tick;
use std::ops::Range;

/// Index of a query inside a pool
pub type QueryIndex = u32;

/// Opaque identifier of a query pool, handed to command buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle(pub u64);

/// GPU-side errors
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("query pool memory too small: {required} bytes required, {provided} provided")]
    MemoryPoolTooSmall { required: usize, provided: usize },

    #[error("query pool alignment {0} is not a power of two")]
    BadAlignment(usize),

    #[error("device returned a pool with {provided} queries, {required} required")]
    QueryCountMismatch { required: u32, provided: u32 },

    #[error("{capacity} sections over {buffer_count} buffers exceed the query index range")]
    TooManyQueries { capacity: usize, buffer_count: usize },

    #[error("query pool creation failed: {0}")]
    PoolCreation(String),
}

/// Shape of the query pool a GPU meter needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPoolLayout {
    /// Number of timestamp queries
    pub query_count: u32,

    /// Bytes of result memory
    pub size: usize,

    /// Required alignment of result memory
    pub alignment: usize,
}

/// Host device able to allocate timestamp query pools
pub trait GpuDevice {
    /// Alignment the device requires for query result memory
    fn memory_pool_alignment(&self) -> usize;

    /// Allocate a pool matching `layout`
    fn create_query_pool(
        &mut self,
        layout: &QueryPoolLayout,
    ) -> Result<Box<dyn TimestampQueryPool>, GpuError>;

    /// Release a pool created by this device
    fn destroy_query_pool(&mut self, pool: Box<dyn TimestampQueryPool>);
}

/// Timestamp query results, written by the GPU and read back by the host
pub trait TimestampQueryPool: Send + std::fmt::Debug {
    fn handle(&self) -> PoolHandle;

    fn query_count(&self) -> u32;

    /// Make the given queries unavailable again before reuse
    fn reset(&mut self, queries: Range<QueryIndex>);

    /// Result of a query, `None` until the GPU has executed it
    fn read(&self, query: QueryIndex) -> Option<Tick>;

    /// Convert device ticks to nanoseconds
    fn ticks_to_nanos(&self, ticks: Tick) -> u64;
}

/// Command buffer accepting timestamp-query commands
pub trait GpuCommandBuffer {
    /// Record a command that writes the GPU timestamp into `query` when executed
    fn write_timestamp(&mut self, pool: PoolHandle, query: QueryIndex);
}

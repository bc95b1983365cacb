//! Shared types and meters for LoadMeter
//!
//! This crate contains the recording primitives (sections, meters, timestamp
//! sources) used by the GPU track and by the load meter center.

pub mod meter;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use meter::{CpuMeter, Cursor, FrameMeter, Meter, MeterStats, Track};
pub use types::{profile::*, section::*};
pub use utils::time::{CpuClock, ManualClock, Tick, TimestampSource};

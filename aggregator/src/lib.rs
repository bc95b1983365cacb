//! LoadMeter center library
//!
//! Frame-synchronized aggregation of CPU and GPU section timings. Hosts
//! build a `LoadMeterCenter` from a `LoadMeterCenterInfo`, bracket each frame
//! with `begin_frame_measure`/`end_frame_measure` and query the aggregate
//! tables between frames.

pub mod aggregate;
pub mod center;
pub mod config;
pub mod dump;
pub mod error;
pub mod metrics;

pub use center::{CoreIdResolver, Diagnostics, LoadMeterCenter, LoadMeterCenterBuilder, Tracks};
pub use config::LoadMeterCenterInfo;
pub use error::{ConfigError, FinalizeError, InitError, LifecycleError};
pub use loadmeter_shared::{Color, ProfileSection, Unit};

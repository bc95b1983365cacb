//! Error types for center initialization and shutdown

use std::fmt;

use loadmeter_gpu::GpuError;
use loadmeter_shared::Unit;

use crate::center::LoadMeterCenter;

/// Invalid `LoadMeterCenterInfo`
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("core count must be at least 1")]
    ZeroCores,

    #[error("{unit} buffer count must be at least 2, got {count}")]
    TooFewBuffers { unit: Unit, count: usize },

    #[error("{0} section capacity must be greater than 0")]
    ZeroSectionCapacity(Unit),

    #[error("profiled section capacity must be greater than 0")]
    ZeroProfiledSections,

    #[error("{sections} GPU sections over {buffers} buffers exceed the query index range")]
    TooManyGpuQueries { sections: usize, buffers: usize },

    #[error("memory budget too small: {required} bytes required, {provided} provided")]
    BufferTooSmall { required: usize, provided: usize },
}

/// Failure to bring up a center
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// `finalize` variant does not match the `initialize` variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("center owns a GPU meter; finalize it with the GPU device")]
    GpuDeviceRequired,

    #[error("center was initialized without a GPU meter")]
    NoGpuMeter,
}

/// Rejected `finalize` call
///
/// Carries the center back so it can be finalized with the right variant;
/// nothing it owns has been released.
#[derive(thiserror::Error)]
#[error("{error}")]
pub struct FinalizeError {
    center: Box<LoadMeterCenter>,
    #[source]
    error: LifecycleError,
}

impl FinalizeError {
    pub(crate) fn new(center: LoadMeterCenter, error: LifecycleError) -> Self {
        Self {
            center: Box::new(center),
            error,
        }
    }

    pub fn error(&self) -> LifecycleError {
        self.error
    }

    /// Take back the center that was not finalized
    pub fn into_center(self) -> LoadMeterCenter {
        *self.center
    }
}

impl fmt::Debug for FinalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizeError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

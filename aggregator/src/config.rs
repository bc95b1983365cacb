//! Center configuration

use anyhow::{Context, Result};
use loadmeter_gpu::GpuMeter;
use loadmeter_shared::meter::MIN_BUFFER_COUNT;
use loadmeter_shared::Unit;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Shape of a `LoadMeterCenter`, consumed once at initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadMeterCenterInfo {
    /// Number of core-affine CPU meters
    pub core_count: usize,

    /// Number of user-indexed CPU meters
    pub user_meter_count: usize,

    /// Sections per frame on each CPU meter
    pub cpu_section_count: usize,

    /// Sections per frame on the GPU meter
    pub gpu_section_count: usize,

    /// Slots per CPU meter
    pub cpu_buffer_count: usize,

    /// Slots on the GPU meter (results lag, so usually one more than CPU)
    pub gpu_buffer_count: usize,

    /// Rows in each aggregate table
    pub profiled_section_count: usize,

    /// Host memory the caller is willing to dedicate, checked against
    /// `LoadMeterCenter::calculate_buffer_size` when set
    pub memory_budget: Option<usize>,
}

impl Default for LoadMeterCenterInfo {
    fn default() -> Self {
        Self {
            core_count: num_cpus::get(),
            user_meter_count: 0,
            cpu_section_count: 64,
            gpu_section_count: 64,
            cpu_buffer_count: 2,
            gpu_buffer_count: 3,
            profiled_section_count: 32,
            memory_budget: None,
        }
    }
}

impl LoadMeterCenterInfo {
    /// Read a TOML file, with `LOADMETER_*` environment variables on top
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("LOADMETER").try_parsing(true))
            .build()
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        let info: Self = settings
            .try_deserialize()
            .context("Invalid load meter configuration")?;
        info.validate()?;
        Ok(info)
    }

    /// Defaults with `LOADMETER_*` environment overrides
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("LOADMETER").try_parsing(true))
            .build()
            .context("Failed to read LOADMETER_* environment")?;

        let info: Self = settings
            .try_deserialize()
            .context("Invalid load meter configuration")?;
        info.validate()?;
        Ok(info)
    }

    pub fn with_core_count(mut self, core_count: usize) -> Self {
        self.core_count = core_count;
        self
    }

    pub fn with_user_meter_count(mut self, user_meter_count: usize) -> Self {
        self.user_meter_count = user_meter_count;
        self
    }

    pub fn with_cpu_section_count(mut self, count: usize) -> Self {
        self.cpu_section_count = count;
        self
    }

    pub fn with_gpu_section_count(mut self, count: usize) -> Self {
        self.gpu_section_count = count;
        self
    }

    pub fn with_cpu_buffer_count(mut self, count: usize) -> Self {
        self.cpu_buffer_count = count;
        self
    }

    pub fn with_gpu_buffer_count(mut self, count: usize) -> Self {
        self.gpu_buffer_count = count;
        self
    }

    pub fn with_profiled_section_count(mut self, count: usize) -> Self {
        self.profiled_section_count = count;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Check the CPU side of the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_count == 0 {
            return Err(ConfigError::ZeroCores);
        }
        if self.cpu_buffer_count < MIN_BUFFER_COUNT {
            return Err(ConfigError::TooFewBuffers {
                unit: Unit::Cpu,
                count: self.cpu_buffer_count,
            });
        }
        if self.cpu_section_count == 0 {
            return Err(ConfigError::ZeroSectionCapacity(Unit::Cpu));
        }
        if self.profiled_section_count == 0 {
            return Err(ConfigError::ZeroProfiledSections);
        }
        Ok(())
    }

    /// Check the configuration for a center that also owns a GPU meter
    pub fn validate_gpu(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.gpu_section_count == 0 {
            return Err(ConfigError::ZeroSectionCapacity(Unit::Gpu));
        }
        if self.gpu_buffer_count < MIN_BUFFER_COUNT {
            return Err(ConfigError::TooFewBuffers {
                unit: Unit::Gpu,
                count: self.gpu_buffer_count,
            });
        }
        if GpuMeter::query_count(self.gpu_section_count, self.gpu_buffer_count).is_none() {
            return Err(ConfigError::TooManyGpuQueries {
                sections: self.gpu_section_count,
                buffers: self.gpu_buffer_count,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> LoadMeterCenterInfo {
        LoadMeterCenterInfo::default().with_core_count(2)
    }

    #[test]
    fn test_default_is_valid() {
        assert!(LoadMeterCenterInfo::default().validate().is_ok());
        assert!(LoadMeterCenterInfo::default().validate_gpu().is_ok());
    }

    #[test]
    fn test_zero_cores_rejected() {
        let info = valid().with_core_count(0);
        assert!(matches!(info.validate(), Err(ConfigError::ZeroCores)));
    }

    #[test]
    fn test_single_buffer_rejected() {
        let info = valid().with_cpu_buffer_count(1);
        assert!(matches!(
            info.validate(),
            Err(ConfigError::TooFewBuffers { unit: Unit::Cpu, count: 1 })
        ));
    }

    #[test]
    fn test_zero_gpu_sections_only_matter_with_gpu() {
        let info = valid().with_gpu_section_count(0);
        assert!(info.validate().is_ok());
        assert!(matches!(
            info.validate_gpu(),
            Err(ConfigError::ZeroSectionCapacity(Unit::Gpu))
        ));
    }

    #[test]
    fn test_gpu_query_overflow_rejected() {
        let info = valid().with_gpu_section_count(u32::MAX as usize);
        assert!(info.validate().is_ok());
        assert!(matches!(
            info.validate_gpu(),
            Err(ConfigError::TooManyGpuQueries { buffers: 3, .. })
        ));
    }

    #[test]
    fn test_zero_profiled_sections_rejected() {
        let info = valid().with_profiled_section_count(0);
        assert!(matches!(info.validate(), Err(ConfigError::ZeroProfiledSections)));
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "core_count = 4\nuser_meter_count = 2\ncpu_section_count = 16\ngpu_buffer_count = 4"
        )
        .unwrap();

        let info = LoadMeterCenterInfo::load(file.path()).unwrap();
        assert_eq!(info.core_count, 4);
        assert_eq!(info.user_meter_count, 2);
        assert_eq!(info.cpu_section_count, 16);
        assert_eq!(info.gpu_buffer_count, 4);
        // Unset keys keep their defaults.
        assert_eq!(info.cpu_buffer_count, 2);
        assert_eq!(info.profiled_section_count, 32);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "core_count = 0").unwrap();
        assert!(LoadMeterCenterInfo::load(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(LoadMeterCenterInfo::load(Path::new("/nonexistent/loadmeter.toml")).is_err());
    }
}

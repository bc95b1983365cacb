//! Subcommand implementations

pub mod simulate;
pub mod sizes;

use anyhow::Result;
use loadmeter::LoadMeterCenterInfo;
use std::path::Path;

/// Configuration from a file, or defaults with environment overrides
pub fn load_info(path: Option<&Path>) -> Result<LoadMeterCenterInfo> {
    match path {
        Some(path) => LoadMeterCenterInfo::load(path),
        None => LoadMeterCenterInfo::from_env(),
    }
}

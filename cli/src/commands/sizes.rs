//! Sizes command implementation

use anyhow::Result;
use clap::Args;
use loadmeter::LoadMeterCenter;
use loadmeter_gpu::SimulatedGpu;
use loadmeter_shared::CpuClock;
use std::path::PathBuf;
use std::sync::Arc;

use crate::output;

#[derive(Args, Debug)]
pub struct SizesArgs {
    /// TOML configuration file (LOADMETER_* variables apply on top)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: SizesArgs) -> Result<()> {
    let info = super::load_info(args.config.as_deref())?;
    let device = SimulatedGpu::new(Arc::new(CpuClock::new()));

    output::heading("Configuration");
    output::field("Cores", info.core_count);
    output::field("User meters", info.user_meter_count);
    let cpu_shape = format!("{} x {}", info.cpu_section_count, info.cpu_buffer_count);
    let gpu_shape = format!("{} x {}", info.gpu_section_count, info.gpu_buffer_count);
    output::field("CPU sections x buffers", cpu_shape);
    output::field("GPU sections x buffers", gpu_shape);
    output::field("Profiled sections", info.profiled_section_count);

    output::heading("Host memory");
    output::field("Buffer alignment", LoadMeterCenter::buffer_alignment());
    output::field("CPU buffer size", LoadMeterCenter::calculate_buffer_size(&info));
    output::field("GPU buffer size", LoadMeterCenter::calculate_gpu_buffer_size(&info));

    output::heading("GPU query memory (simulated device)");
    output::field("Pool alignment", LoadMeterCenter::memory_pool_alignment(&device));
    output::field("Pool size", LoadMeterCenter::calculate_memory_pool_size(&info));

    if let Some(budget) = info.memory_budget {
        output::info(&format!("Memory budget: {} bytes", budget));
    }
    Ok(())
}

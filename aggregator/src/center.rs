//! The load meter center
//!
//! Owns the frame meter, one CPU meter per core, the user-indexed CPU
//! meters and an optional GPU meter. Begin/end calls are routed to the right
//! track; `end_frame_measure` rotates every track in lockstep and rebuilds
//! the CPU and GPU aggregate tables.
//!
//! The center is an ordinary value owned by the host. Construction is
//! initialization and `finalize` consumes it, so it cannot be used before
//! one or after the other. Nothing inside takes a lock: recording methods
//! need `&mut self`, and `tracks()` splits the center into disjoint mutable
//! tracks that can be handed to different threads.

use std::sync::Arc;
use std::time::Duration;

use loadmeter_gpu::{GpuCommandBuffer, GpuDevice, GpuMeter};
use loadmeter_shared::meter::Track;
use loadmeter_shared::{
    Color, CpuClock, CpuMeter, FrameMeter, Meter, ProfileSection, TimestampSource, Unit,
};
use serde::Serialize;
use tracing::debug;

use crate::aggregate::{aggregate, PassSummary, ProfileTable};
use crate::config::LoadMeterCenterInfo;
use crate::error::{ConfigError, FinalizeError, InitError, LifecycleError};
use crate::{dump, metrics};

/// Maps the calling thread to its logical core
pub trait CoreIdResolver: Send + Sync {
    fn current_core(&self) -> usize;
}

impl<F> CoreIdResolver for F
where
    F: Fn() -> usize + Send + Sync,
{
    fn current_core(&self) -> usize {
        self()
    }
}

/// Measurement-loss counters summed over every track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub dropped_sections: u64,
    pub unmatched_ends: u64,
    pub unclosed_sections: u64,
    pub gpu_pending_discarded: u64,
    pub dropped_rows: u64,
}

/// Disjoint mutable access to every track
pub struct Tracks<'a> {
    pub frame: &'a mut FrameMeter,
    pub cores: &'a mut [CpuMeter],
    pub users: &'a mut [CpuMeter],
    pub gpu: Option<&'a mut GpuMeter>,
}

/// Configures and initializes a `LoadMeterCenter`
pub struct LoadMeterCenterBuilder {
    info: LoadMeterCenterInfo,
    clock: Option<Arc<dyn TimestampSource>>,
    resolver: Option<Box<dyn CoreIdResolver>>,
}

impl LoadMeterCenterBuilder {
    /// Timestamp source for every CPU meter (defaults to `CpuClock`)
    pub fn clock(mut self, clock: impl TimestampSource + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Resolver used by core-affine measurements
    pub fn core_id_resolver(mut self, resolver: impl CoreIdResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Initialize a CPU-only center
    pub fn initialize(self) -> Result<LoadMeterCenter, InitError> {
        self.info.validate()?;
        check_budget(&self.info, LoadMeterCenter::calculate_buffer_size(&self.info))?;
        Ok(self.build(None))
    }

    /// Initialize a center with a GPU meter allocated on `device`
    pub fn initialize_with_gpu(
        self,
        device: &mut dyn GpuDevice,
    ) -> Result<LoadMeterCenter, InitError> {
        self.info.validate_gpu()?;
        let required = LoadMeterCenter::calculate_buffer_size(&self.info)
            + LoadMeterCenter::calculate_gpu_buffer_size(&self.info);
        check_budget(&self.info, required)?;

        let gpu = GpuMeter::new(
            self.info.gpu_section_count,
            self.info.gpu_buffer_count,
            device,
        )?;
        Ok(self.build(Some(gpu)))
    }

    fn build(self, gpu: Option<GpuMeter>) -> LoadMeterCenter {
        let info = self.info;
        let clock = self.clock.unwrap_or_else(|| Arc::new(CpuClock::new()));

        let cpu_meter = |name: String| {
            let clock = Arc::clone(&clock);
            CpuMeter::new(name, info.cpu_section_count, info.cpu_buffer_count, clock)
        };
        let cores = (0..info.core_count)
            .map(|i| cpu_meter(format!("Core {}", i)))
            .collect();
        let users = (0..info.user_meter_count)
            .map(|i| cpu_meter(format!("User {}", i)))
            .collect();

        debug!(
            "Load meter center initialized: {} cores, {} user meters, gpu={}",
            info.core_count,
            info.user_meter_count,
            gpu.is_some()
        );

        LoadMeterCenter {
            frame: FrameMeter::new(info.cpu_buffer_count, Arc::clone(&clock)),
            cores,
            users,
            gpu,
            resolver: self.resolver,
            enabled: true,
            in_frame: false,
            frame_count: 0,
            cpu_table: ProfileTable::new(info.profiled_section_count),
            gpu_table: ProfileTable::new(info.profiled_section_count),
            reported: Diagnostics::default(),
            info,
        }
    }
}

/// CPU tracks in table order: frame meter, cores, then user meters
fn cpu_tracks<'a>(
    frame: &'a FrameMeter,
    cores: &'a [CpuMeter],
    users: &'a [CpuMeter],
) -> impl Iterator<Item = &'a dyn Track> {
    std::iter::once(frame as &dyn Track)
        .chain(cores.iter().map(|m| m as &dyn Track))
        .chain(users.iter().map(|m| m as &dyn Track))
}

fn check_budget(info: &LoadMeterCenterInfo, required: usize) -> Result<(), ConfigError> {
    match info.memory_budget {
        Some(provided) if provided < required => {
            Err(ConfigError::BufferTooSmall { required, provided })
        }
        _ => Ok(()),
    }
}

/// Frame-synchronized registry of CPU and GPU meters
pub struct LoadMeterCenter {
    info: LoadMeterCenterInfo,
    frame: FrameMeter,
    cores: Vec<CpuMeter>,
    users: Vec<CpuMeter>,
    gpu: Option<GpuMeter>,
    resolver: Option<Box<dyn CoreIdResolver>>,
    enabled: bool,
    in_frame: bool,
    frame_count: u64,
    cpu_table: ProfileTable,
    gpu_table: ProfileTable,
    /// Diagnostics already pushed to the process-wide counters
    reported: Diagnostics,
}

impl LoadMeterCenter {
    pub fn builder(info: LoadMeterCenterInfo) -> LoadMeterCenterBuilder {
        LoadMeterCenterBuilder {
            info,
            clock: None,
            resolver: None,
        }
    }

    // ── Sizing ───────────────────────────────────────────────────────────────

    /// Alignment of the center's host memory
    pub fn buffer_alignment() -> usize {
        Meter::buffer_alignment().max(std::mem::align_of::<ProfileSection>())
    }

    /// Host memory used by the CPU meters and aggregate tables
    pub fn calculate_buffer_size(info: &LoadMeterCenterInfo) -> usize {
        let cpu_meters = info.core_count + info.user_meter_count;
        let per_meter = Meter::calculate_buffer_size(info.cpu_section_count, info.cpu_buffer_count);
        Meter::calculate_buffer_size(1, info.cpu_buffer_count)
            + cpu_meters * per_meter
            + 2 * info.profiled_section_count * std::mem::size_of::<ProfileSection>()
    }

    /// Host memory used by the GPU meter's section records
    pub fn calculate_gpu_buffer_size(info: &LoadMeterCenterInfo) -> usize {
        Meter::calculate_buffer_size(info.gpu_section_count, info.gpu_buffer_count)
            + info.gpu_section_count * info.gpu_buffer_count.max(2)
    }

    /// Alignment of GPU query result memory on `device`
    pub fn memory_pool_alignment(device: &dyn GpuDevice) -> usize {
        GpuMeter::memory_pool_alignment(device)
    }

    /// Bytes of GPU query result memory the GPU meter needs
    pub fn calculate_memory_pool_size(info: &LoadMeterCenterInfo) -> usize {
        GpuMeter::calculate_memory_pool_size(info.gpu_section_count, info.gpu_buffer_count)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Shut down a CPU-only center
    ///
    /// A center with a GPU meter is handed back in the error untouched.
    pub fn finalize(self) -> Result<(), FinalizeError> {
        if self.gpu.is_some() {
            return Err(FinalizeError::new(self, LifecycleError::GpuDeviceRequired));
        }
        debug!("Load meter center finalized after {} frames", self.frame_count);
        Ok(())
    }

    /// Shut down a center and release its GPU query pool
    pub fn finalize_with_gpu(mut self, device: &mut dyn GpuDevice) -> Result<(), FinalizeError> {
        let Some(gpu) = self.gpu.take() else {
            return Err(FinalizeError::new(self, LifecycleError::NoGpuMeter));
        };
        gpu.destroy(device);
        debug!("Load meter center finalized after {} frames", self.frame_count);
        Ok(())
    }

    pub fn info(&self) -> &LoadMeterCenterInfo {
        &self.info
    }

    pub fn set_core_id_resolver(&mut self, resolver: impl CoreIdResolver + 'static) {
        self.resolver = Some(Box::new(resolver));
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Global switch; only toggle between frames
    pub fn set_enabled(&mut self, enabled: bool) {
        debug_assert!(!self.in_frame, "set_enabled called inside a frame");
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.frame.meter_mut().set_enabled(enabled);
        for meter in self.cores.iter_mut().chain(self.users.iter_mut()) {
            meter.meter_mut().set_enabled(enabled);
        }
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.meter_mut().set_enabled(enabled);
        }
        debug!("Load meter center {}", if enabled { "enabled" } else { "disabled" });
    }

    // ── Recording ────────────────────────────────────────────────────────────

    fn current_core(&self) -> Option<usize> {
        let Some(resolver) = self.resolver.as_ref() else {
            if cfg!(debug_assertions) {
                panic!("core-affine measurement without a core id resolver");
            }
            return None;
        };
        let core = resolver.current_core();
        debug_assert!(
            core < self.cores.len(),
            "core id {} out of range (core count {})",
            core,
            self.cores.len()
        );
        (core < self.cores.len()).then_some(core)
    }

    fn user_meter(&mut self, index: usize) -> Option<&mut CpuMeter> {
        debug_assert!(
            index < self.users.len(),
            "user meter index {} out of range (user meter count {})",
            index,
            self.users.len()
        );
        self.users.get_mut(index)
    }

    fn gpu_meter(&mut self) -> Option<&mut GpuMeter> {
        debug_assert!(self.gpu.is_some(), "GPU measurement on a center without a GPU meter");
        self.gpu.as_mut()
    }

    /// Open a section on the calling thread's core meter
    pub fn begin_measure(&mut self, name: Option<&'static str>, tag: u32) {
        if !self.enabled {
            return;
        }
        if let Some(core) = self.current_core() {
            self.cores[core].begin_measure(name, tag);
        }
    }

    /// Close the innermost section on the calling thread's core meter
    pub fn end_measure(&mut self) {
        if !self.enabled {
            return;
        }
        if let Some(core) = self.current_core() {
            self.cores[core].end_measure();
        }
    }

    /// Open a section on a user-indexed meter
    pub fn begin_measure_index(&mut self, index: usize, name: Option<&'static str>, tag: u32) {
        if !self.enabled {
            return;
        }
        if let Some(meter) = self.user_meter(index) {
            meter.begin_measure(name, tag);
        }
    }

    /// Close the innermost section on a user-indexed meter
    pub fn end_measure_index(&mut self, index: usize) {
        if !self.enabled {
            return;
        }
        if let Some(meter) = self.user_meter(index) {
            meter.end_measure();
        }
    }

    /// Open a GPU section by recording a timestamp into `cmd`
    pub fn begin_measure_gpu(
        &mut self,
        cmd: &mut dyn GpuCommandBuffer,
        name: Option<&'static str>,
        tag: u32,
    ) {
        if !self.enabled {
            return;
        }
        if let Some(gpu) = self.gpu_meter() {
            gpu.begin_measure(cmd, name, tag);
        }
    }

    /// Close the innermost GPU section by recording a timestamp into `cmd`
    pub fn end_measure_gpu(&mut self, cmd: &mut dyn GpuCommandBuffer) {
        if !self.enabled {
            return;
        }
        if let Some(gpu) = self.gpu_meter() {
            gpu.end_measure(cmd);
        }
    }

    /// Color for subsequent sections on the calling thread's core meter
    pub fn set_color(&mut self, color: Color) {
        if !self.enabled {
            return;
        }
        if let Some(core) = self.current_core() {
            self.cores[core].set_color(color);
        }
    }

    pub fn set_color_index(&mut self, index: usize, color: Color) {
        if !self.enabled {
            return;
        }
        if let Some(meter) = self.user_meter(index) {
            meter.set_color(color);
        }
    }

    pub fn set_color_gpu(&mut self, color: Color) {
        if !self.enabled {
            return;
        }
        if let Some(gpu) = self.gpu_meter() {
            gpu.set_color(color);
        }
    }

    pub fn set_frame_color(&mut self, color: Color) {
        self.frame.set_color(color);
    }

    /// Rename a user-indexed meter; later aggregates use the new name
    pub fn set_user_meter_name(&mut self, index: usize, name: impl Into<String>) {
        if let Some(meter) = self.user_meter(index) {
            meter.meter_mut().set_name(name);
        }
    }

    /// Split into independently writable tracks
    pub fn tracks(&mut self) -> Tracks<'_> {
        Tracks {
            frame: &mut self.frame,
            cores: &mut self.cores,
            users: &mut self.users,
            gpu: self.gpu.as_mut(),
        }
    }

    // ── Frame boundary ───────────────────────────────────────────────────────

    pub fn begin_frame_measure(&mut self) {
        if !self.enabled {
            return;
        }
        debug_assert!(!self.in_frame, "begin_frame_measure called twice");
        self.in_frame = true;
        self.frame.begin_frame();
    }

    /// Close the frame, rotate every track and rebuild the aggregates
    ///
    /// With `clear` set the tables only reflect the frame that just became
    /// readable; otherwise rows keep accumulating until `clear()`.
    pub fn end_frame_measure(&mut self, clear: bool) {
        if !self.enabled {
            return;
        }
        self.frame.end_frame();
        self.in_frame = false;

        if clear {
            self.cpu_table.reset();
            self.gpu_table.reset();
        }

        self.frame.next();
        for meter in self.cores.iter_mut().chain(self.users.iter_mut()) {
            meter.next();
        }
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.next();
        }

        let cpu = aggregate(
            &mut self.cpu_table,
            cpu_tracks(&self.frame, &self.cores, &self.users),
        );
        let gpu = match self.gpu.as_ref() {
            Some(meter) => aggregate(&mut self.gpu_table, [meter as &dyn Track]),
            None => PassSummary::default(),
        };

        self.frame_count += 1;
        self.report_diagnostics();
        debug!(
            "Frame {} ended: cpu folded={} unresolved={}, gpu folded={} unresolved={}",
            self.frame_count, cpu.folded, cpu.unresolved, gpu.folded, gpu.unresolved
        );
    }

    fn report_diagnostics(&mut self) {
        let current = self.diagnostics();
        let previous = self.reported;
        let delta = |now: u64, before: u64| now.saturating_sub(before) as f64;

        metrics::SECTIONS_DROPPED
            .inc_by(delta(current.dropped_sections, previous.dropped_sections));
        metrics::UNMATCHED_ENDS.inc_by(delta(current.unmatched_ends, previous.unmatched_ends));
        metrics::UNCLOSED_SECTIONS
            .inc_by(delta(current.unclosed_sections, previous.unclosed_sections));
        metrics::GPU_PENDING_DISCARDED
            .inc_by(delta(current.gpu_pending_discarded, previous.gpu_pending_discarded));
        metrics::ROWS_DROPPED.inc_by(delta(current.dropped_rows, previous.dropped_rows));
        if let Some(frame_time) = self.frame.last_frame_time() {
            metrics::LAST_FRAME_SECONDS.set(frame_time.as_secs_f64());
        }
        self.reported = current;
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    fn table(&self, unit: Unit) -> &ProfileTable {
        match unit {
            Unit::Cpu => &self.cpu_table,
            Unit::Gpu => &self.gpu_table,
        }
    }

    /// Union of every aggregate row passing the filter
    ///
    /// `None` meter or section names and a zero tag are wildcards. Returns an
    /// all-zero row when nothing matches or the center is disabled.
    pub fn get_result_all(
        &self,
        unit: Unit,
        meter_name: Option<&str>,
        section_name: Option<&str>,
        tag: u32,
    ) -> ProfileSection {
        if !self.enabled {
            return ProfileSection::new(meter_name.unwrap_or_default(), section_name, tag);
        }
        self.table(unit).find(meter_name, section_name, tag)
    }

    pub fn get_call_count(
        &self,
        unit: Unit,
        meter_name: Option<&str>,
        section_name: Option<&str>,
        tag: u32,
    ) -> u64 {
        self.get_result_all(unit, meter_name, section_name, tag).call_count
    }

    pub fn get_elapsed_time(
        &self,
        unit: Unit,
        meter_name: Option<&str>,
        section_name: Option<&str>,
        tag: u32,
    ) -> Duration {
        self.get_result_all(unit, meter_name, section_name, tag).elapsed_time()
    }

    pub fn get_max_elapsed_time(
        &self,
        unit: Unit,
        meter_name: Option<&str>,
        section_name: Option<&str>,
        tag: u32,
    ) -> Duration {
        self.get_result_all(unit, meter_name, section_name, tag).max_elapsed_time()
    }

    pub fn get_min_elapsed_time(
        &self,
        unit: Unit,
        meter_name: Option<&str>,
        section_name: Option<&str>,
        tag: u32,
    ) -> Duration {
        self.get_result_all(unit, meter_name, section_name, tag).min_elapsed_time()
    }

    pub fn get_average_elapsed_time(
        &self,
        unit: Unit,
        meter_name: Option<&str>,
        section_name: Option<&str>,
        tag: u32,
    ) -> Duration {
        self.get_result_all(unit, meter_name, section_name, tag).average_elapsed_time()
    }

    /// Raw aggregate rows (empty while disabled)
    pub fn results(&self, unit: Unit) -> impl Iterator<Item = &ProfileSection> + '_ {
        let rows: &[ProfileSection] = if self.enabled { self.table(unit).rows() } else { &[] };
        rows.iter()
    }

    /// Owned copy of the aggregate rows
    pub fn snapshot(&self, unit: Unit) -> Vec<ProfileSection> {
        self.results(unit).cloned().collect()
    }

    /// Reset both aggregate tables, leaving meter buffers untouched
    ///
    /// Sections recorded before the call never reach the tables, including
    /// the rest of an open frame and GPU frames still awaiting results.
    pub fn clear(&mut self) {
        if !self.enabled {
            return;
        }
        self.cpu_table.clear(cpu_tracks(&self.frame, &self.cores, &self.users));
        self.gpu_table.clear(self.gpu.iter().map(|m| m as &dyn Track));
    }

    /// Log every aggregate row
    pub fn dump(&self) {
        if !self.enabled {
            return;
        }
        dump::log_table(Unit::Cpu, self.cpu_table.rows());
        if self.gpu.is_some() {
            dump::log_table(Unit::Gpu, self.gpu_table.rows());
        }
    }

    /// Render every aggregate row as a text table
    pub fn dump_to<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        dump::write_table(out, Unit::Cpu, self.cpu_table.rows())?;
        if self.gpu.is_some() {
            dump::write_table(out, Unit::Gpu, self.gpu_table.rows())?;
        }
        Ok(())
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// Frames ended while enabled
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Duration of the most recently completed frame
    pub fn last_frame_time(&self) -> Option<Duration> {
        self.frame.last_frame_time()
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn user_meter_count(&self) -> usize {
        self.users.len()
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn frame_meter(&self) -> &FrameMeter {
        &self.frame
    }

    pub fn core_meter(&self, core: usize) -> Option<&CpuMeter> {
        self.cores.get(core)
    }

    pub fn user_meter_ref(&self, index: usize) -> Option<&CpuMeter> {
        self.users.get(index)
    }

    pub fn gpu_meter_ref(&self) -> Option<&GpuMeter> {
        self.gpu.as_ref()
    }

    /// Measurement-loss counters summed over every track
    pub fn diagnostics(&self) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();
        let meters = std::iter::once(self.frame.meter())
            .chain(self.cores.iter().map(CpuMeter::meter))
            .chain(self.users.iter().map(CpuMeter::meter))
            .chain(self.gpu.iter().map(GpuMeter::meter));
        for meter in meters {
            let stats = meter.stats();
            diagnostics.dropped_sections += stats.dropped;
            diagnostics.unmatched_ends += stats.unmatched_end;
            diagnostics.unclosed_sections += stats.unclosed;
        }
        if let Some(gpu) = self.gpu.as_ref() {
            diagnostics.gpu_pending_discarded = gpu.stats().discarded_pending;
        }
        diagnostics.dropped_rows = self.cpu_table.dropped() + self.gpu_table.dropped();
        diagnostics
    }
}

impl std::fmt::Debug for LoadMeterCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadMeterCenter")
            .field("info", &self.info)
            .field("enabled", &self.enabled)
            .field("frame_count", &self.frame_count)
            .field("has_gpu", &self.gpu.is_some())
            .finish_non_exhaustive()
    }
}

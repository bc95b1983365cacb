//! End-to-end behavior of the load meter center
//!
//! Every test drives the center with a `ManualClock` so elapsed times are
//! exact, and the GPU tests use the simulated device to control when query
//! results arrive.

use std::sync::Arc;
use std::time::Duration;

use loadmeter::{LifecycleError, LoadMeterCenter, LoadMeterCenterInfo, ProfileSection, Unit};
use loadmeter_gpu::SimulatedGpu;
use loadmeter_shared::ManualClock;

fn cpu_center(clock: &ManualClock, core_count: usize, capacity: usize) -> LoadMeterCenter {
    let info = LoadMeterCenterInfo::default()
        .with_core_count(core_count)
        .with_user_meter_count(2)
        .with_cpu_section_count(capacity)
        .with_cpu_buffer_count(2);
    LoadMeterCenter::builder(info)
        .clock(clock.clone())
        .core_id_resolver(|| 0)
        .initialize()
        .unwrap()
}

fn gpu_center(clock: &ManualClock, gpu: &mut SimulatedGpu) -> LoadMeterCenter {
    let info = LoadMeterCenterInfo::default()
        .with_core_count(1)
        .with_gpu_section_count(8)
        .with_gpu_buffer_count(3);
    LoadMeterCenter::builder(info)
        .clock(clock.clone())
        .core_id_resolver(|| 0)
        .initialize_with_gpu(gpu)
        .unwrap()
}

fn measure(
    center: &mut LoadMeterCenter,
    clock: &ManualClock,
    name: &'static str,
    tag: u32,
    ms: u64,
) {
    center.begin_measure(Some(name), tag);
    clock.advance_ms(ms);
    center.end_measure();
}

fn gpu_pass(center: &mut LoadMeterCenter, gpu: &mut SimulatedGpu, work: Duration) {
    let mut cmd = gpu.command_buffer();
    center.begin_measure_gpu(&mut cmd, Some("pass"), 0);
    cmd.work(work);
    center.end_measure_gpu(&mut cmd);
    gpu.submit(cmd);
}

#[test]
fn test_two_draws_on_one_core() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 2, 8);

    center.begin_frame_measure();
    measure(&mut center, &clock, "draw", 1, 2);
    measure(&mut center, &clock, "draw", 1, 3);
    center.end_frame_measure(true);

    let ms = Duration::from_millis;
    assert_eq!(center.get_elapsed_time(Unit::Cpu, None, Some("draw"), 1), ms(5));
    assert_eq!(center.get_call_count(Unit::Cpu, None, Some("draw"), 1), 2);
    assert_eq!(
        center.get_average_elapsed_time(Unit::Cpu, None, Some("draw"), 1),
        Duration::from_micros(2500)
    );
    assert_eq!(center.get_max_elapsed_time(Unit::Cpu, None, Some("draw"), 1), ms(3));
    assert_eq!(center.get_min_elapsed_time(Unit::Cpu, None, Some("draw"), 1), ms(2));
}

#[test]
fn test_overflow_keeps_recorded_sections() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);

    center.begin_frame_measure();
    for _ in 0..10 {
        measure(&mut center, &clock, "tick", 0, 1);
    }
    center.end_frame_measure(true);

    assert_eq!(center.get_call_count(Unit::Cpu, Some("Core 0"), Some("tick"), 0), 8);
    assert_eq!(center.diagnostics().dropped_sections, 2);

    // The meter keeps working in the next frame.
    center.begin_frame_measure();
    measure(&mut center, &clock, "tick", 0, 1);
    center.end_frame_measure(true);
    assert_eq!(center.get_call_count(Unit::Cpu, Some("Core 0"), Some("tick"), 0), 1);
}

#[test]
fn test_rotation_exposes_previous_frame_only() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);

    center.begin_frame_measure();
    measure(&mut center, &clock, "a", 0, 1);
    measure(&mut center, &clock, "b", 0, 1);
    center.end_frame_measure(true);

    let core = center.core_meter(0).unwrap().meter();
    let names: Vec<_> = core
        .last_completed()
        .unwrap()
        .sections()
        .iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec![Some("a"), Some("b")]);
    assert!(core.active_sections().is_empty());
}

#[test]
fn test_wildcard_query_unions_meter_rows() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);

    center.begin_frame_measure();
    measure(&mut center, &clock, "draw", 1, 4);
    measure(&mut center, &clock, "update", 2, 1);
    measure(&mut center, &clock, "update", 2, 2);
    center.end_frame_measure(true);

    let row = center.get_result_all(Unit::Cpu, Some("Core 0"), None, 0);
    assert_eq!(row.call_count, 3);
    assert_eq!(row.elapsed_time(), Duration::from_millis(7));
    assert_eq!(row.max_elapsed_time(), Duration::from_millis(4));
    assert_eq!(row.min_elapsed_time(), Duration::from_millis(1));

    // A tag filter alone narrows the union.
    assert_eq!(center.get_call_count(Unit::Cpu, None, None, 2), 2);
}

#[test]
fn test_disabled_center_is_inert() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);

    center.begin_frame_measure();
    measure(&mut center, &clock, "draw", 0, 2);
    center.end_frame_measure(true);
    let before = center.snapshot(Unit::Cpu);

    center.set_enabled(false);
    assert_eq!(center.get_call_count(Unit::Cpu, None, Some("draw"), 0), 0);
    assert_eq!(center.get_elapsed_time(Unit::Cpu, None, None, 0), Duration::ZERO);
    assert!(center.snapshot(Unit::Cpu).is_empty());

    center.begin_frame_measure();
    measure(&mut center, &clock, "draw", 0, 5);
    center.begin_measure_index(0, Some("job"), 0);
    center.end_measure_index(0);
    center.end_frame_measure(true);
    center.clear();
    assert_eq!(center.frame_count(), 1);

    center.set_enabled(true);
    assert_eq!(center.snapshot(Unit::Cpu), before);
}

#[test]
fn test_average_law() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);
    assert_eq!(
        center.get_average_elapsed_time(Unit::Cpu, None, Some("missing"), 0),
        Duration::ZERO
    );

    center.begin_frame_measure();
    measure(&mut center, &clock, "step", 0, 1);
    measure(&mut center, &clock, "step", 0, 2);
    measure(&mut center, &clock, "step", 0, 4);
    center.end_frame_measure(true);

    let row = center.get_result_all(Unit::Cpu, None, Some("step"), 0);
    assert_eq!(
        row.average_elapsed_time(),
        row.elapsed_time() / row.call_count as u32
    );
}

#[test]
fn test_unresolved_gpu_frame_shows_previous_value() {
    let clock = ManualClock::new();
    let mut gpu = SimulatedGpu::new(Arc::new(clock.clone()));
    let mut center = gpu_center(&clock, &mut gpu);

    // Nothing resolved yet: zero, not an error.
    center.begin_frame_measure();
    gpu_pass(&mut center, &mut gpu, Duration::from_millis(8));
    center.end_frame_measure(true);
    assert_eq!(center.get_elapsed_time(Unit::Gpu, None, Some("pass"), 0), Duration::ZERO);

    gpu.execute_submitted();
    center.begin_frame_measure();
    gpu_pass(&mut center, &mut gpu, Duration::from_millis(5));
    center.end_frame_measure(true);
    assert_eq!(
        center.get_elapsed_time(Unit::Gpu, None, Some("pass"), 0),
        Duration::from_millis(8)
    );

    // The 5ms frame was still in flight above; once it lands it replaces
    // the 8ms frame.
    gpu.execute_submitted();
    center.begin_frame_measure();
    center.end_frame_measure(true);
    assert_eq!(
        center.get_elapsed_time(Unit::Gpu, None, Some("pass"), 0),
        Duration::from_millis(5)
    );

    center.finalize_with_gpu(&mut gpu).unwrap();
    assert_eq!(gpu.live_pools(), 0);
}

#[test]
fn test_gpu_accumulates_each_frame_once() {
    let clock = ManualClock::new();
    let mut gpu = SimulatedGpu::new(Arc::new(clock.clone()));
    let mut center = gpu_center(&clock, &mut gpu);

    for _ in 0..4 {
        center.begin_frame_measure();
        gpu_pass(&mut center, &mut gpu, Duration::from_millis(2));
        gpu.execute_submitted();
        center.end_frame_measure(false);
    }

    let row = center.get_result_all(Unit::Gpu, Some("GPU"), Some("pass"), 0);
    assert_eq!(row.call_count, 4);
    assert_eq!(row.elapsed_time(), Duration::from_millis(8));
    center.finalize_with_gpu(&mut gpu).unwrap();
}

#[test]
fn test_clear_mid_accumulation() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);

    center.begin_frame_measure();
    measure(&mut center, &clock, "draw", 0, 1);
    measure(&mut center, &clock, "draw", 0, 1);
    center.end_frame_measure(false);
    assert_eq!(center.get_call_count(Unit::Cpu, None, Some("draw"), 0), 2);

    center.clear();
    assert_eq!(center.get_call_count(Unit::Cpu, None, Some("draw"), 0), 0);
    assert_eq!(center.get_result_all(Unit::Cpu, None, None, 0), ProfileSection::default());
    let completed = center.core_meter(0).unwrap().meter().last_completed().unwrap();
    assert_eq!(completed.sections().len(), 2);

    center.begin_frame_measure();
    measure(&mut center, &clock, "draw", 0, 3);
    center.end_frame_measure(false);
    let row = center.get_result_all(Unit::Cpu, None, Some("draw"), 0);
    assert_eq!(row.call_count, 1);
    assert_eq!(row.elapsed_time(), Duration::from_millis(3));
}

#[test]
fn test_clear_inside_frame_drops_earlier_sections() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);

    center.begin_frame_measure();
    measure(&mut center, &clock, "draw", 0, 4);
    center.clear();
    measure(&mut center, &clock, "draw", 0, 1);
    center.end_frame_measure(false);

    let row = center.get_result_all(Unit::Cpu, None, Some("draw"), 0);
    assert_eq!(row.call_count, 1);
    assert_eq!(row.elapsed_time(), Duration::from_millis(1));
}

#[test]
fn test_clear_drops_gpu_frame_still_in_flight() {
    let clock = ManualClock::new();
    let mut gpu = SimulatedGpu::new(Arc::new(clock.clone()));
    let mut center = gpu_center(&clock, &mut gpu);

    center.begin_frame_measure();
    gpu_pass(&mut center, &mut gpu, Duration::from_millis(8));
    center.end_frame_measure(false);

    // The 8ms frame resolves only after the clear.
    center.clear();
    gpu.execute_submitted();

    center.begin_frame_measure();
    gpu_pass(&mut center, &mut gpu, Duration::from_millis(3));
    gpu.execute_submitted();
    center.end_frame_measure(false);
    assert_eq!(center.get_call_count(Unit::Gpu, None, Some("pass"), 0), 0);

    center.begin_frame_measure();
    center.end_frame_measure(false);
    let row = center.get_result_all(Unit::Gpu, None, Some("pass"), 0);
    assert_eq!(row.call_count, 1);
    assert_eq!(row.elapsed_time(), Duration::from_millis(3));

    center.finalize_with_gpu(&mut gpu).unwrap();
}

#[test]
fn test_disabled_interval_never_aggregated() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);

    center.set_enabled(false);
    center.begin_frame_measure();
    measure(&mut center, &clock, "hidden", 0, 1);
    center.begin_measure_index(1, Some("hidden"), 0);
    center.end_measure_index(1);
    center.end_frame_measure(false);
    center.set_enabled(true);

    center.begin_frame_measure();
    measure(&mut center, &clock, "visible", 0, 1);
    center.end_frame_measure(false);
    center.begin_frame_measure();
    center.end_frame_measure(false);

    assert_eq!(center.get_call_count(Unit::Cpu, None, Some("hidden"), 0), 0);
    assert_eq!(center.get_call_count(Unit::Cpu, None, Some("visible"), 0), 1);
}

#[test]
fn test_threads_record_through_split_tracks() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 4, 16);

    center.begin_frame_measure();
    {
        let tracks = center.tracks();
        std::thread::scope(|s| {
            for core in tracks.cores.iter_mut() {
                s.spawn(move || {
                    for _ in 0..3 {
                        let _guard = core.scope(Some("job"), 7);
                    }
                });
            }
            let user = &mut tracks.users[0];
            s.spawn(move || {
                user.begin_measure(Some("io"), 0);
                user.end_measure();
            });
        });
    }
    center.end_frame_measure(true);

    assert_eq!(center.get_call_count(Unit::Cpu, None, Some("job"), 7), 12);
    assert_eq!(center.get_call_count(Unit::Cpu, Some("Core 3"), Some("job"), 7), 3);
    assert_eq!(center.get_call_count(Unit::Cpu, Some("User 0"), Some("io"), 0), 1);
}

#[test]
fn test_renamed_user_meter_in_results() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);
    center.set_user_meter_name(1, "Streaming");

    center.begin_frame_measure();
    center.begin_measure_index(1, Some("load"), 0);
    clock.advance_ms(2);
    center.end_measure_index(1);
    center.end_frame_measure(true);

    assert_eq!(center.get_call_count(Unit::Cpu, Some("Streaming"), None, 0), 1);
    assert_eq!(center.get_call_count(Unit::Cpu, Some("User 1"), None, 0), 0);
}

#[test]
fn test_snapshot_and_dump() {
    let clock = ManualClock::new();
    let mut center = cpu_center(&clock, 1, 8);

    center.begin_frame_measure();
    measure(&mut center, &clock, "draw", 1, 2);
    center.end_frame_measure(true);

    let rows = center.snapshot(Unit::Cpu);
    let json = serde_json::to_string(&rows).unwrap();
    assert!(json.contains("\"meter_name\":\"Core 0\""));
    assert!(json.contains("\"section_name\":\"draw\""));

    let mut out = Vec::new();
    center.dump_to(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("=== CPU"));
    assert!(text.contains("draw"));
    assert!(!text.contains("=== GPU"));
}

#[test]
fn test_finalize_requires_matching_variant() {
    let clock = ManualClock::new();
    let mut gpu = SimulatedGpu::new(Arc::new(clock.clone()));
    let center = gpu_center(&clock, &mut gpu);
    let err = center.finalize().unwrap_err();
    assert_eq!(err.error(), LifecycleError::GpuDeviceRequired);
    assert_eq!(gpu.live_pools(), 1);

    // The rejected center comes back intact and releases its pool.
    err.into_center().finalize_with_gpu(&mut gpu).unwrap();
    assert_eq!(gpu.live_pools(), 0);

    let center = cpu_center(&clock, 1, 8);
    assert!(center.finalize().is_ok());
}

#[test]
fn test_gpu_sizing_matches_device_pool() {
    let clock = ManualClock::new();
    let gpu = SimulatedGpu::new(Arc::new(clock)).with_alignment(512);
    let info = LoadMeterCenterInfo::default()
        .with_gpu_section_count(4)
        .with_gpu_buffer_count(3);

    assert_eq!(LoadMeterCenter::memory_pool_alignment(&gpu), 512);
    assert_eq!(LoadMeterCenter::calculate_memory_pool_size(&info), 4 * 3 * 2 * 8);
    assert!(LoadMeterCenter::calculate_gpu_buffer_size(&info) > 0);
    assert!(LoadMeterCenter::buffer_alignment().is_power_of_two());
}

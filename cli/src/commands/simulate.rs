//! Simulate command implementation

use anyhow::{Context, Result};
use clap::Args;
use loadmeter::{LoadMeterCenter, ProfileSection, Unit};
use loadmeter_gpu::{SimCommandBuffer, SimulatedGpu};
use loadmeter_shared::utils::format_millis;
use loadmeter_shared::CpuClock;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::output;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of frames to run
    #[arg(short, long, default_value = "120")]
    pub frames: u64,

    /// Core meters (one worker thread each); overrides the config
    #[arg(short, long)]
    pub cores: Option<usize>,

    /// User-indexed meters; overrides the config
    #[arg(short, long)]
    pub users: Option<usize>,

    /// Also measure simulated GPU passes
    #[arg(long)]
    pub gpu: bool,

    /// Frames between GPU submission and query results
    #[arg(long, default_value = "1")]
    pub gpu_latency: usize,

    /// TOML configuration file (LOADMETER_* variables apply on top)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the aggregate tables as JSON
    #[arg(long)]
    pub json: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Serialize)]
struct Report {
    frames: u64,
    last_frame_ms: Option<f64>,
    cpu: Vec<ProfileSection>,
    gpu: Vec<ProfileSection>,
    diagnostics: loadmeter::Diagnostics,
}

/// Busy-wait so the measured time is spent on the calling thread
fn spin(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

/// Deterministic per-frame work so runs are comparable
fn work(base_us: u64, lane: usize, frame: u64) -> Duration {
    Duration::from_micros(base_us + 40 * lane as u64 + (frame % 7) * 15)
}

pub fn run(args: SimulateArgs) -> Result<()> {
    let mut info = super::load_info(args.config.as_deref())?;
    if let Some(cores) = args.cores {
        info.core_count = cores;
    }
    if let Some(users) = args.users {
        info.user_meter_count = users;
    }

    let clock = Arc::new(CpuClock::new());
    let builder = LoadMeterCenter::builder(info.clone())
        .clock(Arc::clone(&clock))
        .core_id_resolver(|| 0);

    let mut device = args.gpu.then(|| SimulatedGpu::new(clock.clone()));
    let mut center = match device.as_mut() {
        Some(device) => {
            if info.gpu_buffer_count < args.gpu_latency + 2 {
                output::warning(&format!(
                    "{} GPU buffers cannot hide {} frame(s) of latency; results will be discarded",
                    info.gpu_buffer_count, args.gpu_latency
                ));
            }
            builder.initialize_with_gpu(device)
        }
        None => builder.initialize(),
    }
    .context("Failed to initialize load meter center")?;

    info!(
        "Simulating {} frames on {} cores, {} user meters, gpu={}",
        args.frames,
        center.core_count(),
        center.user_meter_count(),
        args.gpu
    );

    let mut in_flight: VecDeque<SimCommandBuffer> = VecDeque::new();
    for frame in 0..args.frames {
        center.begin_frame_measure();

        center.begin_measure(Some("prepare"), 0);
        spin(work(100, 0, frame));
        center.end_measure();

        run_workers(&mut center, frame);

        if let Some(device) = device.as_mut() {
            let mut cmd = device.command_buffer();
            center.begin_measure_gpu(&mut cmd, Some("shadow"), 1);
            cmd.work(work(900, 0, frame));
            center.end_measure_gpu(&mut cmd);
            center.begin_measure_gpu(&mut cmd, Some("lighting"), 2);
            cmd.work(work(1500, 1, frame));
            center.end_measure_gpu(&mut cmd);

            in_flight.push_back(cmd);
            while in_flight.len() > args.gpu_latency {
                if let Some(cmd) = in_flight.pop_front() {
                    device.submit(cmd);
                }
            }
            device.execute_submitted();
        }

        center.end_frame_measure(false);
        debug!("Frame {} done", frame);
    }

    if args.json {
        print_json(&center)?;
    } else {
        print_tables(&center)?;
    }

    let finalized = match device.as_mut() {
        Some(device) => center.finalize_with_gpu(device),
        None => center.finalize(),
    };
    finalized.map_err(|err| err.error())?;
    Ok(())
}

/// One worker thread per core meter, one per user meter
fn run_workers(center: &mut LoadMeterCenter, frame: u64) {
    let tracks = center.tracks();
    std::thread::scope(|s| {
        for (lane, core) in tracks.cores.iter_mut().enumerate() {
            s.spawn(move || {
                let mut update = core.scope(Some("update"), 1);
                spin(work(200, lane, frame));
                {
                    let _physics = update.scope(Some("physics"), 2);
                    spin(work(150, lane, frame));
                }
            });
        }
        for (lane, user) in tracks.users.iter_mut().enumerate() {
            s.spawn(move || {
                let _io = user.scope(Some("io"), 3);
                spin(work(80, lane, frame));
            });
        }
    });
}

fn print_json(center: &LoadMeterCenter) -> Result<()> {
    let report = Report {
        frames: center.frame_count(),
        last_frame_ms: center.last_frame_time().map(|t| t.as_secs_f64() * 1000.0),
        cpu: center.snapshot(Unit::Cpu),
        gpu: center.snapshot(Unit::Gpu),
        diagnostics: center.diagnostics(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_tables(center: &LoadMeterCenter) -> Result<()> {
    output::heading("LoadMeter simulation");
    output::field("Frames", center.frame_count());
    if let Some(last) = center.last_frame_time() {
        output::field("Last frame (ms)", format_millis(last));
    }
    let frame = center.get_result_all(Unit::Cpu, Some("Frame"), None, 0);
    output::field("Average frame (ms)", format_millis(frame.average_elapsed_time()));

    output::heading("Aggregates");
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    center.dump_to(&mut out)?;
    out.flush()?;

    let diagnostics = center.diagnostics();
    if diagnostics == loadmeter::Diagnostics::default() {
        output::success("No measurements lost");
    } else {
        output::warning(&format!("Measurement loss: {:?}", diagnostics));
    }
    Ok(())
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Command-line front-end for the streaming FFT audio detector.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use afm_codec::config::SharedConfig;
use afm_detector::audio::{self, InputStream};
use afm_detector::calibration::{CalibrationRun, CALIBRATION_SENSITIVITY_FACTOR};
use afm_detector::config::DetectorConfig;
use afm_detector::engine::{run_forever, Engine};
use afm_detector::http::Dispatcher;
use afm_detector::lock::LockFile;
use anyhow::{Context, Result};
use clap::Parser;

/// Listen on the microphone for acoustically-encoded fan speed changes and
/// forward them to a PWM controller as duty-cycle requests.
#[derive(Parser, Debug)]
#[command(name = "afm-detector")]
#[command(version)]
#[command(about = "Decode acoustic beep sequences into fan duty-cycle requests")]
struct Args {
    /// Optional TOML config file, overriding built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Controller host; empty string disables HTTP dispatch entirely
    #[arg(long)]
    host: Option<String>,

    /// Controller port
    #[arg(long)]
    port: Option<u16>,

    /// Seconds allowed for a controller request before it is timed out
    #[arg(long = "timeout")]
    timeout_s: Option<u64>,

    /// Input device index to use instead of the host default
    #[arg(long)]
    device: Option<usize>,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Override the detection sensitivity threshold
    #[arg(short, long)]
    sensitivity: Option<f64>,

    /// Run in calibration mode: print suggested SIG_SCALES/sensitivity instead of detecting
    #[arg(long)]
    calibrate: bool,

    /// PID lock file path
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// Enable debug output on stderr, repeat for trace level output
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.debug {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();

    if args.list_devices {
        for (i, name) in audio::list_devices()?.iter().enumerate() {
            println!("{i}: {name}");
        }
        return Ok(());
    }

    let mut detector_cfg = match &args.config {
        Some(path) => DetectorConfig::from_file(path)
            .with_context(|| format!("failed to load config file {path:?}"))?,
        None => DetectorConfig::default(),
    };
    if let Some(host) = args.host {
        detector_cfg.host = host;
    }
    if let Some(port) = args.port {
        detector_cfg.port = port;
    }
    if let Some(timeout_s) = args.timeout_s {
        detector_cfg.timeout_s = timeout_s;
    }
    if args.device.is_some() {
        detector_cfg.device = args.device;
    }
    if let Some(path) = &args.lock_file {
        detector_cfg.lock_file = path.display().to_string();
    }

    let mut shared = SharedConfig::default();
    if let Some(sensitivity) = args.sensitivity {
        shared.sensitivity = sensitivity;
    }

    let _lock = LockFile::acquire(&detector_cfg.lock_file).context("failed to acquire lock file")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
        })
        .context("failed to install signal handler")?;
    }

    let mut stream = InputStream::open(
        afm_codec::config::FRAME_SAMPLES,
        afm_codec::config::SAMPLING_RATE,
        detector_cfg.device,
    )
    .context("failed to open audio input")?;

    if args.calibrate {
        return run_calibration(&mut stream, &shared, &shutdown);
    }

    let dispatcher = if detector_cfg.controller_enabled() {
        let chunk_duration = 1.0 / afm_codec::config::frame_rate();
        let dispatcher = Dispatcher::new(detector_cfg.base_url(), detector_cfg.timeout_s, chunk_duration)
            .context("failed to start the HTTP dispatch runtime")?;
        dispatcher.enable();
        Some(dispatcher)
    } else {
        log::warn!("no controller host configured; decoded duty cycles will only be logged");
        None
    };

    let mut engine = Engine::new(&shared, &detector_cfg, dispatcher);
    run_forever(&mut engine, &mut stream, &shutdown).context("detection loop aborted")?;
    log::info!("shutting down");
    Ok(())
}

fn run_calibration(stream: &mut InputStream, shared: &SharedConfig, shutdown: &AtomicBool) -> Result<()> {
    use afm_detector::fft::FftProcessor;

    println!("Calibration mode: play a representative fan-speed beep sequence now.");
    println!("Press Ctrl-C when done.");

    let mut fft = FftProcessor::new(afm_codec::config::FRAME_SAMPLES);
    let mut run = CalibrationRun::new(shared.sig_bins);
    let mut samples = vec![0i16; stream.frame_len()];
    let reduced_sensitivity = shared.sensitivity * CALIBRATION_SENSITIVITY_FACTOR;
    log::info!("calibrating at reduced sensitivity {reduced_sensitivity:.2}");

    while !shutdown.load(Ordering::Relaxed) {
        stream.read_frame(&mut samples);
        let spectrum = fft.magnitude_spectrum(&samples);
        run.observe(&samples, spectrum);
    }

    let report = run.finish();
    println!("\nCalibration finished after {} frames.", report.frames);
    if report.clipping_warning {
        println!("WARNING: input clipped; move the microphone further from the buzzer.");
    }
    if report.silence_warning {
        println!("WARNING: almost no signal detected; check the microphone and buzzer placement.");
    }
    println!("Suggested sig_scales = {:?}", report.suggested_sig_scales.0);
    println!("Suggested sensitivity = {:.2}", report.suggested_sensitivity);
    for (tone, shift) in report.suggested_bin_shift.iter().enumerate() {
        if *shift != 0 {
            println!(
                "Tone {tone}: actual peak is {shift:+} bins from the configured one; consider retuning sig_bins."
            );
        }
    }
    Ok(())
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Command-line front-end for the G-code post-processor.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use afm_codec::config::SharedConfig;
use afm_encoder::EncoderOptions;
use anyhow::{Context, Result};
use clap::Parser;

/// Convert `M106`/`M107` fan speed commands into buzzer beep sequences that
/// `afm-detector` can pick up from the printer's own speaker.
#[derive(Parser, Debug)]
#[command(name = "afm-encoder")]
#[command(version)]
#[command(about = "Post-process G-code to encode fan speed as acoustic beep sequences")]
struct Args {
    /// File to process ("-" for standard input)
    in_file: PathBuf,

    /// Optional file to write to (default is standard output)
    #[arg(short, long)]
    out_file: Option<PathBuf>,

    /// Allow splitting long moves to maintain correct lead time; may cause visible seams
    #[arg(short, long)]
    allow_split: bool,

    /// Enable debug output on stderr, repeat for trace level output
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Append a comment with estimated nonzero time to each line
    #[arg(short = 'i', long = "timings")]
    emit_timings: bool,

    /// Output the file without doing fan command processing, useful with --timings
    #[arg(short = 'P', long)]
    no_process: bool,

    /// Z coordinate below which fan speed will be linearly ramped up
    #[arg(short, long)]
    zmax: Option<f64>,

    /// Scale factor for linear fan ramp-up curve at Z = 0
    #[arg(short, long)]
    scale0: Option<f64>,

    /// Number of seconds (approximately) to advance beep commands
    #[arg(short = 't', long)]
    lead_time: Option<f64>,

    /// Factor between speed in mm/s and feedrate
    #[arg(short, long)]
    feed_factor: Option<f64>,

    /// Maximum feedrate for the Z axis
    #[arg(short = 'l', long)]
    feed_limit_z: Option<f64>,

    /// Maximum number of buffered G-code lines held in the sliding window
    #[arg(long, default_value_t = 128)]
    max_buffer: usize,

    /// Custom end-of-print marker line, for slicers other than the default profile
    #[arg(long)]
    end_marker: Option<String>,
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

    let mut config = SharedConfig::default();
    if let Some(z) = args.zmax {
        config.ramp_up_zmax = z;
    }
    if let Some(s) = args.scale0 {
        config.ramp_up_scale0 = s;
    }
    if let Some(t) = args.lead_time {
        config.lead_time = t;
    }
    if let Some(f) = args.feed_factor {
        config.feed_factor = f;
    }
    if let Some(l) = args.feed_limit_z {
        config.feed_limit_z = l;
    }

    let mut options = EncoderOptions {
        allow_split: args.allow_split,
        emit_timings: args.emit_timings,
        no_process: args.no_process,
        max_buffer: args.max_buffer,
        ..EncoderOptions::default()
    };
    if let Some(marker) = args.end_marker {
        options.end_marker = marker;
    }

    let mut reader: Box<dyn io::BufRead> = if args.in_file == PathBuf::from("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.in_file)
            .with_context(|| format!("failed to open input file {:?}", args.in_file))?;
        Box::new(BufReader::new(file))
    };

    let mut writer: Box<dyn Write> = match &args.out_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create output file {path:?}"))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout())),
    };

    afm_encoder::run(&mut reader, &mut writer, config, options)
        .context("encoder pass failed")?;
    writer.flush().context("failed to flush output")?;
    Ok(())
}

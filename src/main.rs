//! # force_daq entry point
//! Records simulated force/torque sensors and converts recordings offline.
//!
//! ## Commands
//! - **record:** bias, then `periods` start/pause cycles of `period-secs` each,
//!   one soft trigger per period, written to `<out-dir>/<name>`.
//! - **convert:** rebuild the time column of a recording (or of every
//!   unconverted recording in a folder) into `<dir>/converted/`.
//!
//! Logging goes through `env_logger`; set `RUST_LOG=info` to follow a session.

use std::{path::PathBuf, process::ExitCode, thread, time::Duration};

use clap::{Args, Parser, Subcommand};
use log::{error, info};

use force_daq::{
    DataRecorder, FileOptions, ReconcileConfig, RecorderConfig, Result, SensorSettings,
    convert_path,
};

/// Gap left between two periods; longer than the reconciler's pause criterion.
const INTER_PERIOD_GAP: Duration = Duration::from_millis(800);

#[derive(Debug, Parser)]
#[command(version, about)]
struct DaqArgs {
    #[command(subcommand)]
    command: DaqCommand,
}

#[derive(Debug, Subcommand)]
enum DaqCommand {
    /// Record a session from simulated sensors
    Record(RecordCommand),
    /// Convert recordings to a regular time column
    Convert(ConvertCommand),
}

#[derive(Debug, Args)]
struct RecordCommand {
    /// TOML recorder configuration; overrides --sensors
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of simulated sensors (device ids 1..=N)
    #[arg(short, long, default_value_t = 1)]
    sensors: u16,

    /// Number of start/pause cycles
    #[arg(short, long, default_value_t = 2)]
    periods: u32,

    /// Length of one recording period, in seconds
    #[arg(long = "period-secs", default_value_t = 3.0)]
    period_secs: f64,

    /// Output directory
    #[arg(short = 'o', long = "out-dir", default_value = "data")]
    out_dir: PathBuf,

    /// Output file name
    #[arg(short, long, default_value = force_daq::recording::writer::DEFAULT_FILENAME)]
    name: String,

    /// Write a gzip-compressed file
    #[arg(short, long)]
    zipped: bool,

    /// Listen for remote control on the configured UDP port
    #[arg(short, long)]
    udp: bool,
}

#[derive(Debug, Args)]
struct ConvertCommand {
    /// Recording file, or folder of recordings
    path: PathBuf,

    /// Device whose time column is rebuilt
    #[arg(short, long, default_value_t = 1)]
    device: u16,

    /// Accept a trailing period without pause event
    #[arg(long)]
    allow_open_periods: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = DaqArgs::parse();

    let result = match args.command {
        DaqCommand::Record(cmd) => run_record(cmd),
        DaqCommand::Convert(cmd) => run_convert(cmd),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn recorder_config(cmd: &RecordCommand) -> Result<RecorderConfig> {
    let mut config = match &cmd.config {
        Some(path) => RecorderConfig::from_toml_file(path)?,
        None => RecorderConfig {
            sensors: (1..=cmd.sensors.max(1))
                .map(|id| SensorSettings::new(id, &format!("SIM{}", id)))
                .collect(),
            ..RecorderConfig::default()
        },
    };
    config.poll_remote |= cmd.udp;
    Ok(config)
}

fn run_record(cmd: RecordCommand) -> Result<()> {
    let config = recorder_config(&cmd)?;
    let bias_samples = config.bias_samples;
    info!("=== RECORDING START ({} sensors) ===", config.sensors.len());

    let mut recorder = DataRecorder::simulated(config, None)?;
    for (device, e) in recorder.construction_errors() {
        println!("sensor {} not available: {}", device, e);
    }

    let opts = FileOptions {
        directory: cmd.out_dir.clone(),
        zipped: cmd.zipped,
        ..FileOptions::default()
    };
    let path = recorder.open_data_file(&cmd.name, &opts)?;
    println!("Recording to {}", path.display());

    recorder.determine_biases(bias_samples)?;
    let period = Duration::from_secs_f64(cmd.period_secs.max(0.0));

    for n in 1..=cmd.periods {
        if n > 1 {
            thread::sleep(INTER_PERIOD_GAP);
        }
        recorder.start_recording()?;
        recorder.save_soft_trigger(format!("period {}", n), None);
        thread::sleep(period);
        let data = recorder.pause_recording()?;
        println!("period {}: {} items", n, data.len());
        for w in recorder.workers() {
            println!("  device {}: {} samples", w.device_id(), recorder.sample_count(w.device_id()));
        }
    }

    recorder.quit()?;
    info!("=== RECORDING FINISHED ===");
    Ok(())
}

fn run_convert(cmd: ConvertCommand) -> Result<()> {
    let config = ReconcileConfig {
        allow_open_periods: cmd.allow_open_periods,
        ..ReconcileConfig::default()
    };
    let written = convert_path(&cmd.path, cmd.device, &config)?;
    if written.is_empty() {
        println!("Nothing to convert in {}", cmd.path.display());
    }
    for p in written {
        println!("Converted: {}", p.display());
    }
    Ok(())
}

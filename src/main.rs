//! Loopmeter - hardware audio loopback measurement
//!
//! Command line front end: runs a measurement, reports device capabilities
//! and writes a starter configuration file.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use loopmeter::audio::device::{supported_apis, DeviceCapabilities, DeviceQuery, DirectionInfo};
use loopmeter::audio::signal::ToneGenerator;
use loopmeter::{
    Advisory, CalibrationSource, CaptureBackend, LoopbackMeasurement, MeasurementConfig,
    MeasurementResult, ProcessBackend, SimulatedLoopback, Stimulus,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("loopmeter=info,loopmeter_core=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("loopmeter error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "loopmeter",
    version = loopmeter::VERSION,
    about = "Play a stimulus through an audio interface loopback and return calibrated, aligned signals"
)]
struct Cli {
    /// Configuration file (defaults to <data_dir>/loopmeter/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<()> {
        match self.command {
            Command::Measure(args) => measure_command(load_config(self.config)?, args),
            Command::Devices => devices_command(&load_config(self.config)?),
            Command::InitConfig(args) => init_config_command(self.config, args),
            Command::Version => {
                println!("loopmeter {} (built {})", loopmeter::VERSION, loopmeter::BUILD_DATE);
                Ok(())
            }
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<MeasurementConfig> {
    match path {
        Some(path) => MeasurementConfig::load_from(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(MeasurementConfig::load()),
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one loopback measurement
    Measure(MeasureArgs),
    /// Show the playback and capture device capabilities
    Devices,
    /// Write a configuration file populated with defaults
    InitConfig(InitConfigArgs),
    /// Print version and build date
    Version,
}

#[derive(Args, Debug)]
struct MeasureArgs {
    /// Stimulus text file (one row per sample, one column per channel)
    #[arg(long, conflicts_with_all = ["frequency", "duration"])]
    stimulus: Option<PathBuf>,

    /// Sine stimulus frequency in Hz
    #[arg(long, default_value_t = 1000.0)]
    frequency: f64,

    /// Sine stimulus amplitude (0.0 - 1.0)
    #[arg(long, default_value_t = 0.5)]
    amplitude: f64,

    /// Sine stimulus duration in seconds
    #[arg(long, default_value_t = 1.0)]
    duration: f64,

    /// Override the configured sample rate
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Latency margin in seconds added before and after the stimulus
    #[arg(long)]
    latency: Option<f64>,

    /// Captured channel to keep, 1-based (repeatable; default all)
    #[arg(long = "channel")]
    channels: Vec<usize>,

    /// Calibration JSON file
    #[arg(long, conflicts_with = "calibration_name")]
    calibration: Option<PathBuf>,

    /// Named calibration from the calibration directory
    #[arg(long)]
    calibration_name: Option<String>,

    /// Use the in-process loopback instead of the capture program
    #[arg(long)]
    simulate: bool,

    /// Gain of the simulated loopback
    #[arg(long, default_value_t = 1.0, requires = "simulate")]
    sim_gain: f64,

    /// Delay of the simulated loopback in samples
    #[arg(long, default_value_t = 0, requires = "simulate")]
    sim_delay: usize,

    /// Continue past clipping warnings without asking
    #[arg(long, short = 'y')]
    yes: bool,

    /// Write the full result as JSON
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InitConfigArgs {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

fn measure_command(mut config: MeasurementConfig, args: MeasureArgs) -> Result<()> {
    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if args.latency.is_some() {
        config.latency = args.latency;
    }
    if !args.channels.is_empty() {
        config.channels = args.channels.clone();
    }
    if let Some(path) = &args.calibration {
        config.calibration = Some(CalibrationSource::File(path.clone()));
    } else if let Some(name) = &args.calibration_name {
        config.calibration = Some(CalibrationSource::Named(name.clone()));
    }

    let stimulus = build_stimulus(&args, config.sample_rate)?;
    info!(
        samples = stimulus.len(),
        channels = stimulus.channel_count(),
        sample_rate = stimulus.sample_rate(),
        "Stimulus ready"
    );

    let backend: Box<dyn CaptureBackend> = if args.simulate {
        if config.device.output.is_unknown() || config.device.input.is_unknown() {
            config.device = simulated_capabilities(
                stimulus.channel_count(),
                config.device.input.channels.max(1),
                config.sample_rate,
            )?;
        }
        Box::new(SimulatedLoopback::new(
            args.sim_gain,
            args.sim_delay,
            config.device.input.channels.max(1),
        ))
    } else {
        let Some(program) = config.capture_program.clone() else {
            bail!("no capture_program configured; set it in the config file or pass --simulate");
        };
        Box::new(ProcessBackend::new(program).with_args(config.capture_args.clone()))
    };

    let mut measurement = LoopbackMeasurement::new(config, backend);
    if !args.yes {
        measurement = measurement.with_confirmation(confirm_on_stdin);
    }

    let result = measurement.run(&stimulus)?;
    print_summary(&result);

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Result written");
    }
    Ok(())
}

fn build_stimulus(args: &MeasureArgs, sample_rate: u32) -> Result<Stimulus> {
    if let Some(path) = &args.stimulus {
        return Stimulus::from_file(path, sample_rate)
            .with_context(|| format!("reading stimulus {}", path.display()));
    }
    if !(args.duration.is_finite() && args.duration > 0.0) {
        bail!("--duration must be positive, got {}", args.duration);
    }
    let length = (args.duration * sample_rate as f64).round() as usize;
    let mut tone = ToneGenerator::new(args.frequency, args.amplitude, sample_rate);
    Ok(Stimulus::mono(tone.take(length), sample_rate)?)
}

/// Device capabilities describing the in-process loopback on this host
fn simulated_capabilities(
    output_channels: usize,
    input_channels: usize,
    sample_rate: u32,
) -> Result<DeviceCapabilities> {
    let Some(api) = supported_apis(std::env::consts::OS).first() else {
        bail!("no audio API known for {}", std::env::consts::OS);
    };
    let direction = |channels| DirectionInfo {
        name: "simulated loopback".to_string(),
        api: api.to_string(),
        channels,
        sample_rates: vec![sample_rate],
    };
    Ok(DeviceCapabilities {
        output: direction(output_channels),
        input: direction(input_channels),
    })
}

fn confirm_on_stdin(advisory: &Advisory) -> bool {
    print!("{advisory}. Continue anyway? [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn print_summary(result: &MeasurementResult) {
    println!();
    println!("Measurement ({})", result.measured_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Sample rate:      {} Hz", result.sample_rate);
    println!("  Samples:          {}", result.len());
    println!("  Padding:          {} samples per side", result.pad_samples);
    println!("  Channels kept:    {:?}", result.channels);
    println!("  DUT input unit:   {}", result.dut_in_unit);
    println!("  DUT output unit:  {}", result.dut_out_unit);
    match result.stimulus_rms {
        Some(rms) => println!("  Stimulus RMS:     {:.6} {}", rms, result.dut_in_unit),
        None => println!("  Stimulus RMS:     unavailable (no DAC calibration)"),
    }
    if !result.advisories.is_empty() {
        println!("  Advisories:");
        for advisory in result.advisories.iter() {
            println!("    - {advisory}");
        }
    }
}

fn devices_command(config: &MeasurementConfig) -> Result<()> {
    let caps = query_devices(config)?;
    println!("{}", serde_json::to_string_pretty(&caps)?);
    match caps.validate() {
        Ok(()) => println!("Devices usable on {}", std::env::consts::OS),
        Err(e) => println!("Devices not usable: {e}"),
    }
    Ok(())
}

#[cfg(feature = "cpal-devices")]
fn query_devices(_config: &MeasurementConfig) -> Result<DeviceCapabilities> {
    Ok(loopmeter::audio::device::HostDeviceQuery.capabilities()?)
}

#[cfg(not(feature = "cpal-devices"))]
fn query_devices(config: &MeasurementConfig) -> Result<DeviceCapabilities> {
    let query = loopmeter::audio::device::StaticDeviceQuery::new(config.device.clone());
    Ok(query.capabilities()?)
}

fn init_config_command(path: Option<PathBuf>, args: InitConfigArgs) -> Result<()> {
    let path = path.unwrap_or_else(MeasurementConfig::path);
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    MeasurementConfig::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

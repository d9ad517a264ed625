//! Loopback measurement pipeline
//!
//! One call to [`LoopbackMeasurement::run`] performs a complete measurement:
//! - Validate the device and platform, load the calibration
//! - Pad the stimulus and write it to a per-call scratch directory
//! - Hand it to the capture backend and parse the capture it writes
//! - Select channels, check for clipping, reload the padded stimulus
//! - Calibrate both branches and compute the stimulus RMS
//!
//! The scratch directory is removed on every exit path when it is dropped.

use crate::advisory::{Advisories, Advisory};
use crate::audio::backend::{CaptureBackend, CaptureRequest};
use crate::audio::calibration::{calibrate, Calibration, RawSignals};
use crate::audio::capture::{detect_clipping, read_capture_file};
use crate::audio::device::{DeviceQuery, StaticDeviceQuery};
use crate::audio::stimulus::{self, read_stimulus_file, Stimulus};
use crate::config::MeasurementConfig;
use crate::error::{MeasurementError, MeasurementResultOf};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stimulus file name inside the scratch directory
const STIMULUS_FILE: &str = "stimulus.txt";

/// Capture file name inside the scratch directory
const CAPTURE_FILE: &str = "capture.txt";

/// Callback deciding whether to continue after an advisory that needs confirmation
pub type ConfirmFn = Box<dyn Fn(&Advisory) -> bool>;

/// Time-aligned, unit-labelled result of one measurement
#[derive(Debug, Clone, Serialize)]
pub struct MeasurementResult {
    /// Response at the DUT output, one vector per retained channel
    pub dut_out: Vec<Vec<f64>>,
    /// Stimulus at the DUT input, one vector per stimulus channel (padded)
    pub dut_in: Vec<Vec<f64>>,
    /// Time vector of the capture branch
    pub time: Vec<f64>,
    /// Time vector of the stimulus branch
    pub dut_in_time: Vec<f64>,
    pub dut_out_unit: String,
    pub dut_in_unit: String,
    /// Calibrated RMS of the unpadded stimulus; None when no DAC calibration applied
    pub stimulus_rms: Option<f64>,
    pub sample_rate: u32,
    /// Zero samples added on each side of the stimulus
    pub pad_samples: usize,
    /// 1-based capture channel of each `dut_out` entry
    pub channels: Vec<usize>,
    pub advisories: Advisories,
    pub measured_at: DateTime<Utc>,
}

impl MeasurementResult {
    /// Samples per channel
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Measurement pipeline bound to a configuration and a capture backend
pub struct LoopbackMeasurement<B: CaptureBackend> {
    config: MeasurementConfig,
    backend: B,
    devices: Box<dyn DeviceQuery>,
    confirm: Option<ConfirmFn>,
}

impl<B: CaptureBackend> LoopbackMeasurement<B> {
    /// Create a pipeline using the device capabilities from `config`
    pub fn new(config: MeasurementConfig, backend: B) -> Self {
        let devices = Box::new(StaticDeviceQuery::new(config.device.clone()));
        Self {
            config,
            backend,
            devices,
            confirm: None,
        }
    }

    /// Replace the device capability source
    pub fn with_device_query(mut self, devices: impl DeviceQuery + 'static) -> Self {
        self.devices = Box::new(devices);
        self
    }

    /// Ask `confirm` before continuing past a clipping advisory
    ///
    /// Returning `false` aborts the measurement.
    pub fn with_confirmation(mut self, confirm: impl Fn(&Advisory) -> bool + 'static) -> Self {
        self.confirm = Some(Box::new(confirm));
        self
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn load_calibration(&self) -> MeasurementResultOf<Calibration> {
        match &self.config.calibration {
            Some(source) => source.resolve(&self.config.calibration_dir),
            None => Ok(Calibration::none()),
        }
    }

    /// Run one complete measurement
    pub fn run(&self, stimulus: &Stimulus) -> MeasurementResultOf<MeasurementResult> {
        let mut advisories = Advisories::new();
        let sample_rate = stimulus.sample_rate();
        if sample_rate != self.config.sample_rate {
            return Err(MeasurementError::SampleRateMismatch {
                configured: self.config.sample_rate,
                stimulus: sample_rate,
            });
        }

        let caps = self.devices.capabilities()?;
        caps.validate()?;
        for direction in [&caps.output, &caps.input] {
            if !direction.sample_rates.is_empty() && !direction.supports_rate(sample_rate) {
                advisories.raise(Advisory::SampleRateNotListed {
                    sample_rate,
                    supported: direction.sample_rates.clone(),
                });
                break;
            }
        }

        let calibration = self.load_calibration()?;

        let mut prepared = stimulus::prepare(stimulus, self.config.latency, caps.output.channels)?;
        advisories.absorb(std::mem::take(&mut prepared.advisories));

        let workdir = tempfile::Builder::new().prefix("loopmeter-").tempdir()?;
        let request = CaptureRequest {
            sample_rate,
            stimulus_path: workdir.path().join(STIMULUS_FILE),
            output_path: workdir.path().join(CAPTURE_FILE),
            timeout: self.config.capture_timeout(stimulus.duration_secs() + 2.0 * prepared.latency_secs),
        };
        prepared.write_to(&request.stimulus_path)?;

        tracing::info!(
            device = %caps.output.name,
            sample_rate,
            channels = stimulus.channel_count(),
            samples = prepared.len(),
            pad_samples = prepared.pad_samples,
            "Starting loopback capture"
        );
        self.backend.invoke(&request)?;

        let mut parsed = read_capture_file(&request.output_path)?;
        advisories.absorb(std::mem::take(&mut parsed.advisories));
        if parsed.declared_channels != caps.input.channels {
            tracing::debug!(
                declared = parsed.declared_channels,
                device = caps.input.channels,
                "Capture channel count differs from device"
            );
        }

        let matrix = parsed.matrix.select(&self.config.channels)?;
        for advisory in detect_clipping(&matrix) {
            advisories.raise(advisory.clone());
            if let Some(confirm) = &self.confirm {
                if advisory.needs_confirmation() && !confirm(&advisory) {
                    return Err(MeasurementError::Aborted(advisory.to_string()));
                }
            }
        }

        let dut_in_raw = read_stimulus_file(&request.stimulus_path)?;
        let stimulus_len = dut_in_raw.first().map(Vec::len).unwrap_or(0);
        if stimulus_len != matrix.len() {
            return Err(MeasurementError::AlignmentMismatch {
                captured: matrix.len(),
                stimulus: stimulus_len,
            });
        }

        let channels = matrix.indices().to_vec();
        let (time, dut_out_raw) = matrix.into_parts();
        let mut outcome = calibrate(
            RawSignals {
                dut_in: &dut_in_raw,
                dut_out: &dut_out_raw,
                time: &time,
                original: stimulus.channels(),
            },
            &calibration,
        )?;
        advisories.absorb(std::mem::take(&mut outcome.advisories));

        tracing::info!(
            samples = time.len(),
            channels = channels.len(),
            dut_in_unit = %outcome.dut_in.unit,
            dut_out_unit = %outcome.dut_out.unit,
            stimulus_rms = ?outcome.stimulus_rms,
            advisories = advisories.len(),
            "Loopback measurement complete"
        );

        Ok(MeasurementResult {
            dut_out: outcome.dut_out.channels,
            dut_in: outcome.dut_in.channels,
            time: outcome.dut_out.time,
            dut_in_time: outcome.dut_in.time,
            dut_out_unit: outcome.dut_out.unit,
            dut_in_unit: outcome.dut_in.unit,
            stimulus_rms: outcome.stimulus_rms,
            sample_rate,
            pad_samples: prepared.pad_samples,
            channels,
            advisories,
            measured_at: Utc::now(),
        })
    }
}

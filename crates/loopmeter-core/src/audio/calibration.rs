//! Calibration descriptors and the two-branch calibration engine
//!
//! A [`Calibration`] holds up to three transfers:
//! - `dac`: normalized stimulus samples to the physical signal at the DUT input
//! - `adc`: normalized captured samples to the electrical signal at the ADC input
//! - `sensor`: electrical signal to the physical quantity at the DUT output
//!
//! The stimulus branch uses `dac`; the capture branch uses `adc` followed by
//! `sensor` and needs both. A branch with incomplete data is left uncalibrated
//! with the [`UNKNOWN_UNIT`] label.
//!
//! ## RMS bookkeeping
//!
//! The stimulus reloaded after the round trip is zero padded, so its RMS is
//! diluted. The calibrated/raw RMS ratio `k` of that padded signal carries the
//! DAC gain over to the original, unpadded stimulus:
//!
//! ```text
//! stimulus_rms = RMS(dac(padded)) / RMS(padded) * RMS(original)
//! ```

use crate::advisory::{Advisories, Advisory, CalibrationStage};
use crate::audio::signal;
use crate::error::{MeasurementError, MeasurementResultOf};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Unit label for uncalibrated signals
pub const UNKNOWN_UNIT: &str = "???";

/// Output of a single transfer
#[derive(Debug, Clone, PartialEq)]
pub struct Calibrated {
    pub signal: Vec<f64>,
    pub time: Vec<f64>,
    pub unit: String,
}

/// A sub-calibration mapping one signal stream to another
///
/// The transfer may rewrite the time vector, e.g. to remove a group delay.
pub trait SignalTransfer {
    fn apply(&self, signal: &[f64], time: &[f64]) -> Calibrated;
}

/// Linear sub-calibration: `y = gain * x`, `t' = t - delay`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// Output units per input unit
    pub gain: f64,
    /// Unit label of the output
    pub unit: String,
    /// Constant group delay removed from the time vector (seconds)
    #[serde(default)]
    pub delay: f64,
}

impl Transfer {
    /// Pure gain without delay
    pub fn gain(gain: f64, unit: impl Into<String>) -> Self {
        Self {
            gain,
            unit: unit.into(),
            delay: 0.0,
        }
    }

    /// Gain with a group delay correction
    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }
}

impl SignalTransfer for Transfer {
    fn apply(&self, signal: &[f64], time: &[f64]) -> Calibrated {
        let time = if self.delay == 0.0 {
            time.to_vec()
        } else {
            time.iter().map(|t| t - self.delay).collect()
        };
        Calibrated {
            signal: signal.iter().map(|x| x * self.gain).collect(),
            time,
            unit: self.unit.clone(),
        }
    }
}

/// Calibration descriptor
///
/// Every field is optional; an empty descriptor means uncalibrated operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Human-readable name, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub dac: Option<Transfer>,
    #[serde(default)]
    pub sensor: Option<Transfer>,
    #[serde(default)]
    pub adc: Option<Transfer>,
}

impl Calibration {
    /// Descriptor with no sub-calibrations
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.dac.is_none() && self.sensor.is_none() && self.adc.is_none()
    }

    /// Load a JSON descriptor
    pub fn load(path: &Path) -> MeasurementResultOf<Self> {
        let load_err = |reason: String| MeasurementError::CalibrationLoad {
            path: path.to_path_buf(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let calibration: Self =
            serde_json::from_str(&contents).map_err(|e| load_err(e.to_string()))?;
        tracing::info!(
            path = %path.display(),
            dac = calibration.dac.is_some(),
            sensor = calibration.sensor.is_some(),
            adc = calibration.adc.is_some(),
            "Loaded calibration"
        );
        Ok(calibration)
    }

    /// Save as pretty-printed JSON, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Combined SENSOR + ADC transfer, if both are present
    fn capture_chain(&self) -> Option<(&Transfer, &Transfer)> {
        Some((self.adc.as_ref()?, self.sensor.as_ref()?))
    }
}

/// Where a measurement gets its calibration from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    /// Descriptor given by value
    Inline(Calibration),
    /// JSON file path
    File(PathBuf),
    /// `<calibration_dir>/<name>.json`
    Named(String),
}

impl CalibrationSource {
    /// Resolve to a descriptor
    pub fn resolve(&self, calibration_dir: &Path) -> MeasurementResultOf<Calibration> {
        match self {
            CalibrationSource::Inline(c) => Ok(c.clone()),
            CalibrationSource::File(path) => Calibration::load(path),
            CalibrationSource::Named(name) => {
                Calibration::load(&calibration_dir.join(format!("{}.json", name)))
            }
        }
    }
}

/// A calibrated (or passed-through) signal branch
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// Channel-major samples
    pub channels: Vec<Vec<f64>>,
    /// Authoritative time vector for this branch
    pub time: Vec<f64>,
    pub unit: String,
}

impl Branch {
    fn uncalibrated(channels: &[Vec<f64>], time: &[f64]) -> Self {
        Self {
            channels: channels.to_vec(),
            time: time.to_vec(),
            unit: UNKNOWN_UNIT.to_string(),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.unit != UNKNOWN_UNIT
    }
}

/// Output of [`calibrate`]
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    /// Stimulus at the DUT input
    pub dut_in: Branch,
    /// Response at the DUT output
    pub dut_out: Branch,
    /// Calibrated RMS of the original, unpadded stimulus
    pub stimulus_rms: Option<f64>,
    pub advisories: Advisories,
}

/// Raw inputs to the calibration engine
#[derive(Debug, Clone, Copy)]
pub struct RawSignals<'a> {
    /// Padded stimulus reloaded after the round trip (channel-major)
    pub dut_in: &'a [Vec<f64>],
    /// Captured response (channel-major)
    pub dut_out: &'a [Vec<f64>],
    /// Capture time vector, shared by both raw signals
    pub time: &'a [f64],
    /// Original stimulus before padding (channel-major)
    pub original: &'a [Vec<f64>],
}

/// Apply a calibration descriptor to both signal branches
pub fn calibrate(raw: RawSignals<'_>, calibration: &Calibration) -> MeasurementResultOf<CalibrationOutcome> {
    let mut advisories = Advisories::new();

    if calibration.is_empty() {
        tracing::info!("No calibration data, returning raw signals");
        return Ok(CalibrationOutcome {
            dut_in: Branch::uncalibrated(raw.dut_in, raw.time),
            dut_out: Branch::uncalibrated(raw.dut_out, raw.time),
            stimulus_rms: None,
            advisories,
        });
    }

    let (dut_in, stimulus_rms) = match &calibration.dac {
        Some(dac) => {
            let (branch, rms) = calibrate_stimulus(raw, dac)?;
            (branch, Some(rms))
        }
        None => {
            advisories.raise(Advisory::CalibrationSkipped {
                stage: CalibrationStage::Dac,
                reason: "no DAC calibration data".to_string(),
            });
            (Branch::uncalibrated(raw.dut_in, raw.time), None)
        }
    };

    let dut_out = match calibration.capture_chain() {
        Some((adc, sensor)) => calibrate_capture(raw, adc, sensor),
        None => {
            let missing = if calibration.adc.is_none() && calibration.sensor.is_none() {
                "no SENSOR or ADC calibration data"
            } else if calibration.adc.is_none() {
                "no ADC calibration data"
            } else {
                "no SENSOR calibration data"
            };
            advisories.raise(Advisory::CalibrationSkipped {
                stage: CalibrationStage::SensorAdc,
                reason: missing.to_string(),
            });
            Branch::uncalibrated(raw.dut_out, raw.time)
        }
    };

    Ok(CalibrationOutcome {
        dut_in,
        dut_out,
        stimulus_rms,
        advisories,
    })
}

fn calibrate_stimulus(raw: RawSignals<'_>, dac: &Transfer) -> MeasurementResultOf<(Branch, f64)> {
    let raw_rms = signal::rms_all(raw.dut_in)?;
    let original_rms = signal::rms_all(raw.original)?;

    let mut channels = Vec::with_capacity(raw.dut_in.len());
    let mut time = raw.time.to_vec();
    for ch in raw.dut_in {
        let out = dac.apply(ch, raw.time);
        channels.push(out.signal);
        time = out.time;
    }
    let calibrated_rms = signal::rms_all(&channels)?;

    // An all-zero stimulus stays zero under any gain
    let k = if raw_rms > 0.0 {
        calibrated_rms / raw_rms
    } else {
        0.0
    };
    let stimulus_rms = k * original_rms;

    tracing::info!(
        raw_rms,
        calibrated_rms,
        scale = k,
        stimulus_rms,
        unit = %dac.unit,
        "DAC calibration applied"
    );

    Ok((
        Branch {
            channels,
            time,
            unit: dac.unit.clone(),
        },
        stimulus_rms,
    ))
}

fn calibrate_capture(raw: RawSignals<'_>, adc: &Transfer, sensor: &Transfer) -> Branch {
    let mut channels = Vec::with_capacity(raw.dut_out.len());
    let mut time = raw.time.to_vec();
    for ch in raw.dut_out {
        let electrical = adc.apply(ch, raw.time);
        let physical = sensor.apply(&electrical.signal, &electrical.time);
        channels.push(physical.signal);
        time = physical.time;
    }

    tracing::info!(
        channels = channels.len(),
        unit = %sensor.unit,
        "SENSOR+ADC calibration applied"
    );

    Branch {
        channels,
        time,
        unit: sensor.unit.clone(),
    }
}

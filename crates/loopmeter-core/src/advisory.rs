//! Non-fatal measurement conditions
//!
//! Advisories are raised by the pipeline stages, logged as warnings, and
//! handed back to the caller with the measurement result. None of them stop
//! the pipeline on their own.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Calibration branch that was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CalibrationStage {
    /// Stimulus side (DAC/buffer)
    Dac,
    /// Capture side (SENSOR + ADC)
    SensorAdc,
}

/// A condition worth reporting that does not abort the measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Advisory {
    /// Requested sample rate is not in the device's advertised list
    SampleRateNotListed { sample_rate: u32, supported: Vec<u32> },
    /// No latency margin given; the device-class default was used
    LatencyUnspecified { default_secs: f64 },
    /// Latency margin is below the device-class default (includes zero)
    LatencyBelowRecommended { latency_secs: f64, recommended_secs: f64 },
    /// A calibration branch was skipped because its data is incomplete
    CalibrationSkipped { stage: CalibrationStage, reason: String },
    /// The capture header sentinel was never reached
    TruncatedCapture,
    /// A retained channel reached 95% of full scale
    PossibleClipping {
        channel: usize,
        peak: f64,
        proportion: f64,
    },
}

impl Advisory {
    /// Whether the caller should be asked before the pipeline continues
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Advisory::PossibleClipping { .. })
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::SampleRateNotListed {
                sample_rate,
                supported,
            } => write!(
                f,
                "sample rate {} Hz is not listed for the device (supported: {:?})",
                sample_rate, supported
            ),
            Advisory::LatencyUnspecified { default_secs } => write!(
                f,
                "latency not specified, using {:.3} s; the capture may be truncated",
                default_secs
            ),
            Advisory::LatencyBelowRecommended {
                latency_secs,
                recommended_secs,
            } => write!(
                f,
                "latency {:.3} s is below the recommended {:.3} s; the capture may be truncated",
                latency_secs, recommended_secs
            ),
            Advisory::CalibrationSkipped { stage, reason } => {
                write!(f, "{:?} calibration skipped: {}", stage, reason)
            }
            Advisory::TruncatedCapture => write!(
                f,
                "capture header end marker not found; the capture file may be corrupted"
            ),
            Advisory::PossibleClipping {
                channel,
                peak,
                proportion,
            } => write!(
                f,
                "possible clipping on channel {}: peak {:.4}, {:.3}% of samples at or above 95% full scale",
                channel,
                peak,
                proportion * 100.0
            ),
        }
    }
}

/// An advisory with the moment it was raised
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryRecord {
    pub timestamp: DateTime<Utc>,
    pub advisory: Advisory,
}

/// Ordered collection of advisories raised during one measurement
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Advisories {
    records: Vec<AdvisoryRecord>,
}

impl Advisories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advisory and log it
    pub fn raise(&mut self, advisory: Advisory) {
        tracing::warn!(advisory = %advisory, "Measurement advisory");
        self.records.push(AdvisoryRecord {
            timestamp: Utc::now(),
            advisory,
        });
    }

    /// Move every record from `other` into this collection, keeping order
    pub fn absorb(&mut self, other: Advisories) {
        self.records.extend(other.records);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Advisory> {
        self.records.iter().map(|r| &r.advisory)
    }

    pub fn records(&self) -> &[AdvisoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether any advisory matches the predicate
    pub fn contains(&self, pred: impl Fn(&Advisory) -> bool) -> bool {
        self.iter().any(pred)
    }
}

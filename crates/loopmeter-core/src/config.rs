//! Persistent measurement configuration
//!
//! Stores device capabilities, sample rate, latency margin, channel
//! selection, capture program and calibration source in a JSON file at
//! `<data_dir>/loopmeter/config.json`.

use crate::audio::calibration::CalibrationSource;
use crate::audio::device::DeviceCapabilities;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_capture_timeout_secs() -> f64 {
    60.0
}

fn default_calibration_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loopmeter")
        .join("calibrations")
}

/// Measurement configuration passed explicitly into the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Sample rate in Hz; stimuli at any other rate are rejected
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Latency margin in seconds (None = device-class default)
    #[serde(default)]
    pub latency: Option<f64>,
    /// Captured channels to keep, 1-based (empty = all)
    #[serde(default)]
    pub channels: Vec<usize>,
    /// Base timeout for the capture program; the stimulus duration is added
    #[serde(default = "default_capture_timeout_secs")]
    pub capture_timeout_secs: f64,
    /// Playback and capture device capabilities
    #[serde(default)]
    pub device: DeviceCapabilities,
    /// Native playback/capture program
    #[serde(default)]
    pub capture_program: Option<PathBuf>,
    /// Extra arguments placed before the sample rate and file paths
    #[serde(default)]
    pub capture_args: Vec<String>,
    /// Calibration to apply (None = uncalibrated)
    #[serde(default)]
    pub calibration: Option<CalibrationSource>,
    /// Directory resolving named calibrations
    #[serde(default = "default_calibration_dir")]
    pub calibration_dir: PathBuf,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            latency: None,
            channels: Vec::new(),
            capture_timeout_secs: default_capture_timeout_secs(),
            device: DeviceCapabilities::default(),
            capture_program: None,
            capture_args: Vec::new(),
            calibration: None,
            calibration_dir: default_calibration_dir(),
        }
    }
}

impl MeasurementConfig {
    /// Config file path: `<data_dir>/loopmeter/config.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loopmeter")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        let path = Self::path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path; errors are returned, not defaulted
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded config from disk");
        Ok(config)
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Capture timeout for a stimulus of the given duration
    ///
    /// Saturates at [`Duration::MAX`] for values too large to represent.
    pub fn capture_timeout(&self, stimulus_secs: f64) -> Duration {
        let secs = (self.capture_timeout_secs + stimulus_secs).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

//! Loopmeter Core - Stimulus preparation, capture alignment, and calibration
//!
//! This library drives a hardware audio loopback measurement: it pads a test
//! stimulus, hands it to a playback/capture backend, aligns the captured
//! response with the stimulus that was actually played, and converts both
//! into physical units using DAC and SENSOR/ADC calibrations.

pub mod advisory;
pub mod audio;
pub mod config;
pub mod error;

pub use advisory::{Advisories, Advisory};
pub use audio::{
    backend::{CaptureBackend, ProcessBackend, SimulatedLoopback},
    calibration::{Calibration, CalibrationSource, Transfer},
    engine::{LoopbackMeasurement, MeasurementResult},
    stimulus::Stimulus,
};
pub use config::MeasurementConfig;
pub use error::MeasurementError;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default sample rate for measurements
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

//! Loopmeter - hardware audio loopback measurement
//!
//! Re-exports the measurement pipeline, calibration engine and
//! configuration from `loopmeter-core`.

pub use loopmeter_core::advisory;
pub use loopmeter_core::audio;
pub use loopmeter_core::config;
pub use loopmeter_core::error;

pub use loopmeter_core::{
    Advisories, Advisory, Calibration, CalibrationSource, CaptureBackend, LoopbackMeasurement,
    MeasurementConfig, MeasurementError, MeasurementResult, ProcessBackend, SimulatedLoopback,
    Stimulus, Transfer,
};
pub use loopmeter_core::{BUILD_DATE, DEFAULT_SAMPLE_RATE, VERSION};

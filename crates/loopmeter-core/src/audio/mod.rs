//! Audio measurement module
//!
//! This module contains the measurement pipeline and its stages:
//! - Stimulus validation, padding and file I/O ([`stimulus`])
//! - Playback/capture backends ([`backend`])
//! - Capture file parsing and clipping detection ([`capture`])
//! - DAC and SENSOR/ADC calibration ([`calibration`])
//! - Device capabilities and platform checks ([`device`])
//! - Tone generation and RMS ([`signal`])
//! - The pipeline tying them together ([`engine`])

pub mod backend;
pub mod calibration;
pub mod capture;
pub mod device;
pub mod engine;
pub mod signal;
pub mod stimulus;

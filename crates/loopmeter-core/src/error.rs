//! Fatal measurement errors
//!
//! Every variant aborts the current measurement call. Non-fatal conditions
//! live in [`crate::advisory`] instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the core crate
pub type MeasurementResultOf<T> = Result<T, MeasurementError>;

/// Errors that abort a loopback measurement
#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error("Audio API '{api}' is not supported on platform '{os}'")]
    UnsupportedPlatform { os: String, api: String },

    #[error("No audio device available")]
    NoDeviceAvailable,

    #[error("Stimulus has {requested} channels but the output device only has {available}")]
    UnsupportedChannelCount { requested: usize, available: usize },

    #[error("Invalid latency margin: {0} s")]
    InvalidLatency(f64),

    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),

    #[error("Stimulus is sampled at {stimulus} Hz but the measurement is configured for {configured} Hz")]
    SampleRateMismatch { configured: u32, stimulus: u32 },

    #[error("Stimulus sample {value} at channel {channel}, index {index} is outside [-1, 1]")]
    StimulusOutOfRange {
        channel: usize,
        index: usize,
        value: f64,
    },

    #[error("Stimulus channels have unequal lengths ({first} vs {other})")]
    RaggedStimulus { first: usize, other: usize },

    #[error("Capture program failed ({status}): {stderr}")]
    CaptureFailed { status: String, stderr: String },

    #[error("Capture program did not finish within {0:?}")]
    CaptureTimeout(Duration),

    #[error("Capture header does not declare the number of input channels")]
    ChannelCountUnresolved,

    #[error("Capture contains no data rows")]
    EmptyCapture,

    #[error("Malformed capture at line {line}: {reason}")]
    MalformedCapture { line: usize, reason: String },

    #[error("Channel {channel} requested but the capture only has {available} channels")]
    ChannelOutOfRange { channel: usize, available: usize },

    #[error("Captured {captured} samples but the stimulus file has {stimulus}")]
    AlignmentMismatch { captured: usize, stimulus: usize },

    #[error("RMS of an empty signal is undefined")]
    EmptySignal,

    #[error("Failed to load calibration from {path}: {reason}")]
    CalibrationLoad { path: PathBuf, reason: String },

    #[error("Measurement aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

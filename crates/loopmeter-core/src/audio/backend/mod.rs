//! Capture backends
//!
//! A backend plays the prepared stimulus file through the device and writes
//! the captured response as a capture file (see [`crate::audio::capture`]).
//! - [`process::ProcessBackend`]: the external native playback/capture program
//! - [`simulated::SimulatedLoopback`]: an in-process loopback for dry runs and tests

pub mod process;
pub mod simulated;

use crate::error::MeasurementResultOf;
use std::path::PathBuf;
use std::time::Duration;

pub use process::ProcessBackend;
pub use simulated::SimulatedLoopback;

/// One playback/capture invocation
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Padded stimulus text file to play
    pub stimulus_path: PathBuf,
    /// Where the capture file must be written
    pub output_path: PathBuf,
    /// Upper bound on the invocation time
    pub timeout: Duration,
}

/// Performs the hardware round trip
pub trait CaptureBackend {
    /// Play `request.stimulus_path` and write the capture to `request.output_path`
    fn invoke(&self, request: &CaptureRequest) -> MeasurementResultOf<()>;
}

impl<B: CaptureBackend + ?Sized> CaptureBackend for Box<B> {
    fn invoke(&self, request: &CaptureRequest) -> MeasurementResultOf<()> {
        (**self).invoke(request)
    }
}

//! In-process loopback used for dry runs and tests
//!
//! Reads the stimulus file, applies a gain and an integer sample delay, and
//! writes a capture file the same way the native program does. Input channel
//! `i` (1-based) carries stimulus channel `(i - 1) % stimulus_channels`.

use super::{CaptureBackend, CaptureRequest};
use crate::audio::capture::format_header;
use crate::audio::stimulus::read_stimulus_file;
use crate::error::{MeasurementError, MeasurementResultOf};
use std::fs::File;
use std::io::{BufWriter, Write};

/// Simulated analog loopback
#[derive(Debug, Clone)]
pub struct SimulatedLoopback {
    /// Linear gain of the simulated DUT
    pub gain: f64,
    /// Round-trip delay in samples
    pub delay_samples: usize,
    /// Number of captured channels
    pub input_channels: usize,
    /// Write the header end marker
    pub write_sentinel: bool,
}

impl Default for SimulatedLoopback {
    fn default() -> Self {
        Self {
            gain: 1.0,
            delay_samples: 0,
            input_channels: 1,
            write_sentinel: true,
        }
    }
}

impl SimulatedLoopback {
    pub fn new(gain: f64, delay_samples: usize, input_channels: usize) -> Self {
        Self {
            gain,
            delay_samples,
            input_channels,
            write_sentinel: true,
        }
    }

    fn render(&self, stimulus: &[Vec<f64>]) -> Vec<Vec<f64>> {
        (0..self.input_channels)
            .map(|i| {
                let source = &stimulus[i % stimulus.len()];
                let n = source.len();
                let mut out = vec![0.0; n];
                for (j, sample) in out.iter_mut().enumerate().skip(self.delay_samples) {
                    *sample = source[j - self.delay_samples] * self.gain;
                }
                out
            })
            .collect()
    }
}

impl CaptureBackend for SimulatedLoopback {
    fn invoke(&self, request: &CaptureRequest) -> MeasurementResultOf<()> {
        let stimulus = read_stimulus_file(&request.stimulus_path)?;
        if stimulus.is_empty() {
            return Err(MeasurementError::CaptureFailed {
                status: "simulated".to_string(),
                stderr: "stimulus file is empty".to_string(),
            });
        }
        let captured = self.render(&stimulus);
        let rows = captured.first().map(Vec::len).unwrap_or(0);

        let mut w = BufWriter::with_capacity(8192, File::create(&request.output_path)?);
        let header = format_header(request.sample_rate, self.input_channels);
        if self.write_sentinel {
            w.write_all(header.as_bytes())?;
        } else {
            // Drop the final header line (the end marker)
            for line in header.lines().filter(|l| !l.contains("end of header")) {
                writeln!(w, "{}", line)?;
            }
        }
        for i in 0..rows {
            write!(w, "{}", i as f64 / request.sample_rate as f64)?;
            for ch in &captured {
                write!(w, " {}", ch[i])?;
            }
            w.write_all(b"\n")?;
        }
        w.flush()?;

        tracing::debug!(
            rows,
            channels = self.input_channels,
            gain = self.gain,
            delay_samples = self.delay_samples,
            "Simulated capture written"
        );
        Ok(())
    }
}

//! Test tone generation and amplitude statistics
//!
//! Provides the sine stimulus used by the CLI and tests, plus the RMS and
//! peak measurements the calibration and clipping checks rely on.

use crate::error::{MeasurementError, MeasurementResultOf};
use std::f64::consts::TAU;

/// Sine tone generator
///
/// Produces a continuous sine of fixed frequency and peak amplitude.
///
/// # Example
/// ```
/// use loopmeter_core::audio::signal::ToneGenerator;
///
/// let mut gen = ToneGenerator::new(1000.0, 0.5, 44100);
/// let first = gen.next_sample();
/// assert_eq!(first, 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    /// Tone frequency in Hz
    frequency: f64,
    /// Peak amplitude (full scale = 1.0)
    amplitude: f64,
    /// Sample rate in Hz
    sample_rate: u32,
    /// Sample index since the last reset
    position: u64,
}

impl ToneGenerator {
    /// Create a new tone generator
    ///
    /// # Arguments
    /// * `frequency` - Tone frequency in Hz
    /// * `amplitude` - Peak amplitude, clamped to [0, 1]
    /// * `sample_rate` - Sample rate in Hz
    pub fn new(frequency: f64, amplitude: f64, sample_rate: u32) -> Self {
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            sample_rate,
            position: 0,
        }
    }

    /// Get the next sample of the tone
    pub fn next_sample(&mut self) -> f64 {
        let t = self.position as f64 / self.sample_rate as f64;
        self.position += 1;
        self.amplitude * (TAU * self.frequency * t).sin()
    }

    /// Fill a buffer with sequential samples
    pub fn fill_buffer(&mut self, buffer: &mut [f64]) {
        for sample in buffer.iter_mut() {
            *sample = self.next_sample();
        }
    }

    /// Generate `length` samples starting at the current position
    pub fn take(&mut self, length: usize) -> Vec<f64> {
        let mut out = vec![0.0; length];
        self.fill_buffer(&mut out);
        out
    }

    /// Reset the generator to phase zero
    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Root-mean-square amplitude
///
/// An empty slice has no RMS and yields [`MeasurementError::EmptySignal`].
pub fn rms(samples: &[f64]) -> MeasurementResultOf<f64> {
    if samples.is_empty() {
        return Err(MeasurementError::EmptySignal);
    }
    let sum_sq: f64 = samples.iter().map(|s| s * s).sum();
    Ok((sum_sq / samples.len() as f64).sqrt())
}

/// RMS over all samples of a channel-major matrix
pub fn rms_all(channels: &[Vec<f64>]) -> MeasurementResultOf<f64> {
    let count: usize = channels.iter().map(Vec::len).sum();
    if count == 0 {
        return Err(MeasurementError::EmptySignal);
    }
    let sum_sq: f64 = channels.iter().flatten().map(|s| s * s).sum();
    Ok((sum_sq / count as f64).sqrt())
}

/// Peak absolute amplitude (0.0 for an empty slice)
pub fn peak(samples: &[f64]) -> f64 {
    samples.iter().map(|x| x.abs()).fold(0.0f64, f64::max)
}

/// Fraction of samples whose absolute value is at or above `threshold`
pub fn proportion_at_or_above(samples: &[f64], threshold: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let hits = samples.iter().filter(|x| x.abs() >= threshold).count();
    hits as f64 / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tone_starts_at_zero_phase() {
        let mut gen = ToneGenerator::new(1000.0, 0.5, 48000);
        assert_eq!(gen.next_sample(), 0.0);
    }

    #[test]
    fn test_tone_peak_bounded_by_amplitude() {
        let mut gen = ToneGenerator::new(1000.0, 0.5, 48000);
        let samples = gen.take(4800);
        assert!(peak(&samples) <= 0.5 + 1e-12);
        assert!(peak(&samples) > 0.49);
    }

    #[test]
    fn test_amplitude_clamped() {
        let gen = ToneGenerator::new(440.0, 3.0, 44100);
        assert_eq!(gen.amplitude(), 1.0);
    }

    #[test]
    fn test_reset() {
        let mut gen = ToneGenerator::new(1000.0, 0.5, 48000);
        let a = gen.take(10);
        gen.reset();
        let b = gen.take(10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_rms_of_full_period_sine() {
        // 48 samples per period at 1 kHz / 48 kHz, 100 full periods
        let mut gen = ToneGenerator::new(1000.0, 1.0, 48000);
        let samples = gen.take(4800);
        assert_relative_eq!(rms(&samples).unwrap(), 1.0 / 2f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_rms_of_constant() {
        assert_relative_eq!(rms(&[0.25; 16]).unwrap(), 0.25);
    }

    #[test]
    fn test_rms_empty_is_error() {
        assert!(matches!(rms(&[]), Err(MeasurementError::EmptySignal)));
        assert!(matches!(
            rms_all(&[vec![], vec![]]),
            Err(MeasurementError::EmptySignal)
        ));
    }

    #[test]
    fn test_rms_all_matches_concatenation() {
        let a = vec![0.1, -0.2, 0.3];
        let b = vec![0.4, 0.0, -0.5];
        let joined: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
        assert_relative_eq!(rms_all(&[a, b]).unwrap(), rms(&joined).unwrap());
    }

    #[test]
    fn test_peak_and_proportion() {
        let samples = [0.1, -0.96, 0.5, 0.95];
        assert_relative_eq!(peak(&samples), 0.96);
        assert_relative_eq!(proportion_at_or_above(&samples, 0.95), 0.5);
        assert_eq!(proportion_at_or_above(&[], 0.95), 0.0);
    }
}

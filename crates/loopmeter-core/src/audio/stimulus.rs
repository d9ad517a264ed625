//! Stimulus validation, latency padding, and the stimulus text file
//!
//! The device round trip delays the captured response by an unknown amount,
//! so every channel is surrounded by `round(latency * fs)` zero samples
//! before it is handed to the capture program. The padded matrix is written
//! as a plain numeric text file, one row per sample and one column per
//! channel, and re-read verbatim after the capture.

use crate::advisory::{Advisories, Advisory};
use crate::error::{MeasurementError, MeasurementResultOf};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Reference rate for the default latency scale
const DEFAULT_LATENCY_BASE_RATE: f64 = 44100.0;

/// Default latency margin at or below the base rate (seconds)
const DEFAULT_LATENCY_SECS: f64 = 0.1;

/// Longest padded channel that can be allocated
const MAX_PADDED_LEN: usize = isize::MAX as usize / std::mem::size_of::<f64>();

/// Caller-supplied test signal
///
/// Channel-major, every sample in [-1, 1], all channels the same non-zero
/// length.
#[derive(Debug, Clone, PartialEq)]
pub struct Stimulus {
    channels: Vec<Vec<f64>>,
    sample_rate: u32,
}

impl Stimulus {
    /// Build a stimulus, validating shape and sample range
    pub fn new(channels: Vec<Vec<f64>>, sample_rate: u32) -> MeasurementResultOf<Self> {
        if sample_rate == 0 {
            return Err(MeasurementError::InvalidSampleRate(0.0));
        }
        let first_len = channels.first().map(Vec::len).unwrap_or(0);
        if first_len == 0 {
            return Err(MeasurementError::EmptySignal);
        }
        for (c, channel) in channels.iter().enumerate() {
            if channel.len() != first_len {
                return Err(MeasurementError::RaggedStimulus {
                    first: first_len,
                    other: channel.len(),
                });
            }
            if let Some((index, &value)) = channel
                .iter()
                .enumerate()
                .find(|(_, v)| !(-1.0..=1.0).contains(*v))
            {
                return Err(MeasurementError::StimulusOutOfRange {
                    channel: c + 1,
                    index,
                    value,
                });
            }
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Single-channel stimulus
    pub fn mono(samples: Vec<f64>, sample_rate: u32) -> MeasurementResultOf<Self> {
        Self::new(vec![samples], sample_rate)
    }

    /// Load a stimulus text file (see [`read_stimulus_file`])
    pub fn from_file(path: &Path, sample_rate: u32) -> MeasurementResultOf<Self> {
        Self::new(read_stimulus_file(path)?, sample_rate)
    }

    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }
}

/// Padded stimulus ready to be written for the capture program
#[derive(Debug, Clone)]
pub struct PreparedStimulus {
    /// Channel-major padded samples
    pub channels: Vec<Vec<f64>>,
    /// Zero samples added on each side
    pub pad_samples: usize,
    /// Latency margin actually used (seconds)
    pub latency_secs: f64,
    /// Advisories raised while preparing
    pub advisories: Advisories,
}

impl PreparedStimulus {
    /// Samples per channel including padding
    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the padded matrix as a stimulus text file
    pub fn write_to(&self, path: &Path) -> MeasurementResultOf<()> {
        write_stimulus_file(path, &self.channels)
    }
}

/// Device-class default latency margin: `0.1 * max(1, fs / 44100)` seconds
pub fn default_latency(sample_rate: u32) -> f64 {
    DEFAULT_LATENCY_SECS * (sample_rate as f64 / DEFAULT_LATENCY_BASE_RATE).max(1.0)
}

/// Zero samples added per side for a latency margin
///
/// Returns `None` when the count is negative, not finite or beyond `usize`.
pub fn pad_samples(latency_secs: f64, sample_rate: u32) -> Option<usize> {
    let pad = (latency_secs * sample_rate as f64).round();
    (pad.is_finite() && pad >= 0.0 && pad < usize::MAX as f64).then_some(pad as usize)
}

/// Validate the stimulus against the output device and pad it
///
/// # Arguments
/// * `stimulus` - Caller-supplied signal
/// * `latency` - Latency margin in seconds, `None` for the device default
/// * `output_channels` - Channel count of the output device
pub fn prepare(
    stimulus: &Stimulus,
    latency: Option<f64>,
    output_channels: usize,
) -> MeasurementResultOf<PreparedStimulus> {
    if stimulus.channel_count() > output_channels {
        return Err(MeasurementError::UnsupportedChannelCount {
            requested: stimulus.channel_count(),
            available: output_channels,
        });
    }

    let mut advisories = Advisories::new();
    let recommended = default_latency(stimulus.sample_rate());
    let latency_secs = match latency {
        None => {
            advisories.raise(Advisory::LatencyUnspecified {
                default_secs: recommended,
            });
            recommended
        }
        Some(l) if !l.is_finite() || l < 0.0 => {
            return Err(MeasurementError::InvalidLatency(l));
        }
        Some(l) => {
            if l < recommended {
                advisories.raise(Advisory::LatencyBelowRecommended {
                    latency_secs: l,
                    recommended_secs: recommended,
                });
            }
            l
        }
    };

    let pad = pad_samples(latency_secs, stimulus.sample_rate())
        .ok_or(MeasurementError::InvalidLatency(latency_secs))?;
    let padded_len = pad
        .checked_mul(2)
        .and_then(|both| both.checked_add(stimulus.len()))
        .filter(|&len| len <= MAX_PADDED_LEN)
        .ok_or(MeasurementError::InvalidLatency(latency_secs))?;
    let channels = stimulus
        .channels()
        .iter()
        .map(|ch| {
            let mut padded = Vec::with_capacity(padded_len);
            padded.resize(pad, 0.0);
            padded.extend_from_slice(ch);
            padded.resize(padded_len, 0.0);
            padded
        })
        .collect();

    tracing::debug!(
        channels = stimulus.channel_count(),
        samples = stimulus.len(),
        pad_samples = pad,
        latency_secs,
        "Stimulus prepared"
    );

    Ok(PreparedStimulus {
        channels,
        pad_samples: pad,
        latency_secs,
        advisories,
    })
}

/// Write a channel-major matrix as whitespace-separated rows
///
/// Values use Rust's shortest round-trip formatting so reading the file back
/// yields identical `f64`s.
pub fn write_stimulus_file(path: &Path, channels: &[Vec<f64>]) -> MeasurementResultOf<()> {
    let mut w = BufWriter::with_capacity(8192, File::create(path)?);
    let rows = channels.first().map(Vec::len).unwrap_or(0);
    for i in 0..rows {
        let mut first = true;
        for ch in channels {
            if !first {
                w.write_all(b" ")?;
            }
            write!(w, "{}", ch[i])?;
            first = false;
        }
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

/// Read a stimulus text file back into a channel-major matrix
pub fn read_stimulus_file(path: &Path) -> MeasurementResultOf<Vec<Vec<f64>>> {
    let reader = BufReader::new(File::open(path)?);
    let mut channels: Vec<Vec<f64>> = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Vec<f64> = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<_, _>>()
            .map_err(|e| MeasurementError::MalformedCapture {
                line: n + 1,
                reason: format!("stimulus file {}: {}", path.display(), e),
            })?;

        if channels.is_empty() {
            channels = vec![Vec::new(); row.len()];
        } else if row.len() != channels.len() {
            return Err(MeasurementError::MalformedCapture {
                line: n + 1,
                reason: format!(
                    "stimulus file {}: expected {} columns, found {}",
                    path.display(),
                    channels.len(),
                    row.len()
                ),
            });
        }
        for (ch, value) in channels.iter_mut().zip(row) {
            ch.push(value);
        }
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tone(n: usize) -> Vec<f64> {
        (0..n).map(|i| 0.5 * (i as f64 * 0.1).sin()).collect()
    }

    #[test]
    fn test_default_latency() {
        assert_relative_eq!(default_latency(44100), 0.1);
        assert_relative_eq!(default_latency(22050), 0.1);
        assert_relative_eq!(default_latency(88200), 0.2);
        assert_relative_eq!(default_latency(96000), 0.1 * 96000.0 / 44100.0);
    }

    #[test]
    fn test_channel_count_within_capacity_accepted() {
        for n in 1..=4 {
            let stim = Stimulus::new(vec![tone(32); n], 48000).unwrap();
            assert!(prepare(&stim, Some(0.2), 4).is_ok(), "{} channels", n);
        }
    }

    #[test]
    fn test_channel_count_over_capacity_rejected() {
        let stim = Stimulus::new(vec![tone(32); 3], 48000).unwrap();
        let err = prepare(&stim, Some(0.2), 2).unwrap_err();
        assert!(matches!(
            err,
            MeasurementError::UnsupportedChannelCount {
                requested: 3,
                available: 2
            }
        ));
    }

    #[test]
    fn test_padding_length() {
        let stim = Stimulus::mono(tone(1000), 44100).unwrap();
        let prepared = prepare(&stim, Some(0.15), 2).unwrap();
        let pad = (0.15f64 * 44100.0).round() as usize;
        assert_eq!(prepared.pad_samples, pad);
        assert_eq!(prepared.len(), 1000 + 2 * pad);
        assert!(prepared.channels[0][..pad].iter().all(|&x| x == 0.0));
        assert!(prepared.channels[0][pad + 1000..].iter().all(|&x| x == 0.0));
        assert_eq!(&prepared.channels[0][pad..pad + 1000], stim.channels()[0].as_slice());
        assert!(prepared.advisories.is_empty());
    }

    #[test]
    fn test_unspecified_latency_uses_default_with_advisory() {
        let stim = Stimulus::mono(tone(100), 44100).unwrap();
        let prepared = prepare(&stim, None, 1).unwrap();
        assert_relative_eq!(prepared.latency_secs, 0.1);
        assert_eq!(prepared.pad_samples, 4410);
        assert!(prepared
            .advisories
            .contains(|a| matches!(a, Advisory::LatencyUnspecified { .. })));
    }

    #[test]
    fn test_low_latency_advisory() {
        let stim = Stimulus::mono(tone(100), 44100).unwrap();
        let prepared = prepare(&stim, Some(0.05), 1).unwrap();
        assert!(prepared
            .advisories
            .contains(|a| matches!(a, Advisory::LatencyBelowRecommended { .. })));
    }

    #[test]
    fn test_zero_latency_is_legal() {
        let stim = Stimulus::mono(tone(100), 44100).unwrap();
        let prepared = prepare(&stim, Some(0.0), 1).unwrap();
        assert_eq!(prepared.pad_samples, 0);
        assert_eq!(prepared.len(), 100);
        assert_eq!(prepared.advisories.len(), 1);
    }

    #[test]
    fn test_negative_latency_rejected() {
        let stim = Stimulus::mono(tone(100), 44100).unwrap();
        assert!(matches!(
            prepare(&stim, Some(-0.1), 1),
            Err(MeasurementError::InvalidLatency(_))
        ));
    }

    #[test]
    fn test_oversized_latency_rejected() {
        let stim = Stimulus::mono(tone(100), 44100).unwrap();
        assert_eq!(pad_samples(1e30, 44100), None);
        assert_eq!(pad_samples(0.01, 44100), Some(441));

        // Per-side padding fits usize but the padded length does not
        let doubled_overflow = (usize::MAX / 2 + 1) as f64 / 44100.0;
        for latency in [1e30, f64::MAX, doubled_overflow, 1e14] {
            assert!(matches!(
                prepare(&stim, Some(latency), 1),
                Err(MeasurementError::InvalidLatency(l)) if l == latency
            ));
        }
    }

    #[test]
    fn test_stimulus_validation() {
        assert!(matches!(
            Stimulus::new(vec![], 44100),
            Err(MeasurementError::EmptySignal)
        ));
        assert!(matches!(
            Stimulus::new(vec![vec![0.0; 4], vec![0.0; 3]], 44100),
            Err(MeasurementError::RaggedStimulus { first: 4, other: 3 })
        ));
        assert!(matches!(
            Stimulus::mono(vec![0.0, 1.5], 44100),
            Err(MeasurementError::StimulusOutOfRange { index: 1, .. })
        ));
        assert!(matches!(
            Stimulus::mono(vec![0.0], 0),
            Err(MeasurementError::InvalidSampleRate(_))
        ));
        assert!(Stimulus::mono(vec![-1.0, 1.0], 44100).is_ok());
    }

    #[test]
    fn test_stimulus_file_reads_back_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stimulus.txt");
        let channels = vec![tone(257), tone(257).iter().map(|x| -x / 3.0).collect()];
        write_stimulus_file(&path, &channels).unwrap();

        let loaded = read_stimulus_file(&path).unwrap();
        assert_eq!(loaded, channels);
    }

    #[test]
    fn test_stimulus_file_column_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "0.1 0.2\n0.3\n").unwrap();
        assert!(matches!(
            read_stimulus_file(&path),
            Err(MeasurementError::MalformedCapture { line: 2, .. })
        ));
    }
}

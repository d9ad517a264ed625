//! Capture file parsing, channel selection, and clipping detection
//!
//! ## File Format
//!
//! ```text
//! % loopback capture
//! % sample rate = 44100
//! % number of input channels = 2
//! % end of header
//! 0.000000 0.0012 -0.0003
//! 0.000023 0.0101 -0.0021
//! ```
//!
//! Header lines come first. One of them declares the channel count
//! (`... channels = K`), and the `end of header` sentinel closes the header.
//! Every data row holds `K + 1` whitespace-separated numbers: the time in
//! seconds followed by one sample per channel.
//!
//! Lines are classified by a two-state machine. The header ends either at the
//! sentinel or at the first line that parses purely as numbers, which then
//! becomes the first data row.

use crate::advisory::{Advisories, Advisory};
use crate::audio::signal;
use crate::error::{MeasurementError, MeasurementResultOf};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Peak level (fraction of full scale) treated as possible clipping
pub const CLIPPING_THRESHOLD: f64 = 0.95;

/// Marker closing the capture header
pub const HEADER_SENTINEL: &str = "end of header";

/// Marker of the channel-count declaration
const CHANNELS_MARKER: &str = "channels";

/// Playback-side declarations share the marker and are skipped
const OUTPUT_MARKER: &str = "output";

/// Time-aligned captured samples
///
/// All channels share `time` and have the same length as it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMatrix {
    time: Vec<f64>,
    channels: Vec<Vec<f64>>,
    /// 1-based index of each stored channel in the original capture
    indices: Vec<usize>,
}

impl CaptureMatrix {
    /// Build a matrix from a time vector and channel-major samples
    pub fn new(time: Vec<f64>, channels: Vec<Vec<f64>>) -> MeasurementResultOf<Self> {
        if let Some(ch) = channels.iter().find(|c| c.len() != time.len()) {
            return Err(MeasurementError::AlignmentMismatch {
                captured: ch.len(),
                stimulus: time.len(),
            });
        }
        let indices = (1..=channels.len()).collect();
        Ok(Self {
            time,
            channels,
            indices,
        })
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    /// 1-based capture index of each stored channel
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample rows
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Keep only the given 1-based channels, in the given order
    ///
    /// An empty selection keeps every channel.
    pub fn select(self, selection: &[usize]) -> MeasurementResultOf<Self> {
        if selection.is_empty() {
            return Ok(self);
        }
        let available = self.channels.len();
        if let Some(&bad) = selection.iter().find(|&&c| c == 0 || c > available) {
            return Err(MeasurementError::ChannelOutOfRange {
                channel: bad,
                available,
            });
        }
        let channels = selection
            .iter()
            .map(|&c| self.channels[c - 1].clone())
            .collect();
        Ok(Self {
            time: self.time,
            channels,
            indices: selection.to_vec(),
        })
    }

    /// Split into the time vector and channel-major samples
    pub fn into_parts(self) -> (Vec<f64>, Vec<Vec<f64>>) {
        (self.time, self.channels)
    }
}

/// Result of parsing a capture stream
#[derive(Debug, Clone)]
pub struct ParsedCapture {
    pub matrix: CaptureMatrix,
    /// Channel count declared in the header
    pub declared_channels: usize,
    pub advisories: Advisories,
}

/// Line classifier state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    ReadingHeader,
    ReadingData,
}

/// Parse a capture file from disk
pub fn read_capture_file(path: &Path) -> MeasurementResultOf<ParsedCapture> {
    let file = File::open(path)?;
    parse_capture(BufReader::new(file))
}

/// Parse a capture stream into a [`CaptureMatrix`]
pub fn parse_capture<R: BufRead>(reader: R) -> MeasurementResultOf<ParsedCapture> {
    let mut state = ParseState::ReadingHeader;
    let mut declared: Option<usize> = None;
    let mut saw_sentinel = false;
    let mut time = Vec::new();
    let mut channels: Vec<Vec<f64>> = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = n + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if state == ParseState::ReadingHeader {
            match parse_numeric_row(trimmed) {
                Some(_) => {
                    tracing::debug!(line = line_no, "Capture header ended by first data row");
                    state = ParseState::ReadingData;
                }
                None => {
                    let text = strip_comment(trimmed).to_ascii_lowercase();
                    if text.starts_with(HEADER_SENTINEL) {
                        saw_sentinel = true;
                        state = ParseState::ReadingData;
                        tracing::debug!(line = line_no, "Capture header end marker found");
                    } else if let Some(k) = parse_channel_declaration(&text) {
                        tracing::debug!(line = line_no, channels = k, "Capture channel count declared");
                        declared = Some(k);
                    }
                    continue;
                }
            }
        }

        // ReadingData from here on
        let k = declared.ok_or(MeasurementError::ChannelCountUnresolved)?;
        if channels.is_empty() {
            channels = vec![Vec::new(); k];
        }
        let row = parse_numeric_row(trimmed).ok_or_else(|| MeasurementError::MalformedCapture {
            line: line_no,
            reason: format!("non-numeric data row '{}'", trimmed),
        })?;
        if row.len() != k + 1 {
            return Err(MeasurementError::MalformedCapture {
                line: line_no,
                reason: format!("expected {} columns, found {}", k + 1, row.len()),
            });
        }
        time.push(row[0]);
        for (ch, value) in channels.iter_mut().zip(&row[1..]) {
            ch.push(*value);
        }
    }

    let mut advisories = Advisories::new();
    if !saw_sentinel {
        advisories.raise(Advisory::TruncatedCapture);
    }

    let k = declared.ok_or(MeasurementError::ChannelCountUnresolved)?;
    if time.is_empty() {
        return Err(MeasurementError::EmptyCapture);
    }

    tracing::debug!(channels = k, rows = time.len(), "Capture parsed");

    Ok(ParsedCapture {
        matrix: CaptureMatrix::new(time, channels)?,
        declared_channels: k,
        advisories,
    })
}

/// Report channels whose peak reaches [`CLIPPING_THRESHOLD`]
pub fn detect_clipping(matrix: &CaptureMatrix) -> Vec<Advisory> {
    matrix
        .channels()
        .iter()
        .zip(matrix.indices())
        .filter_map(|(samples, &channel)| {
            let peak = signal::peak(samples);
            (peak >= CLIPPING_THRESHOLD).then(|| Advisory::PossibleClipping {
                channel,
                peak,
                proportion: signal::proportion_at_or_above(samples, CLIPPING_THRESHOLD),
            })
        })
        .collect()
}

/// Render the header lines the parser recognizes
pub fn format_header(sample_rate: u32, channels: usize) -> String {
    format!(
        "% loopback capture\n% sample rate = {}\n% number of input channels = {}\n% {}\n",
        sample_rate, channels, HEADER_SENTINEL
    )
}

fn strip_comment(line: &str) -> &str {
    line.trim_start_matches(['%', '#']).trim()
}

fn parse_numeric_row(line: &str) -> Option<Vec<f64>> {
    line.split_whitespace()
        .map(|tok| tok.parse::<f64>().ok())
        .collect()
}

fn parse_channel_declaration(text: &str) -> Option<usize> {
    let (lhs, rhs) = text.split_once('=')?;
    let lhs = lhs.trim_end();
    if !lhs.ends_with(CHANNELS_MARKER) || lhs.contains(OUTPUT_MARKER) {
        return None;
    }
    rhs.trim().parse().ok()
}

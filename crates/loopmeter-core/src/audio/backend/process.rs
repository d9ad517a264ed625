//! External playback/capture program
//!
//! Runs `<program> [args...] <sample_rate> <stimulus_path> <output_path>` and
//! waits for it on a current-thread tokio runtime so the wait can be bounded.
//! A child that outlives the timeout is killed.

use super::{CaptureBackend, CaptureRequest};
use crate::error::{MeasurementError, MeasurementResultOf};
use std::path::PathBuf;
use std::process::Stdio;

/// Capture backend spawning the native I/O program
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessBackend {
    /// Create a backend for `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the sample rate and file paths
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    async fn run(&self, request: &CaptureRequest) -> MeasurementResultOf<()> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(request.sample_rate.to_string())
            .arg(&request.stimulus_path)
            .arg(&request.output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MeasurementError::CaptureFailed {
                status: format!("failed to start {}", self.program.display()),
                stderr: e.to_string(),
            })?;

        tracing::debug!(
            program = %self.program.display(),
            pid = child.id().unwrap_or(0),
            "Capture program spawned"
        );

        let output = match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::error!(
                    program = %self.program.display(),
                    timeout_ms = request.timeout.as_millis() as u64,
                    "Capture program timed out, killing it"
                );
                return Err(MeasurementError::CaptureTimeout(request.timeout));
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(MeasurementError::CaptureFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl CaptureBackend for ProcessBackend {
    fn invoke(&self, request: &CaptureRequest) -> MeasurementResultOf<()> {
        tracing::info!(
            program = %self.program.display(),
            sample_rate = request.sample_rate,
            stimulus = %request.stimulus_path.display(),
            "Starting capture program"
        );
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(request))
    }
}

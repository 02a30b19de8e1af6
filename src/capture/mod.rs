//! Capture engine
//!
//! Runs one recording of a stream into a file. The recording is written to a
//! `.part` staging sibling and only renamed onto the final path after the
//! recorder reports a clean exit, so a file at the final path is always a
//! complete recording. This is what makes skip-on-resume safe.

mod ffmpeg;
mod progress;

pub(crate) use ffmpeg::FfmpegRecorder;
pub use progress::CaptureProgress;

use crate::temp::PartFile;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that can occur during a single capture
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The external recorder could not be started
    #[error("Failed to launch recorder: {0}")]
    LaunchFailed(String),

    /// The external recorder exited unsuccessfully
    #[error("Recorder exited with {}: {detail}", .code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    NonZeroExit { code: Option<i32>, detail: String },

    /// The capture was interrupted by the user
    #[error("Cancelled")]
    Cancelled,

    /// Staging or committing the output file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Whether a later run has a reasonable chance to succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CaptureError::NonZeroExit { .. } | CaptureError::Cancelled
        )
    }
}

/// Lifecycle state of one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl CaptureStatus {
    /// Whether this status ends a capture attempt
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaptureStatus::Completed | CaptureStatus::Failed | CaptureStatus::Skipped
        )
    }
}

/// Outcome of one [`CaptureEngine::capture`] call
#[derive(Debug)]
pub struct CaptureResult {
    pub status: CaptureStatus,
    /// Size of the committed file, for completed captures
    pub bytes_written: Option<u64>,
    /// Present iff `status` is `Failed`
    pub error: Option<CaptureError>,
}

impl CaptureResult {
    fn completed(bytes: u64) -> Self {
        Self {
            status: CaptureStatus::Completed,
            bytes_written: Some(bytes),
            error: None,
        }
    }

    fn skipped() -> Self {
        Self {
            status: CaptureStatus::Skipped,
            bytes_written: None,
            error: None,
        }
    }

    fn failed(error: CaptureError) -> Self {
        Self {
            status: CaptureStatus::Failed,
            bytes_written: None,
            error: Some(error),
        }
    }
}

/// An external process that records a stream into a file
///
/// Implementations block until the recording ends. They must return
/// `CaptureError::Cancelled` promptly once `cancel` fires, and report
/// progress through `progress` while running.
pub trait Recorder {
    fn record(
        &self,
        stream_url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(CaptureProgress),
    ) -> Result<(), CaptureError>;
}

impl<R: Recorder + ?Sized> Recorder for &R {
    fn record(
        &self,
        stream_url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(CaptureProgress),
    ) -> Result<(), CaptureError> {
        (**self).record(stream_url, destination, cancel, progress)
    }
}

/// Runs single captures with staging, resume and cleanup handling
pub struct CaptureEngine<R: Recorder> {
    recorder: R,
}

impl<R: Recorder> CaptureEngine<R> {
    pub fn new(recorder: R) -> Self {
        Self { recorder }
    }

    /// Records `stream_url` into `output_path`
    ///
    /// # Arguments
    ///
    /// * `stream_url` - Playable stream reference handed to the recorder
    /// * `output_path` - Final destination of the recording
    /// * `resume` - Skip the capture if a non-empty file already exists
    /// * `cancel` - Process-wide interrupt signal
    /// * `observer` - Receives progress reports; a panicking observer is
    ///   disabled for the rest of the capture and never fails it
    ///
    /// Exactly one of these holds afterwards: nothing changed on disk, a new
    /// file exists at `output_path`, or the staging file was removed.
    pub fn capture(
        &self,
        stream_url: &str,
        output_path: &Path,
        resume: bool,
        cancel: &CancellationToken,
        observer: &mut dyn FnMut(&CaptureProgress),
    ) -> CaptureResult {
        if resume {
            if let Some(size) = existing_size(output_path) {
                info!(path = %output_path.display(), size, "Output exists, skipping");
                return CaptureResult::skipped();
            }
        }

        if cancel.is_cancelled() {
            return CaptureResult::failed(CaptureError::Cancelled);
        }

        let part = match PartFile::prepare(output_path) {
            Ok(part) => part,
            Err(e) => return CaptureResult::failed(e.into()),
        };

        debug!(url = stream_url, staging = %part.path().display(), "Starting capture");

        let mut observer_alive = true;
        let mut report = |update: CaptureProgress| {
            if !observer_alive {
                return;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| observer(&update))).is_err() {
                warn!("Progress observer panicked, disabling progress reports");
                observer_alive = false;
            }
        };

        let recorded = self
            .recorder
            .record(stream_url, part.path(), cancel, &mut report);

        // A recorder may exit cleanly after being killed; the interrupt wins.
        let recorded = match recorded {
            Ok(()) if cancel.is_cancelled() => Err(CaptureError::Cancelled),
            other => other,
        };

        match recorded {
            Ok(()) => match part.commit() {
                Ok(bytes) => {
                    info!(path = %output_path.display(), bytes, "Capture completed");
                    CaptureResult::completed(bytes)
                }
                Err(e) => {
                    warn!(path = %output_path.display(), error = %e, "Failed to commit recording");
                    CaptureResult::failed(e.into())
                }
            },
            Err(e) => {
                warn!(path = %output_path.display(), error = %e, "Capture failed");
                // `part` is dropped here and removes the staging file
                CaptureResult::failed(e)
            }
        }
    }
}

/// Size of an existing non-empty file at `path`
pub(crate) fn existing_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file() && meta.len() > 0)
        .map(|meta| meta.len())
}

//! Batch controller
//!
//! Drives the capture engine over an ordered list of targets. Every target is
//! isolated: a failed lookup or recording is recorded in the summary and the
//! batch moves on. Only a user interrupt stops the batch early.

use crate::capture::{
    CaptureEngine, CaptureError, CaptureResult, CaptureStatus, Recorder, existing_size,
};
use crate::http::sleep_unless_cancelled;
use crate::provider::{ResolutionError, StreamLocator};
use crate::{MediaTarget, ProgressEvent};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why a single target failed
#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl TargetError {
    /// Whether re-running the tool has a reasonable chance to succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TargetError::Resolution(e) => e.is_transient(),
            TargetError::Capture(e) => e.is_transient(),
        }
    }

    /// True if the failure was caused by a user interrupt
    pub fn is_cancelled(&self) -> bool {
        match self {
            TargetError::Resolution(e) => e.is_cancelled(),
            TargetError::Capture(e) => matches!(e, CaptureError::Cancelled),
        }
    }
}

/// Final record of one target
#[derive(Debug)]
pub struct TargetOutcome {
    pub target: MediaTarget,
    pub status: CaptureStatus,
    pub bytes_written: Option<u64>,
    pub error: Option<TargetError>,
}

impl TargetOutcome {
    fn not_attempted(target: MediaTarget) -> Self {
        Self {
            target,
            status: CaptureStatus::Pending,
            bytes_written: None,
            error: None,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(TargetError::is_cancelled)
    }
}

/// Aggregate result of a batch, one outcome per input target in input order
///
/// Targets that were never reached because of an interrupt keep the
/// `Pending` status.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<TargetOutcome>,
    /// The batch was stopped by a user interrupt
    pub interrupted: bool,
}

impl RunSummary {
    fn count(&self, status: CaptureStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn completed(&self) -> usize {
        self.count(CaptureStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(CaptureStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(CaptureStatus::Skipped)
    }

    pub fn not_attempted(&self) -> usize {
        self.count(CaptureStatus::Pending)
    }

    /// Failed targets with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&MediaTarget, &TargetError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error.as_ref().map(|e| (&o.target, e)))
    }

    /// Every target ended `Completed` or `Skipped`
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| {
            matches!(o.status, CaptureStatus::Completed | CaptureStatus::Skipped)
        })
    }
}

/// Transient state of one target while it is being processed
#[derive(Debug)]
pub struct CaptureAttempt<'a> {
    target: &'a MediaTarget,
    stream_url: Option<String>,
    partial_bytes_on_disk: Option<u64>,
    status: CaptureStatus,
    bytes_written: Option<u64>,
    error: Option<TargetError>,
}

impl<'a> CaptureAttempt<'a> {
    pub fn new(target: &'a MediaTarget, resume: bool) -> Self {
        Self {
            target,
            stream_url: None,
            partial_bytes_on_disk: if resume {
                existing_size(&target.output_path)
            } else {
                None
            },
            status: CaptureStatus::Pending,
            bytes_written: None,
            error: None,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    /// Stream being recorded, once located
    pub fn stream_url(&self) -> Option<&str> {
        self.stream_url.as_deref()
    }

    /// Size of the existing output found when resume was requested
    pub fn partial_bytes_on_disk(&self) -> Option<u64> {
        self.partial_bytes_on_disk
    }

    /// Marks the attempt as running against `stream_url`
    fn start(&mut self, stream_url: String) {
        self.stream_url = Some(stream_url);
        self.status = CaptureStatus::Running;
    }

    fn fail(&mut self, error: TargetError) {
        self.status = CaptureStatus::Failed;
        self.error = Some(error);
    }

    fn finish(&mut self, result: CaptureResult) {
        self.status = result.status;
        self.bytes_written = result.bytes_written;
        self.error = result.error.map(TargetError::Capture);
    }

    fn into_outcome(self) -> TargetOutcome {
        debug_assert!(self.status.is_terminal(), "attempt recorded before it ended");
        TargetOutcome {
            target: self.target.clone(),
            status: self.status,
            bytes_written: self.bytes_written,
            error: self.error,
        }
    }
}

/// Processes targets one after another
pub struct BatchController<L: StreamLocator, R: Recorder> {
    locator: L,
    engine: CaptureEngine<R>,
    cancel: CancellationToken,
    pause: Duration,
}

impl<L: StreamLocator, R: Recorder> BatchController<L, R> {
    /// Creates a controller
    ///
    /// `pause` is waited between consecutive targets to go easy on the
    /// provider; it is cut short by `cancel`.
    pub fn new(
        locator: L,
        engine: CaptureEngine<R>,
        cancel: CancellationToken,
        pause: Duration,
    ) -> Self {
        Self {
            locator,
            engine,
            cancel,
            pause,
        }
    }

    /// Runs all targets strictly in order
    ///
    /// Never fails: per-target errors end up in the returned summary. An
    /// interrupt stops the batch after cleaning up the current capture; the
    /// remaining targets are reported as not attempted.
    pub fn run(
        &self,
        targets: Vec<MediaTarget>,
        resume: bool,
        observer: &mut dyn FnMut(ProgressEvent),
    ) -> RunSummary {
        let total = targets.len();
        let mut summary = RunSummary::default();
        let mut remaining = targets.into_iter().enumerate();

        while let Some((index, target)) = remaining.next() {
            let paused = index == 0 || sleep_unless_cancelled(self.pause, &self.cancel);
            if !paused || self.cancel.is_cancelled() {
                summary.outcomes.push(TargetOutcome::not_attempted(target));
                summary.interrupted = true;
                break;
            }

            let outcome = self.process(index, total, &target, resume, observer);
            let cancelled = outcome.is_cancelled();
            summary.outcomes.push(outcome);

            if cancelled {
                summary.interrupted = true;
                break;
            }
        }

        summary
            .outcomes
            .extend(remaining.map(|(_, target)| TargetOutcome::not_attempted(target)));

        if summary.interrupted {
            info!(not_attempted = summary.not_attempted(), "Batch interrupted");
            observer(ProgressEvent::Interrupted {
                not_attempted: summary.not_attempted(),
            });
        }

        summary
    }

    /// Locates and records a single target
    fn process(
        &self,
        index: usize,
        total: usize,
        target: &MediaTarget,
        resume: bool,
        observer: &mut dyn FnMut(ProgressEvent),
    ) -> TargetOutcome {
        let label = target.label();
        observer(ProgressEvent::TargetStarted {
            index,
            total,
            label: label.clone(),
        });

        let mut attempt = CaptureAttempt::new(target, resume);
        if let Some(bytes) = attempt.partial_bytes_on_disk() {
            debug!(target = %label, bytes, "Found existing output");
        }

        match self.locator.locate(target) {
            Ok(stream_url) => {
                debug!(target = %label, url = %stream_url, "Stream located");
                observer(ProgressEvent::StreamLocated {
                    label: label.clone(),
                });
                attempt.start(stream_url.clone());

                let result = self.engine.capture(
                    &stream_url,
                    &target.output_path,
                    resume,
                    &self.cancel,
                    &mut |progress| {
                        observer(ProgressEvent::Recording {
                            label: label.clone(),
                            progress: progress.clone(),
                        })
                    },
                );
                attempt.finish(result);
            }
            Err(e) => attempt.fail(e.into()),
        }

        let outcome = attempt.into_outcome();
        observer(ProgressEvent::TargetFinished {
            index,
            total,
            label,
            status: outcome.status,
            error: outcome.error.as_ref().map(ToString::to_string),
        });
        outcome
    }
}

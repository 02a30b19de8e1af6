//! Progress tracking for running recordings.

use std::time::Duration;

/// Snapshot of a running recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureProgress {
    /// Media time recorded so far
    pub recorded: Duration,
    /// Bytes written to the staging file so far
    pub bytes_written: u64,
    /// Total duration of the input, when the recorder reported one
    pub total: Option<Duration>,
}

impl CaptureProgress {
    /// Completion in percent, if the total duration is known
    pub fn percent(&self) -> Option<f64> {
        self.total
            .filter(|total| !total.is_zero())
            .map(|total| (self.recorded.as_secs_f64() / total.as_secs_f64() * 100.0).min(100.0))
    }
}

/// Turns raw recorder statistics into a monotonic progress stream
///
/// Only whole-second advances are reported, and a report never goes
/// backwards even if the recorder's clock does.
#[derive(Debug, Default)]
pub(crate) struct ProgressTracker {
    last_second: Option<u64>,
    bytes_written: u64,
    total: Option<Duration>,
}

impl ProgressTracker {
    /// Records the input duration announced by the recorder
    pub(crate) fn set_total(&mut self, total: Duration) {
        if !total.is_zero() {
            self.total = Some(total);
        }
    }

    /// Feeds one statistics sample; returns a report if progress advanced
    pub(crate) fn update(&mut self, recorded: Duration, bytes_written: u64) -> Option<CaptureProgress> {
        self.bytes_written = self.bytes_written.max(bytes_written);

        let second = recorded.as_secs();
        if self.last_second.is_some_and(|last| second <= last) {
            return None;
        }
        self.last_second = Some(second);

        Some(CaptureProgress {
            recorded: Duration::from_secs(second),
            bytes_written: self.bytes_written,
            total: self.total,
        })
    }
}

/// Parses an ffmpeg timestamp such as `01:02:03.45`
///
/// Negative timestamps (reported before the first packet) yield `None`.
pub(crate) fn parse_timestamp(value: &str) -> Option<Duration> {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(0.0..60.0).contains(&seconds) || minutes >= 60 {
        return None;
    }

    Some(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00:05.00"), Some(Duration::from_secs(5)));
        assert_eq!(
            parse_timestamp("01:02:03.50"),
            Some(Duration::from_millis(3_723_500))
        );
        assert_eq!(parse_timestamp("-577014:32:22.77"), None);
        assert_eq!(parse_timestamp("N/A"), None);
        assert_eq!(parse_timestamp("00:75:00.00"), None);
    }

    #[test]
    fn test_tracker_reports_only_whole_second_advances() {
        let mut tracker = ProgressTracker::default();

        assert!(tracker.update(Duration::from_millis(200), 10).is_some());
        assert!(tracker.update(Duration::from_millis(900), 20).is_none());

        let report = tracker.update(Duration::from_millis(1_100), 30).unwrap();
        assert_eq!(report.recorded, Duration::from_secs(1));
        assert_eq!(report.bytes_written, 30);
    }

    #[test]
    fn test_tracker_never_goes_backwards() {
        let mut tracker = ProgressTracker::default();

        tracker.update(Duration::from_secs(10), 1_000).unwrap();
        assert!(tracker.update(Duration::from_secs(4), 500).is_none());

        let report = tracker.update(Duration::from_secs(11), 400).unwrap();
        assert_eq!(report.bytes_written, 1_000);
    }

    #[test]
    fn test_percent_with_known_total() {
        let mut tracker = ProgressTracker::default();
        tracker.set_total(Duration::from_secs(200));

        let report = tracker.update(Duration::from_secs(50), 0).unwrap();
        assert_eq!(report.percent(), Some(25.0));
    }
}

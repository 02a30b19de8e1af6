//! Recorder backed by an external ffmpeg process.

use super::progress::{ProgressTracker, parse_timestamp};
use super::{CaptureError, CaptureProgress, Recorder};
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::FfmpegEvent;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// How often the running process is checked for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of trailing log lines kept as failure detail
const ERROR_TAIL_LINES: usize = 5;

/// Remuxes an HLS stream into a Matroska file without re-encoding
pub(crate) struct FfmpegRecorder {
    ffmpeg_path: PathBuf,
    user_agent: String,
}

impl FfmpegRecorder {
    pub fn new(ffmpeg_path: &Path, user_agent: &str) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.to_path_buf(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Command line arguments for recording `stream_url` into `destination`
    fn arguments(&self, stream_url: &str, destination: &Path) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-user_agent",
            self.user_agent.as_str(),
            "-protocol_whitelist",
            "file,http,https,tcp,tls,crypto",
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "5",
            "-y",
            "-i",
            stream_url,
            "-map",
            "0:v:0",
            "-map",
            "0:a?",
            "-map",
            "0:s?",
            "-c",
            "copy",
            "-f",
            "matroska",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        args.push(destination.to_string_lossy().into_owned());
        args
    }
}

/// Keeps the last few log lines of a process
#[derive(Debug, Default)]
struct LogTail {
    lines: VecDeque<String>,
}

impl LogTail {
    fn push(&mut self, line: String) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if self.lines.len() == ERROR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn detail(&self) -> String {
        if self.lines.is_empty() {
            "no output".to_string()
        } else {
            Vec::from(self.lines.clone()).join("\n")
        }
    }
}

impl Recorder for FfmpegRecorder {
    fn record(
        &self,
        stream_url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(CaptureProgress),
    ) -> Result<(), CaptureError> {
        let args = self.arguments(stream_url, destination);
        debug!(
            command = %format!("{} {}", self.ffmpeg_path.display(), args.join(" ")),
            "Launching ffmpeg"
        );

        let mut child = FfmpegCommand::new_with_path(&self.ffmpeg_path)
            .args(&args)
            .spawn()
            .map_err(|e| {
                CaptureError::LaunchFailed(format!("{}: {e}", self.ffmpeg_path.display()))
            })?;

        let events = match child.iter() {
            Ok(events) => events,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::LaunchFailed(e.to_string()));
            }
        };

        // The event iterator blocks on stderr, so it runs on its own thread
        // while this one watches the cancellation token.
        let (sender, receiver) = mpsc::channel();
        let reader = thread::spawn(move || {
            for event in events {
                if sender.send(event).is_err() {
                    break;
                }
            }
        });

        let mut tracker = ProgressTracker::default();
        let mut tail = LogTail::default();

        let interrupted = loop {
            if cancel.is_cancelled() {
                break true;
            }
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(event) => handle_event(event, &mut tracker, &mut tail, progress),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break false,
            }
        };

        if interrupted {
            debug!("Interrupt received, stopping ffmpeg");
            let _ = child.kill();
            let _ = child.wait();
            // Not joined: a grandchild may still hold stderr open. The reader
            // ends on its own once the pipe closes.
            drop(reader);
            return Err(CaptureError::Cancelled);
        }

        let status = child.wait()?;
        let _ = reader.join();

        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        if status.success() {
            Ok(())
        } else {
            Err(CaptureError::NonZeroExit {
                code: status.code(),
                detail: tail.detail(),
            })
        }
    }
}

fn handle_event(
    event: FfmpegEvent,
    tracker: &mut ProgressTracker,
    tail: &mut LogTail,
    progress: &mut dyn FnMut(CaptureProgress),
) {
    match event {
        FfmpegEvent::ParsedDuration(parsed) => {
            if let Ok(total) = Duration::try_from_secs_f64(parsed.duration) {
                tracker.set_total(total);
            }
        }
        FfmpegEvent::Progress(stats) => {
            let Some(recorded) = parse_timestamp(&stats.time) else {
                return;
            };
            let bytes = u64::from(stats.size_kb) * 1024;
            if let Some(report) = tracker.update(recorded, bytes) {
                progress(report);
            }
        }
        FfmpegEvent::Log(_, line) | FfmpegEvent::Error(line) => {
            trace!(target: "tape_deck::ffmpeg", "{line}");
            tail.push(line);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_arguments_copy_all_streams_into_part_file() {
        let recorder = FfmpegRecorder::new(Path::new("ffmpeg"), "Mozilla/5.0");
        let args = recorder.arguments("https://cdn.example/playlist/1?h=1", Path::new("out.mkv.part"));

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "https://cdn.example/playlist/1?h=1");
        assert_eq!(args.last().unwrap(), "out.mkv.part");
        assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
        assert!(args.windows(2).any(|w| w == ["-user_agent", "Mozilla/5.0"]));
        assert!(args.windows(2).any(|w| w == ["-f", "matroska"]));
    }

    #[test]
    fn test_missing_executable_fails_to_launch() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FfmpegRecorder::new(&dir.path().join("no-such-ffmpeg"), "test");

        let result = recorder.record(
            "https://cdn.example/playlist/1",
            &dir.path().join("out.mkv.part"),
            &CancellationToken::new(),
            &mut |_| {},
        );

        assert_matches!(result, Err(CaptureError::LaunchFailed(_)));
    }

    /// Writes an executable shell script standing in for ffmpeg
    #[cfg(unix)]
    fn stub_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FfmpegRecorder::new(&stub_ffmpeg(dir.path(), "exit 0"), "test");

        let result = recorder.record(
            "https://cdn.example/playlist/1",
            &dir.path().join("out.mkv.part"),
            &CancellationToken::new(),
            &mut |_| {},
        );

        assert_matches!(result, Ok(()));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_carries_code_and_last_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = "echo 'Server returned 403 Forbidden' >&2\nexit 3";
        let recorder = FfmpegRecorder::new(&stub_ffmpeg(dir.path(), script), "test");

        let result = recorder.record(
            "https://cdn.example/playlist/1",
            &dir.path().join("out.mkv.part"),
            &CancellationToken::new(),
            &mut |_| {},
        );

        assert_matches!(result, Err(CaptureError::NonZeroExit { code: Some(3), detail }) => {
            assert!(detail.contains("403 Forbidden"), "unexpected detail: {detail}");
        });
    }

    #[cfg(unix)]
    fn record_until_cancelled(script: &str) -> (Result<(), CaptureError>, Duration) {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FfmpegRecorder::new(&stub_ffmpeg(dir.path(), script), "test");
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = recorder.record(
            "https://cdn.example/playlist/1",
            &dir.path().join("out.mkv.part"),
            &cancel,
            &mut |_| {},
        );
        (result, started.elapsed())
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_running_process() {
        let (result, elapsed) = record_until_cancelled("exec sleep 30");

        assert_matches!(result, Err(CaptureError::Cancelled));
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_does_not_wait_for_forked_children() {
        // The shell forks `sleep`, which keeps stderr open after the kill
        let (result, elapsed) = record_until_cancelled("sleep 5");

        assert_matches!(result, Err(CaptureError::Cancelled));
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[test]
    fn test_log_tail_keeps_last_lines() {
        let mut tail = LogTail::default();
        assert_eq!(tail.detail(), "no output");

        for i in 0..8 {
            tail.push(format!("line {i}"));
        }
        tail.push("   ".to_string());

        assert_eq!(tail.detail(), "line 3\nline 4\nline 5\nline 6\nline 7");
    }
}

//! External media-tool runner.
//!
//! Spawns `ffmpeg`/`ffprobe` with an argument vector and awaits
//! termination; success is exit code 0. No retry and no internal timeout —
//! timeouts are a caller concern.

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::MediaError;

/// Locates and runs the external encoder (`ffmpeg`) and prober (`ffprobe`).
#[derive(Debug, Clone)]
pub struct MediaRunner {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl MediaRunner {
    /// Locate both tools on PATH.
    pub fn locate() -> Result<Self> {
        let ffmpeg = which::which("ffmpeg").context("ffmpeg not found on PATH")?;
        let ffprobe = which::which("ffprobe").context("ffprobe not found on PATH")?;
        Ok(Self { ffmpeg, ffprobe })
    }

    /// Use explicit tool paths (tests, containers with pinned binaries).
    pub fn with_paths(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    /// Run the encoder to completion. Resolves on exit 0, otherwise fails
    /// with the numeric exit code.
    pub async fn run_encoder<I, S>(&self, args: I) -> Result<(), MediaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Spawn {
                tool: "ffmpeg",
                source: e,
            })?;

        let monitor = child.stderr.take().map(|s| monitor_stderr(s, "ffmpeg"));
        let status = child.wait().await?;
        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        exit_ok(status, "ffmpeg")
    }

    /// Run the prober and capture its full stdout as UTF-8.
    pub async fn run_prober<I, S>(&self, args: I) -> Result<String, MediaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let bytes = self.capture_stdout(&self.ffprobe, "ffprobe", args).await?;
        String::from_utf8(bytes).map_err(|e| MediaError::BadOutput {
            tool: "ffprobe",
            detail: e.to_string(),
        })
    }

    /// Run the encoder in decode-to-pipe mode and capture raw stdout bytes.
    ///
    /// Used by the sync planner to obtain decoded PCM without doing any
    /// decoding in-process.
    pub async fn run_decoder<I, S>(&self, args: I) -> Result<Vec<u8>, MediaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.capture_stdout(&self.ffmpeg, "ffmpeg", args).await
    }

    /// Container duration of a media file in seconds, via the prober.
    pub async fn duration_of(&self, path: &Path) -> Result<f64, MediaError> {
        let out = self
            .run_prober([
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_entries"),
                OsStr::new("format=duration"),
                OsStr::new("-of"),
                OsStr::new("default=noprint_wrappers=1:nokey=1"),
                path.as_os_str(),
            ])
            .await?;

        out.trim().parse::<f64>().map_err(|_| MediaError::BadOutput {
            tool: "ffprobe",
            detail: format!("expected duration, got {:?}", out.trim()),
        })
    }

    async fn capture_stdout<I, S>(
        &self,
        tool_path: &Path,
        tool: &'static str,
        args: I,
    ) -> Result<Vec<u8>, MediaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(tool_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Spawn { tool, source: e })?;

        let monitor = child.stderr.take().map(|s| monitor_stderr(s, tool));

        let mut stdout = Vec::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_end(&mut stdout).await?;
        }

        let status = child.wait().await?;
        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        exit_ok(status, tool)?;
        Ok(stdout)
    }
}

/// Pump a child's stderr, logging lines that mention an error at error
/// level. Diagnostic chatter stays at debug. A noisy line never fails the
/// invocation by itself — the exit code decides.
pub(crate) fn monitor_stderr(stderr: ChildStderr, tool: &'static str) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.contains("error") {
                error!("{tool}: {line}");
            } else {
                debug!("{tool}: {line}");
            }
        }
    })
}

fn exit_ok(status: std::process::ExitStatus, tool: &'static str) -> Result<(), MediaError> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(MediaError::FailedWithCode { tool, code }),
        None => Err(MediaError::Terminated { tool }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with_shell_tools() -> MediaRunner {
        // `true` and `echo` stand in for the media tools; the runner only
        // cares about argv, exit codes, and stdio wiring.
        MediaRunner::with_paths(PathBuf::from("/bin/true"), PathBuf::from("/bin/echo"))
    }

    #[tokio::test]
    async fn test_run_encoder_success_on_exit_zero() {
        let runner = runner_with_shell_tools();
        assert!(runner.run_encoder(["-version"]).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_encoder_surfaces_exit_code() {
        let runner = MediaRunner::with_paths(
            PathBuf::from("/bin/false"),
            PathBuf::from("/bin/echo"),
        );
        let err = runner.run_encoder(["-i", "x"]).await.unwrap_err();
        match err {
            MediaError::FailedWithCode { tool, code } => {
                assert_eq!(tool, "ffmpeg");
                assert_eq!(code, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_prober_captures_stdout() {
        let runner = runner_with_shell_tools();
        let out = runner.run_prober(["hello", "world"]).await.unwrap();
        assert_eq!(out.trim(), "hello world");
    }

    #[tokio::test]
    async fn test_run_encoder_missing_binary() {
        let runner = MediaRunner::with_paths(
            PathBuf::from("/nonexistent/ffmpeg"),
            PathBuf::from("/nonexistent/ffprobe"),
        );
        let err = runner.run_encoder(["-version"]).await.unwrap_err();
        assert!(matches!(err, MediaError::Spawn { tool: "ffmpeg", .. }));
    }
}

//! The capture session.
//!
//! Owns the single long-lived encoder subprocess and its whole lifecycle:
//! device readiness, spawn, live PCM fan-out, stderr monitoring, exit
//! classification, and driving sync planning plus post-processing before
//! `Stopped` is emitted. At most one session exists per process; the
//! enclosing meeting controller holds the handle.

use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::capture::args::build_capture_args;
use crate::capture::device;
use crate::capture::events::{CaptureEvent, EventSender};
use crate::capture::stream::{FrameDecoder, StreamSink};
use crate::capture::{
    CaptureConfig, FLASH_SCREEN_SLEEP_MS, GRACE_PERIOD_SECONDS, HARD_KILL_DELAY_SECONDS,
};
use crate::error::RecorderError;
use crate::media::{self, MediaRunner};
use crate::page::MeetingPage;
use crate::paths::RecorderPaths;
use crate::postprocess::{Artifacts, PostProcessor};
use crate::sync::{MeetingTiming, SyncPlanner, TrimPlan};

/// Lifecycle states of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    WaitingForDevices,
    Running,
    Stopping,
    StoppedSuccess,
    StoppedFailure,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WaitingForDevices => "waiting_for_devices",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::StoppedSuccess => "stopped_success",
            Self::StoppedFailure => "stopped_failure",
        }
    }
}

/// Snapshot of session state, readable by the enclosing controller.
#[derive(Debug, Clone)]
pub struct CaptureStatus {
    pub state: CaptureState,
    /// Wall-clock moment just after the subprocess spawned, epoch ms.
    pub recording_start_ms: i64,
    pub output_path: Option<PathBuf>,
}

impl Default for CaptureStatus {
    fn default() -> Self {
        Self {
            state: CaptureState::Idle,
            recording_start_ms: 0,
            output_path: None,
        }
    }
}

/// Shared handle onto session state.
#[derive(Clone, Default)]
pub struct CaptureStatusHandle {
    inner: Arc<Mutex<CaptureStatus>>,
}

impl CaptureStatusHandle {
    pub async fn get(&self) -> CaptureStatus {
        self.inner.lock().await.clone()
    }

    pub async fn state(&self) -> CaptureState {
        self.inner.lock().await.state
    }

    async fn set_state(&self, state: CaptureState) {
        let mut status = self.inner.lock().await;
        debug!(
            "Capture state {} -> {}",
            status.state.as_str(),
            state.as_str()
        );
        status.state = state;
    }

    async fn begin_running(&self, recording_start_ms: i64, output_path: PathBuf) {
        let mut status = self.inner.lock().await;
        status.state = CaptureState::Running;
        status.recording_start_ms = recording_start_ms;
        status.output_path = Some(output_path);
    }
}

/// Map an exit status to the numeric code the classification rules use;
/// signal terminations map to 128 + signo, the shell convention the
/// original tooling observed.
fn numeric_exit(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Exit classification: 0 always succeeds; 255 and 143 succeed only inside
/// the grace period; everything else (including the hard-kill 137) fails.
pub(crate) fn exit_is_success(code: i32, grace_active: bool) -> bool {
    code == 0 || (grace_active && (code == 255 || code == 143))
}

pub struct CaptureSession {
    config: CaptureConfig,
    paths: RecorderPaths,
    runner: Arc<MediaRunner>,
    planner: Arc<SyncPlanner>,
    post: Arc<PostProcessor>,
    page: Arc<dyn MeetingPage>,
    sink: Arc<dyn StreamSink>,
    events: EventSender,
    status: CaptureStatusHandle,
    grace: Arc<AtomicBool>,
    /// Suppresses the waiter's abort classification when start() itself is
    /// tearing the subprocess down.
    start_failed: Arc<AtomicBool>,
    meeting_start_ms: Arc<AtomicI64>,
    pid: Arc<AtomicU32>,
    done: watch::Sender<bool>,
}

impl CaptureSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CaptureConfig,
        paths: RecorderPaths,
        runner: Arc<MediaRunner>,
        planner: Arc<SyncPlanner>,
        post: Arc<PostProcessor>,
        page: Arc<dyn MeetingPage>,
        sink: Arc<dyn StreamSink>,
        events: EventSender,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            config,
            paths,
            runner,
            planner,
            post,
            page,
            sink,
            events,
            status: CaptureStatusHandle::default(),
            grace: Arc::new(AtomicBool::new(false)),
            start_failed: Arc::new(AtomicBool::new(false)),
            meeting_start_ms: Arc::new(AtomicI64::new(0)),
            pid: Arc::new(AtomicU32::new(0)),
            done,
        }
    }

    pub fn status(&self) -> CaptureStatusHandle {
        self.status.clone()
    }

    /// Record the wall-clock moment the meeting actually began. Zero until
    /// the enclosing controller observes it.
    pub fn set_meeting_start(&self, epoch_ms: i64) {
        self.meeting_start_ms.store(epoch_ms, Ordering::SeqCst);
    }

    /// Start capturing. Waits for device readiness, spawns the encoder,
    /// requests the sync tone after the flash-screen delay, and emits
    /// `Started`.
    pub async fn start(&self) -> Result<(), RecorderError> {
        let current = self.status.state().await;
        if current != CaptureState::Idle {
            return Err(RecorderError::CaptureStart(format!(
                "cannot start from state {}",
                current.as_str()
            )));
        }

        self.status.set_state(CaptureState::WaitingForDevices).await;
        if let Err(e) = device::wait_for_monitor_source(&self.config.audio_source, &self.runner).await
        {
            self.status.set_state(CaptureState::StoppedFailure).await;
            self.events.emit(CaptureEvent::Error {
                kind: e.kind(),
                message: e.to_string(),
            });
            return Err(e);
        }

        let recording_start_ms = Utc::now().timestamp_millis();
        let args = build_capture_args(&self.config, &self.paths, recording_start_ms);
        debug!("Capture argv: {}", args.join(" "));

        let spawn_result = Command::new(self.runner.ffmpeg_path())
            .args(&args)
            // stdin stays open but unused, reserved for clean termination.
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match spawn_result {
            Ok(child) => child,
            Err(e) => {
                let err = RecorderError::CaptureStart(format!("failed to spawn encoder: {e}"));
                self.status.set_state(CaptureState::StoppedFailure).await;
                self.events.emit(CaptureEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        self.note_spawned(child, recording_start_ms).await;

        info!(
            "Capture started on display {} (audio source {})",
            self.config.display, self.config.audio_source
        );

        // Let the browser's flash screen settle, then ask the page for the
        // tone both tracks are aligned on.
        sleep(Duration::from_millis(FLASH_SCREEN_SLEEP_MS)).await;
        if self.status.state().await != CaptureState::Running {
            return Err(RecorderError::CaptureStart(
                "capture subprocess ended during startup".to_string(),
            ));
        }
        if let Err(e) = self.page.request_sync_tone().await {
            let err =
                RecorderError::CaptureStart(format!("sync tone request failed: {e}"));
            error!("{err}");
            self.start_failed.store(true, Ordering::SeqCst);
            self.signal_subprocess("KILL");
            self.events.emit(CaptureEvent::Error {
                kind: err.kind(),
                message: err.to_string(),
            });
            return Err(err);
        }

        let output_path = if self.config.mode.is_audio_only() {
            self.paths.raw_audio()
        } else {
            self.paths.raw_video()
        };
        self.events.emit(CaptureEvent::Started {
            output_path,
            audio_only: self.config.mode.is_audio_only(),
        });

        Ok(())
    }

    /// Wire up the freshly spawned subprocess: record the start, pump
    /// stdout into the sink, monitor stderr, and park a waiter on the exit.
    async fn note_spawned(&self, mut child: tokio::process::Child, recording_start_ms: i64) {
        self.pid.store(child.id().unwrap_or(0), Ordering::SeqCst);

        let output_path = if self.config.mode.is_audio_only() {
            self.paths.raw_audio()
        } else {
            self.paths.raw_video()
        };
        self.status
            .begin_running(recording_start_ms, output_path)
            .await;

        if let Some(stdout) = child.stdout.take() {
            let sink = Arc::clone(&self.sink);
            tokio::spawn(pump_stream(stdout, sink));
        }
        if let Some(stderr) = child.stderr.take() {
            media::monitor_stderr(stderr, "ffmpeg");
        }

        let waiter = ExitWaiter {
            config: self.config.clone(),
            paths: self.paths.clone(),
            runner: Arc::clone(&self.runner),
            planner: Arc::clone(&self.planner),
            post: Arc::clone(&self.post),
            events: self.events.clone(),
            status: self.status.clone(),
            grace: Arc::clone(&self.grace),
            start_failed: Arc::clone(&self.start_failed),
            meeting_start_ms: Arc::clone(&self.meeting_start_ms),
            pid: Arc::clone(&self.pid),
            done: self.done.clone(),
            recording_start_ms,
        };
        tokio::spawn(async move {
            let status = child.wait().await;
            waiter.handle_exit(status).await;
        });
    }

    /// Request shutdown. Sets the grace flag, waits the grace period,
    /// sends the graceful termination signal, arms the hard-kill fallback,
    /// and resolves only after post-processing finished and `Stopped` was
    /// emitted. Calling on a non-running session is a no-op.
    pub async fn stop(&self) -> Result<(), RecorderError> {
        let current = self.status.state().await;
        if current != CaptureState::Running {
            debug!("stop() ignored in state {}", current.as_str());
            return Ok(());
        }

        self.grace.store(true, Ordering::SeqCst);
        self.status.set_state(CaptureState::Stopping).await;
        info!(
            "Stop requested; giving the encoder {}s to flush",
            GRACE_PERIOD_SECONDS
        );
        sleep(Duration::from_secs(GRACE_PERIOD_SECONDS)).await;

        self.signal_subprocess("TERM");

        // Hard-kill fallback: an encoder that ignores SIGTERM is killed
        // after 8s; that exit is classified as abnormal.
        let pid = Arc::clone(&self.pid);
        let mut done_rx = self.done.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(Duration::from_secs(HARD_KILL_DELAY_SECONDS)) => {
                    let pid = pid.load(Ordering::SeqCst);
                    if pid != 0 {
                        warn!("Encoder unresponsive after {}s; hard-killing", HARD_KILL_DELAY_SECONDS);
                        send_signal(pid, "KILL").await;
                    }
                }
                _ = wait_done(&mut done_rx) => {}
            }
        });

        let mut done_rx = self.done.subscribe();
        wait_done(&mut done_rx).await;
        Ok(())
    }

    fn signal_subprocess(&self, signal: &'static str) {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            return;
        }
        tokio::spawn(async move {
            send_signal(pid, signal).await;
        });
    }
}

async fn wait_done(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Deliver a signal to the capture subprocess by pid.
async fn send_signal(pid: u32, signal: &'static str) {
    let result = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        warn!("Failed to send SIG{signal} to {pid}: {e}");
    }
}

/// Pump subprocess stdout into the streaming sink, one whole-sample frame
/// at a time, never blocking on the sink.
async fn pump_stream(mut stdout: tokio::process::ChildStdout, sink: Arc<dyn StreamSink>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 8192];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Some(frame) = decoder.push_bytes(&buf[..n]) {
                    sink.push(frame);
                }
            }
            Err(e) => {
                warn!("Capture stdout read failed: {e}");
                break;
            }
        }
    }
    debug!("Capture stream pump finished");
}

/// Everything the exit waiter needs once the subprocess is gone.
struct ExitWaiter {
    config: CaptureConfig,
    paths: RecorderPaths,
    runner: Arc<MediaRunner>,
    planner: Arc<SyncPlanner>,
    post: Arc<PostProcessor>,
    events: EventSender,
    status: CaptureStatusHandle,
    grace: Arc<AtomicBool>,
    start_failed: Arc<AtomicBool>,
    meeting_start_ms: Arc<AtomicI64>,
    pid: Arc<AtomicU32>,
    done: watch::Sender<bool>,
    recording_start_ms: i64,
}

impl ExitWaiter {
    async fn handle_exit(self, status: std::io::Result<std::process::ExitStatus>) {
        self.pid.store(0, Ordering::SeqCst);

        let code = match status {
            Ok(s) => numeric_exit(&s),
            Err(e) => {
                error!("Failed to reap capture subprocess: {e}");
                -1
            }
        };

        let grace_active = self.grace.load(Ordering::SeqCst);
        info!(
            "Capture subprocess exited with code {} (grace {})",
            code,
            if grace_active { "active" } else { "inactive" }
        );

        if exit_is_success(code, grace_active) {
            match self.run_post_processing().await {
                Ok(artifacts) => {
                    info!(
                        "Post-processing complete: audio {:?}, {} chunk(s)",
                        artifacts.final_audio,
                        artifacts.chunks.len()
                    );
                    self.status.set_state(CaptureState::StoppedSuccess).await;
                }
                Err(e) => {
                    error!("Post-processing failed: {e}");
                    self.events.emit(CaptureEvent::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    self.status.set_state(CaptureState::StoppedFailure).await;
                }
            }
        } else {
            if !self.start_failed.load(Ordering::SeqCst) {
                let err = RecorderError::CaptureAbort { code };
                error!("{err}");
                self.events.emit(CaptureEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                });
            }
            self.status.set_state(CaptureState::StoppedFailure).await;
        }

        self.events.emit(CaptureEvent::Stopped);
        let _ = self.done.send(true);
    }

    async fn run_post_processing(&self) -> Result<Artifacts, RecorderError> {
        if self.config.mode.is_audio_only() {
            return self.post.run_audio_only().await;
        }

        let raw_audio = self.paths.raw_audio();
        let raw_video = self.paths.raw_video();

        let offsets = self.planner.compute_offset(&raw_audio, &raw_video).await?;
        let video_duration = self
            .runner
            .duration_of(&raw_video)
            .await
            .map_err(|e| RecorderError::SyncFailure(format!("video duration probe: {e}")))?;
        let audio_duration = self
            .runner
            .duration_of(&raw_audio)
            .await
            .map_err(|e| RecorderError::SyncFailure(format!("audio duration probe: {e}")))?;

        let timing = MeetingTiming {
            recording_start_ms: self.recording_start_ms,
            meeting_start_ms: self.meeting_start_ms.load(Ordering::SeqCst),
            now_ms: Utc::now().timestamp_millis(),
        };
        let plan = TrimPlan::build(&offsets, video_duration, audio_duration, &timing)?;
        info!(
            "Trim plan: padding {:+.3}s, start {:.3}s, duration {:.3}s",
            plan.audio_padding, plan.trim_start, plan.final_duration
        );

        self.post.run(&plan).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::stream::ChannelSink;
    use crate::capture::RecordingMode;
    use crate::page::DetachedPage;
    use crate::postprocess::PostProcessOptions;
    use crate::upload::ObjectStorage;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use std::path::Path;

    struct NullStorage;

    #[async_trait]
    impl ObjectStorage for NullStorage {
        async fn put(&self, _: &Path, _: &str, _: &str, _: bool) -> AnyResult<()> {
            Ok(())
        }
    }

    fn test_session() -> CaptureSession {
        let paths = RecorderPaths::from_root(Path::new("/tmp/meetcap-test"));
        let runner = Arc::new(MediaRunner::with_paths(
            PathBuf::from("/bin/true"),
            PathBuf::from("/bin/true"),
        ));
        let post = Arc::new(PostProcessor::new(
            Arc::clone(&runner),
            Arc::new(NullStorage),
            paths.clone(),
            PostProcessOptions {
                bot_id: "bot".to_string(),
                audio_bucket: "a".to_string(),
                video_bucket: "v".to_string(),
                chunking_enabled: false,
                delete_temp_files: false,
            },
        ));
        let (sink, _rx) = ChannelSink::new(4);
        let (events, _events_rx) = EventSender::channel();
        CaptureSession::new(
            CaptureConfig {
                mode: RecordingMode::AudioVideo,
                ..CaptureConfig::default()
            },
            paths,
            Arc::clone(&runner),
            Arc::new(SyncPlanner::new(Arc::clone(&runner))),
            post,
            Arc::new(DetachedPage),
            Arc::new(sink),
            events,
        )
    }

    #[test]
    fn test_exit_classification() {
        // Clean exit always succeeds.
        assert!(exit_is_success(0, false));
        assert!(exit_is_success(0, true));

        // Signal-terminated exits succeed only inside the grace period.
        assert!(exit_is_success(143, true));
        assert!(exit_is_success(255, true));
        assert!(!exit_is_success(143, false));
        assert!(!exit_is_success(255, false));

        // The hard-kill path and real failures are always abnormal.
        assert!(!exit_is_success(137, true));
        assert!(!exit_is_success(1, false));
        assert!(!exit_is_success(-1, true));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CaptureState::Idle.as_str(), "idle");
        assert_eq!(CaptureState::Stopping.as_str(), "stopping");
        assert_eq!(CaptureState::StoppedFailure.as_str(), "stopped_failure");
    }

    #[tokio::test]
    async fn test_stop_is_noop_when_idle() {
        let session = test_session();
        session.stop().await.unwrap();
        assert_eq!(session.status().state().await, CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_status_handle_begin_running() {
        let handle = CaptureStatusHandle::default();
        handle
            .begin_running(1_234, PathBuf::from("/w/raw.mp4"))
            .await;
        let status = handle.get().await;
        assert_eq!(status.state, CaptureState::Running);
        assert_eq!(status.recording_start_ms, 1_234);
        assert_eq!(status.output_path, Some(PathBuf::from("/w/raw.mp4")));
    }

    #[tokio::test]
    async fn test_meeting_start_defaults_to_zero() {
        let session = test_session();
        assert_eq!(session.meeting_start_ms.load(Ordering::SeqCst), 0);
        session.set_meeting_start(42);
        assert_eq!(session.meeting_start_ms.load(Ordering::SeqCst), 42);
    }
}

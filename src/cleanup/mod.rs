//! Shutdown cleanup sequence.
//!
//! On shutdown the coordinator stops the capture session first (awaited in
//! full, including post-processing), then releases the remaining resources
//! best-effort under bounded per-step deadlines and one global wall-clock
//! budget. Every failure is swallowed; cleanup always reaches the terminal
//! state and never loops.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureSession, StreamSink};
use crate::error::RecorderError;
use crate::page::MeetingPage;

/// A resource that can be asked to stop during cleanup: DOM observers,
/// the HTML cleaner, in-process media contexts.
#[async_trait]
pub trait CleanupStep: Send + Sync {
    async fn stop(&self) -> Result<()>;
}

pub struct CleanupCoordinator {
    capture: Arc<CaptureSession>,
    sink: Arc<dyn StreamSink>,
    page: Arc<dyn MeetingPage>,
    dialog_observer: Option<Arc<dyn CleanupStep>>,
    speakers_observer: Option<Arc<dyn CleanupStep>>,
    html_cleaner: Option<Arc<dyn CleanupStep>>,
    media_contexts: Vec<Arc<dyn CleanupStep>>,
    branding: Mutex<Option<tokio::process::Child>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
    global_timeout: Duration,
    step_timeout: Duration,
}

impl CleanupCoordinator {
    pub fn new(
        capture: Arc<CaptureSession>,
        sink: Arc<dyn StreamSink>,
        page: Arc<dyn MeetingPage>,
        global_timeout: Duration,
        step_timeout: Duration,
    ) -> Self {
        Self {
            capture,
            sink,
            page,
            dialog_observer: None,
            speakers_observer: None,
            html_cleaner: None,
            media_contexts: Vec::new(),
            branding: Mutex::new(None),
            timers: Mutex::new(Vec::new()),
            global_timeout,
            step_timeout,
        }
    }

    pub fn with_dialog_observer(mut self, step: Arc<dyn CleanupStep>) -> Self {
        self.dialog_observer = Some(step);
        self
    }

    pub fn with_speakers_observer(mut self, step: Arc<dyn CleanupStep>) -> Self {
        self.speakers_observer = Some(step);
        self
    }

    pub fn with_html_cleaner(mut self, step: Arc<dyn CleanupStep>) -> Self {
        self.html_cleaner = Some(step);
        self
    }

    pub fn with_media_context(mut self, step: Arc<dyn CleanupStep>) -> Self {
        self.media_contexts.push(step);
        self
    }

    /// Hand over the branding subprocess, terminated during cleanup.
    pub async fn set_branding_process(&self, child: tokio::process::Child) {
        *self.branding.lock().await = Some(child);
    }

    /// Register a meeting timer to be cleared at shutdown.
    pub async fn register_timer(&self, handle: JoinHandle<()>) {
        self.timers.lock().await.push(handle);
    }

    /// Run the full cleanup sequence under the global deadline.
    pub async fn run(&self) {
        match timeout(self.global_timeout, self.run_steps()).await {
            Ok(()) => info!("Cleanup complete"),
            Err(_) => {
                error!("{}", RecorderError::CleanupTimeout);
                // Forced terminal state: anything still in flight is left
                // to the capture session's hard-kill fallback.
            }
        }
    }

    async fn run_steps(&self) {
        // Step 0: dialog observer, fire-and-forget.
        if let Some(observer) = &self.dialog_observer {
            let observer = Arc::clone(observer);
            tokio::spawn(async move {
                if let Err(e) = observer.stop().await {
                    debug!("Dialog observer stop failed: {e}");
                }
            });
        }

        // Step 1, priority: the capture session, awaited through
        // post-processing.
        if let Err(e) = self.capture.stop().await {
            warn!("Capture stop during cleanup failed: {e}");
        }

        // Step 2: independent best-effort stops in parallel.
        tokio::join!(
            async {
                if let Err(e) = self.sink.stop().await {
                    warn!("Streaming sink stop failed: {e}");
                }
            },
            self.timed_step("speakers_observer", self.speakers_observer.as_ref()),
            self.timed_step("html_cleaner", self.html_cleaner.as_ref()),
        );

        // Step 3: the sequential tail.
        self.terminate_branding().await;
        for context in &self.media_contexts {
            if let Err(e) = context.stop().await {
                warn!("Media context stop failed: {e}");
            }
        }
        if let Err(e) = self.page.close().await {
            debug!("Page close failed (ignored): {e}");
        }
        self.clear_timers().await;
    }

    async fn timed_step(&self, name: &'static str, step: Option<&Arc<dyn CleanupStep>>) {
        let Some(step) = step else {
            return;
        };
        match timeout(self.step_timeout, step.stop()).await {
            Ok(Ok(())) => debug!("Cleanup step '{name}' done"),
            Ok(Err(e)) => warn!("Cleanup step '{name}' failed: {e}"),
            Err(_) => warn!("{}", RecorderError::CleanupStepTimeout { step: name }),
        }
    }

    async fn terminate_branding(&self) {
        let mut guard = self.branding.lock().await;
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.start_kill() {
                debug!("Branding process already gone: {e}");
            }
            let _ = child.wait().await;
        }
    }

    async fn clear_timers(&self) {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for handle in timers.drain(..) {
            handle.abort();
        }
        if count > 0 {
            debug!("Cleared {count} meeting timer(s)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::stream::ChannelSink;
    use crate::capture::{CaptureConfig, CaptureSession};
    use crate::capture::events::EventSender;
    use crate::media::MediaRunner;
    use crate::page::DetachedPage;
    use crate::paths::RecorderPaths;
    use crate::postprocess::{PostProcessOptions, PostProcessor};
    use crate::sync::SyncPlanner;
    use crate::upload::ObjectStorage;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NullStorage;

    #[async_trait]
    impl ObjectStorage for NullStorage {
        async fn put(&self, _: &Path, _: &str, _: &str, _: bool) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingStep {
        stopped: AtomicBool,
    }

    impl RecordingStep {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                stopped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl CleanupStep for RecordingStep {
        async fn stop(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct HangingStep;

    #[async_trait]
    impl CleanupStep for HangingStep {
        async fn stop(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn idle_session() -> Arc<CaptureSession> {
        let paths = RecorderPaths::from_root(Path::new("/tmp/meetcap-cleanup-test"));
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
        let (events, _rx) = EventSender::channel();
        Arc::new(CaptureSession::new(
            CaptureConfig::default(),
            paths,
            Arc::clone(&runner),
            Arc::new(SyncPlanner::new(Arc::clone(&runner))),
            post,
            Arc::new(DetachedPage),
            Arc::new(sink),
            events,
        ))
    }

    fn coordinator() -> CleanupCoordinator {
        let (sink, _rx) = ChannelSink::new(4);
        CleanupCoordinator::new(
            idle_session(),
            Arc::new(sink),
            Arc::new(DetachedPage),
            Duration::from_secs(60),
            Duration::from_secs(3),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_steps_stopped() {
        let speakers = RecordingStep::new();
        let html = RecordingStep::new();
        let context = RecordingStep::new();

        let coordinator = coordinator()
            .with_speakers_observer(speakers.clone())
            .with_html_cleaner(html.clone())
            .with_media_context(context.clone());

        coordinator.run().await;

        assert!(speakers.stopped.load(Ordering::SeqCst));
        assert!(html.stopped.load(Ordering::SeqCst));
        assert!(context.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_step_forces_progress() {
        let html = RecordingStep::new();
        let coordinator = coordinator()
            .with_speakers_observer(Arc::new(HangingStep))
            .with_html_cleaner(html.clone());

        // The hanging speakers observer is abandoned at its 3s deadline;
        // the rest of the sequence still runs.
        coordinator.run().await;
        assert!(html.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_cleared() {
        let coordinator = coordinator();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7200)).await;
            fired_clone.store(true, Ordering::SeqCst);
        });
        coordinator.register_timer(handle).await;

        coordinator.run().await;
        tokio::time::sleep(Duration::from_secs(7201)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}

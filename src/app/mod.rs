//! Service wiring: build the capture stack from configuration and run one
//! recording session until shutdown is requested.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::capture::events::EventSender;
use crate::capture::{
    CaptureConfig, CaptureEvent, CaptureSession, ChannelSink, StreamSink,
};
use crate::cleanup::CleanupCoordinator;
use crate::config::Config;
use crate::global;
use crate::media::MediaRunner;
use crate::page::{DetachedPage, MeetingPage};
use crate::paths::RecorderPaths;
use crate::postprocess::{PostProcessOptions, PostProcessor};
use crate::sync::SyncPlanner;
use crate::upload::HttpObjectStorage;

/// Frames the local streaming sink buffers before dropping.
const STREAM_BUFFER_FRAMES: usize = 64;

pub async fn run_service() -> Result<()> {
    info!("Starting meetcap service");

    let config = Config::load()?;
    let runner = Arc::new(MediaRunner::locate()?);

    let session_dir = global::recordings_dir()?
        .join(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
    let paths = RecorderPaths::from_root(&session_dir);
    paths
        .ensure()
        .context("Failed to create session directories")?;
    info!("Session directory: {:?}", session_dir);

    let storage = Arc::new(HttpObjectStorage::new(&config.storage.endpoint));
    let post = Arc::new(PostProcessor::new(
        Arc::clone(&runner),
        storage,
        paths.clone(),
        PostProcessOptions {
            bot_id: config.capture.bot_id.clone(),
            audio_bucket: config.storage.audio_bucket.clone(),
            video_bucket: config.storage.video_bucket.clone(),
            chunking_enabled: config.storage.transcription_enabled,
            delete_temp_files: config.behavior.delete_temp_files,
        },
    ));
    let planner = Arc::new(SyncPlanner::new(Arc::clone(&runner)));

    let (sink, stream_rx) = ChannelSink::new(STREAM_BUFFER_FRAMES);
    let sink: Arc<dyn StreamSink> = Arc::new(sink);
    spawn_stream_drain(stream_rx);

    let page: Arc<dyn MeetingPage> = Arc::new(DetachedPage);
    let (events, events_rx) = EventSender::channel();
    spawn_event_logger(events_rx);

    let session = Arc::new(CaptureSession::new(
        CaptureConfig::from_section(&config.capture),
        paths,
        runner,
        planner,
        post,
        Arc::clone(&page),
        Arc::clone(&sink),
        events,
    ));

    session.start().await?;
    // Without a meeting-joining layer attached, the meeting is considered
    // started the moment capture is up; the joining layer overrides this
    // with the real join instant.
    session.set_meeting_start(Utc::now().timestamp_millis());

    info!("Recording; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    let cleanup = CleanupCoordinator::new(
        session,
        sink,
        page,
        Duration::from_secs(config.meeting.cleanup_timeout_seconds),
        Duration::from_secs(config.meeting.cleanup_step_timeout_seconds),
    );
    cleanup.run().await;

    Ok(())
}

/// Drain the live PCM feed. A deployed bot hands this receiver to the
/// transcription feeder instead.
fn spawn_stream_drain(mut rx: mpsc::Receiver<Vec<f32>>) {
    tokio::spawn(async move {
        let mut frames: u64 = 0;
        let mut samples: u64 = 0;
        while let Some(frame) = rx.recv().await {
            frames += 1;
            samples += frame.len() as u64;
        }
        debug!("Live stream closed after {frames} frames ({samples} samples)");
    });
}

fn spawn_event_logger(mut rx: mpsc::UnboundedReceiver<CaptureEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                CaptureEvent::Started {
                    output_path,
                    audio_only,
                } => {
                    info!(
                        "Capture started: {:?} (audio_only: {})",
                        output_path, audio_only
                    );
                }
                CaptureEvent::Stopped => info!("Capture stopped"),
                CaptureEvent::Error { kind, message } => {
                    error!("Capture error [{}]: {}", kind.as_str(), message);
                }
            }
        }
        warn!("Capture event channel closed");
    });
}

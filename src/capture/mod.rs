//! Capture session: one long-lived encoder subprocess producing four
//! synchronized outputs (raw video, raw audio, screenshots, live PCM).

pub mod args;
pub mod device;
pub mod events;
pub mod session;
pub mod stream;

pub use events::CaptureEvent;
pub use session::{CaptureSession, CaptureState, CaptureStatusHandle};
pub use stream::{ChannelSink, FrameDecoder, StreamSink};

use crate::config::CaptureSection;

/// Sample rate of the archived audio track.
pub const ARCHIVE_SAMPLE_RATE: u32 = 44_100;

/// Sample rate of the live float-PCM stream on the subprocess pipe.
pub const STREAM_SAMPLE_RATE: u32 = 24_000;

/// Delay between capture start and the sync-tone request, letting the
/// browser's flash screen settle.
pub const FLASH_SCREEN_SLEEP_MS: u64 = 6_000;

/// Window after `stop()` during which a signal-terminated exit counts as a
/// clean shutdown.
pub const GRACE_PERIOD_SECONDS: u64 = 3;

/// Hard-kill fallback armed after the graceful termination signal.
pub const HARD_KILL_DELAY_SECONDS: u64 = 8;

/// Recording mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    AudioOnly,
    AudioVideo,
}

impl RecordingMode {
    pub fn is_audio_only(&self) -> bool {
        matches!(self, Self::AudioOnly)
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "audio-only" => Self::AudioOnly,
            _ => Self::AudioVideo,
        }
    }
}

/// Immutable capture configuration, resolved once per session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub display: String,
    pub audio_source: String,
    pub mode: RecordingMode,
    pub grab_width: u32,
    pub grab_height: u32,
    pub crop_width: u32,
    pub crop_height: u32,
    pub crop_x: u32,
    pub crop_y: u32,
    pub framerate: u32,
    pub crf: u32,
    pub screenshot_period_secs: u32,
    pub screenshot_width: u32,
    pub screenshot_height: u32,
}

impl CaptureConfig {
    pub fn from_section(section: &CaptureSection) -> Self {
        Self {
            display: section.display.clone(),
            audio_source: section.audio_source.clone(),
            mode: RecordingMode::parse(&section.mode),
            ..Self::default()
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            display: ":99".to_string(),
            audio_source: "meetcap_sink.monitor".to_string(),
            mode: RecordingMode::AudioVideo,
            grab_width: 1280,
            grab_height: 880,
            crop_width: 1280,
            crop_height: 720,
            crop_x: 0,
            crop_y: 160,
            framerate: 30,
            crf: 23,
            screenshot_period_secs: 5,
            screenshot_width: 480,
            screenshot_height: 270,
        }
    }
}

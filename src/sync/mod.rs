//! Sync planning: tone offsets and the trim plan.
//!
//! After capture stops, the tone the live page emitted is located in both
//! recorded tracks; the difference becomes the audio head padding, and the
//! meeting-phase wall clock folds in to a single trim plan the
//! post-processor executes.

pub mod tone;

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::capture::FLASH_SCREEN_SLEEP_MS;
use crate::error::RecorderError;
use crate::media::MediaRunner;

/// Sample rate the tracks are decoded to for tone analysis.
pub const ANALYSIS_SAMPLE_RATE: u32 = 8_000;

/// Only the head of each track is decoded; the tone arrives a few seconds
/// after capture start.
pub const SEARCH_WINDOW_SECS: u32 = 60;

/// Largest plausible audio↔video skew. Anything beyond this means the tone
/// match is wrong, not that the tracks genuinely drifted minutes apart.
pub const MAX_TONE_SKEW_SECS: f64 = 5.0;

/// Recordings at or under this length cannot fall back to a synthetic
/// meeting start.
const FALLBACK_MIN_RECORDING_MS: i64 = 10_000;

/// The synthetic meeting start keeps this much trailing pre-meeting time.
const FALLBACK_LOOKBACK_MS: i64 = 5_000;

/// Tone position in each raw track, seconds from track start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneOffsets {
    pub audio_tone_time: f64,
    pub video_tone_time: f64,
}

/// Wall-clock context for building a trim plan, all epoch milliseconds.
/// `meeting_start_ms` is zero until the meeting actually began.
#[derive(Debug, Clone, Copy)]
pub struct MeetingTiming {
    pub recording_start_ms: i64,
    pub meeting_start_ms: i64,
    pub now_ms: i64,
}

/// The triple that fully determines the post-processing transformation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimPlan {
    pub audio_tone_time: f64,
    pub video_tone_time: f64,
    /// Seconds of silence to prepend to the audio head; negative means
    /// trim that much instead.
    pub audio_padding: f64,
    /// Seconds into the merged output where the meeting starts.
    pub trim_start: f64,
    /// Seconds of the merged output to retain.
    pub final_duration: f64,
}

impl TrimPlan {
    /// Fold tone offsets and meeting-phase timing into a trim plan.
    pub fn build(
        offsets: &ToneOffsets,
        video_duration: f64,
        audio_duration: f64,
        timing: &MeetingTiming,
    ) -> Result<Self, RecorderError> {
        let audio_padding = offsets.video_tone_time - offsets.audio_tone_time;
        if audio_padding.abs() > MAX_TONE_SKEW_SECS {
            return Err(RecorderError::SyncFailure(format!(
                "tone offset {:.3}s exceeds the plausible skew of {}s",
                audio_padding, MAX_TONE_SKEW_SECS
            )));
        }

        let meeting_start_ms = effective_meeting_start(timing)?;
        let trim_start = (offsets.video_tone_time
            + (meeting_start_ms - timing.recording_start_ms - FLASH_SCREEN_SLEEP_MS as i64) as f64
                / 1000.0)
            .max(0.0);

        let padded_audio_duration = audio_duration + audio_padding;
        let final_duration = (video_duration - trim_start).min(padded_audio_duration);
        if final_duration <= 0.0 {
            return Err(RecorderError::SyncFailure(format!(
                "no content remains after trimming {trim_start:.2}s from a {video_duration:.2}s recording"
            )));
        }

        Ok(Self {
            audio_tone_time: offsets.audio_tone_time,
            video_tone_time: offsets.video_tone_time,
            audio_padding,
            trim_start,
            final_duration,
        })
    }
}

/// Resolve the meeting start, substituting a synthetic one for sessions
/// that ended before the meeting was ever marked as started.
fn effective_meeting_start(timing: &MeetingTiming) -> Result<i64, RecorderError> {
    if timing.meeting_start_ms > 0 {
        return Ok(timing.meeting_start_ms);
    }

    let recorded_ms = timing.now_ms - timing.recording_start_ms;
    if recorded_ms > FALLBACK_MIN_RECORDING_MS {
        let fallback = timing.now_ms - FALLBACK_LOOKBACK_MS;
        info!(
            "Meeting start never observed; keeping the trailing {}s of the recording",
            FALLBACK_LOOKBACK_MS / 1000
        );
        Ok(fallback)
    } else {
        Err(RecorderError::BotRemovedTooEarly { recorded_ms })
    }
}

/// Locates the sync tone in the raw tracks via the external decoder.
pub struct SyncPlanner {
    runner: Arc<MediaRunner>,
}

impl SyncPlanner {
    pub fn new(runner: Arc<MediaRunner>) -> Self {
        Self { runner }
    }

    /// Tone position in the raw audio and raw video, seconds, both
    /// non-negative. Residual tolerance ≤ 50 ms.
    pub async fn compute_offset(
        &self,
        audio_path: &Path,
        video_path: &Path,
    ) -> Result<ToneOffsets, RecorderError> {
        let audio_tone_time = self.locate_in(audio_path).await?;
        let video_tone_time = self.locate_in(video_path).await?;

        info!(
            "Sync tone located: audio {:.3}s, video {:.3}s",
            audio_tone_time, video_tone_time
        );

        Ok(ToneOffsets {
            audio_tone_time,
            video_tone_time,
        })
    }

    async fn locate_in(&self, path: &Path) -> Result<f64, RecorderError> {
        let window = SEARCH_WINDOW_SECS.to_string();
        let rate = ANALYSIS_SAMPLE_RATE.to_string();
        let args = [
            OsStr::new("-i"),
            path.as_os_str(),
            OsStr::new("-t"),
            OsStr::new(&window),
            OsStr::new("-map"),
            OsStr::new("0:a:0"),
            OsStr::new("-ac"),
            OsStr::new("1"),
            OsStr::new("-ar"),
            OsStr::new(&rate),
            OsStr::new("-f"),
            OsStr::new("f32le"),
            OsStr::new("pipe:1"),
        ];

        let bytes = self
            .runner
            .run_decoder(args)
            .await
            .map_err(|e| RecorderError::SyncFailure(format!("decode of {path:?} failed: {e}")))?;

        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        debug!("Decoded {} samples from {:?} for tone search", samples.len(), path);

        tone::locate_tone(&samples, ANALYSIS_SAMPLE_RATE).ok_or_else(|| {
            RecorderError::SyncFailure(format!("sync tone not found in {path:?}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(recording_start_ms: i64, meeting_start_ms: i64, now_ms: i64) -> MeetingTiming {
        MeetingTiming {
            recording_start_ms,
            meeting_start_ms,
            now_ms,
        }
    }

    #[test]
    fn test_clean_video_session() {
        // Tone at 7.20s video / 7.05s audio, meeting began 10s into the
        // recording.
        let offsets = ToneOffsets {
            audio_tone_time: 7.05,
            video_tone_time: 7.20,
        };
        let plan = TrimPlan::build(
            &offsets,
            3_600.0,
            3_600.0,
            &timing(1_000_000, 1_010_000, 4_600_000),
        )
        .unwrap();

        assert!((plan.audio_padding - 0.150).abs() < 1e-9);
        assert!((plan.trim_start - 11.20).abs() < 1e-9);
        assert!((plan.final_duration - (3_600.0 - 11.20)).abs() < 1e-9);
    }

    #[test]
    fn test_video_slightly_behind() {
        let offsets = ToneOffsets {
            audio_tone_time: 7.10,
            video_tone_time: 6.90,
        };
        let plan = TrimPlan::build(
            &offsets,
            1_800.0,
            1_800.0,
            &timing(1_000_000, 1_010_000, 2_800_000),
        )
        .unwrap();

        // 200ms trimmed from the audio head.
        assert!((plan.audio_padding + 0.200).abs() < 1e-9);
    }

    #[test]
    fn test_premature_shutdown_uses_fallback() {
        // Meeting start never arrived; 25s recorded. The synthetic start
        // keeps the trailing 5s.
        let offsets = ToneOffsets {
            audio_tone_time: 7.0,
            video_tone_time: 7.2,
        };
        let plan = TrimPlan::build(&offsets, 25.0, 25.0, &timing(1_000_000, 0, 1_025_000)).unwrap();

        // trim_start = 7.2 + (1_020_000 - 1_000_000 - 6_000) / 1000 = 21.2
        assert!((plan.trim_start - 21.2).abs() < 1e-9);
        assert!((plan.final_duration - 3.8).abs() < 1e-9);
    }

    #[test]
    fn test_bot_removed_too_early() {
        let offsets = ToneOffsets {
            audio_tone_time: 1.0,
            video_tone_time: 1.0,
        };
        let err = TrimPlan::build(&offsets, 8.0, 8.0, &timing(1_000_000, 0, 1_008_000)).unwrap_err();
        assert!(matches!(
            err,
            RecorderError::BotRemovedTooEarly { recorded_ms: 8_000 }
        ));
    }

    #[test]
    fn test_implausible_skew_rejected() {
        let offsets = ToneOffsets {
            audio_tone_time: 1.0,
            video_tone_time: 20.0,
        };
        let err =
            TrimPlan::build(&offsets, 100.0, 100.0, &timing(0, 10_000, 60_000)).unwrap_err();
        assert!(matches!(err, RecorderError::SyncFailure(_)));
    }

    #[test]
    fn test_duration_bound_takes_shorter_audio() {
        let offsets = ToneOffsets {
            audio_tone_time: 7.0,
            video_tone_time: 7.0,
        };
        let plan = TrimPlan::build(
            &offsets,
            3_600.0,
            1_000.0,
            &timing(1_000_000, 1_010_000, 2_000_000),
        )
        .unwrap();
        assert!((plan.final_duration - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_nothing_left_after_trim() {
        let offsets = ToneOffsets {
            audio_tone_time: 7.0,
            video_tone_time: 7.0,
        };
        let err = TrimPlan::build(
            &offsets,
            10.0,
            10.0,
            &timing(1_000_000, 1_100_000, 2_000_000),
        )
        .unwrap_err();
        assert!(matches!(err, RecorderError::SyncFailure(_)));
    }

    #[test]
    fn test_trim_start_clamped_at_zero() {
        // Meeting marked started before the tone-delay window elapsed.
        let offsets = ToneOffsets {
            audio_tone_time: 1.0,
            video_tone_time: 1.0,
        };
        let plan = TrimPlan::build(
            &offsets,
            600.0,
            600.0,
            &timing(1_000_000, 1_000_500, 1_600_000),
        )
        .unwrap();
        assert!(plan.trim_start >= 0.0);
    }
}

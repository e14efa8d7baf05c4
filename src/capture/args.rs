//! Deterministic argument vector for the capture subprocess.
//!
//! One ffmpeg invocation, two inputs (display grab, pulse monitor), up to
//! four outputs in a fixed order: raw video file, raw audio file, periodic
//! JPEG screenshots, and a live f32le stream on stdout.

use crate::capture::{CaptureConfig, ARCHIVE_SAMPLE_RATE, STREAM_SAMPLE_RATE};
use crate::paths::RecorderPaths;

/// Build the full capture argument vector.
///
/// `screenshot_ts` is the wall-clock millisecond prefix baked into
/// screenshot filenames.
pub fn build_capture_args(
    config: &CaptureConfig,
    paths: &RecorderPaths,
    screenshot_ts: i64,
) -> Vec<String> {
    let crop = format!(
        "crop={}:{}:{}:{}",
        config.crop_width, config.crop_height, config.crop_x, config.crop_y
    );
    let crf = config.crf.to_string();
    let gop = config.framerate.to_string();
    let archive_rate = ARCHIVE_SAMPLE_RATE.to_string();
    let stream_rate = STREAM_SAMPLE_RATE.to_string();

    let mut args: Vec<String> = vec![
        "-y".into(),
        // Input 0: the virtual display hosting the browser session.
        "-f".into(),
        "x11grab".into(),
        "-video_size".into(),
        format!("{}x{}", config.grab_width, config.grab_height),
        "-framerate".into(),
        config.framerate.to_string(),
        "-i".into(),
        config.display.clone(),
        // Input 1: the meeting audio monitor source.
        "-f".into(),
        "pulse".into(),
        "-i".into(),
        config.audio_source.clone(),
    ];

    if !config.mode.is_audio_only() {
        // Output 1: raw video. GOP equals the framerate so every keyframe
        // lands on a 1-second boundary and the final trim can stream-copy.
        args.extend(
            [
                "-map",
                "0:v",
                "-vf",
                crop.as_str(),
                "-c:v",
                "libx264",
                "-profile:v",
                "main",
                "-level",
                "4.0",
                "-preset",
                "fast",
                "-crf",
                crf.as_str(),
                "-pix_fmt",
                "yuv420p",
                "-g",
                gop.as_str(),
                "-keyint_min",
                gop.as_str(),
                "-bf",
                "0",
                "-refs",
                "1",
                "-avoid_negative_ts",
                "make_zero",
                "-f",
                "mp4",
            ]
            .map(String::from),
        );
        args.push(paths.raw_video().to_string_lossy().into_owned());
    }

    // Output 2: raw archived audio, 16-bit mono.
    args.extend(
        [
            "-map",
            "1:a",
            "-c:a",
            "pcm_s16le",
            "-ac",
            "1",
            "-ar",
            archive_rate.as_str(),
            "-avoid_negative_ts",
            "make_zero",
            "-f",
            "wav",
        ]
        .map(String::from),
    );
    args.push(paths.raw_audio().to_string_lossy().into_owned());

    // Output 3: periodic screenshots.
    let shot_filter = format!(
        "fps=1/{},{},scale={}:{}",
        config.screenshot_period_secs, crop, config.screenshot_width, config.screenshot_height
    );
    args.extend(["-map", "0:v", "-vf", shot_filter.as_str(), "-q:v", "3"].map(String::from));
    args.push(
        paths
            .screenshot_pattern(screenshot_ts)
            .to_string_lossy()
            .into_owned(),
    );

    // Output 4: live float-PCM stream on the stdout pipe.
    args.extend(
        [
            "-map",
            "1:a",
            "-c:a",
            "pcm_f32le",
            "-ac",
            "1",
            "-ar",
            stream_rate.as_str(),
            "-f",
            "f32le",
            "pipe:1",
        ]
        .map(String::from),
    );

    args
}

/// Arguments for the 100 ms dry-run used as a device-readiness fallback.
pub fn build_dry_run_args(audio_source: &str) -> Vec<String> {
    [
        "-f",
        "pulse",
        "-i",
        audio_source,
        "-t",
        "0.1",
        "-f",
        "null",
        "-",
    ]
    .map(String::from)
    .to_vec()
}

//! Integration tests for the sync planner and post-processing pipeline.
//!
//! These tests require ffmpeg/ffprobe on PATH and are skipped by default.
//! Run with: cargo test --test pipeline_integration -- --ignored

use anyhow::Result;
use async_trait::async_trait;
use meetcap::media::MediaRunner;
use meetcap::paths::RecorderPaths;
use meetcap::postprocess::{PostProcessOptions, PostProcessor};
use meetcap::sync::tone::reference_tone;
use meetcap::sync::SyncPlanner;
use meetcap::upload::ObjectStorage;
use std::path::Path;
use std::sync::Arc;

/// Storage that is always offline, so final artifacts stay on disk for the
/// assertions below.
struct OfflineStorage;

#[async_trait]
impl ObjectStorage for OfflineStorage {
    async fn put(&self, _: &Path, _: &str, _: &str, _: bool) -> Result<()> {
        anyhow::bail!("storage offline")
    }
}

const RATE: u32 = 44_100;

/// Write a mono 16-bit WAV with the sync tone starting at `tone_at` seconds.
fn write_wav_with_tone(path: &Path, total_secs: f64, tone_at: f64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();

    let total = (total_secs * RATE as f64) as usize;
    let onset = (tone_at * RATE as f64) as usize;
    let tone = reference_tone(RATE);

    for i in 0..total {
        let sample = if i >= onset && i < onset + tone.len() {
            tone[i - onset]
        } else {
            // Quiet background so the file is not all-zero.
            0.002 * ((i % 200) as f32 / 200.0 - 0.5)
        };
        writer
            .write_sample((sample * i16::MAX as f32) as i16)
            .unwrap();
    }
    writer.finalize().unwrap();
}

fn read_samples(path: &Path) -> Vec<i16> {
    hound::WavReader::open(path)
        .unwrap()
        .samples::<i16>()
        .map(|s| s.unwrap())
        .collect()
}

#[tokio::test]
#[ignore] // Requires ffmpeg/ffprobe on PATH
async fn tone_located_within_tolerance() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("tone.wav");
    write_wav_with_tone(&wav, 12.0, 2.5);

    let runner = Arc::new(MediaRunner::locate().unwrap());
    let planner = SyncPlanner::new(runner);

    // The same file stands in for both tracks; both offsets must agree
    // with the true onset within the 50ms residual tolerance.
    let offsets = planner.compute_offset(&wav, &wav).await.unwrap();
    assert!((offsets.audio_tone_time - 2.5).abs() <= 0.05);
    assert!((offsets.video_tone_time - 2.5).abs() <= 0.05);
}

#[tokio::test]
#[ignore] // Requires ffmpeg/ffprobe on PATH
async fn audio_only_pipeline_chunks_reproduce_final_wav() {
    let dir = tempfile::tempdir().unwrap();
    let paths = RecorderPaths::from_root(dir.path());
    paths.ensure().unwrap();
    write_wav_with_tone(&paths.raw_audio(), 10.0, 1.0);

    let runner = Arc::new(MediaRunner::locate().unwrap());
    let post = PostProcessor::new(
        runner,
        Arc::new(OfflineStorage),
        paths.clone(),
        PostProcessOptions {
            bot_id: "bot-it".to_string(),
            audio_bucket: "audio".to_string(),
            video_bucket: "video".to_string(),
            chunking_enabled: true,
            delete_temp_files: false,
        },
    );

    let artifacts = post.run_audio_only().await.unwrap();
    assert!(artifacts.final_video.is_none());
    assert!(artifacts.final_audio.exists());
    assert!(!artifacts.chunks.is_empty());

    // Segment-then-concat reproduces the final WAV sample-for-sample.
    let final_samples = read_samples(&artifacts.final_audio);
    let mut concatenated = Vec::new();
    for chunk in &artifacts.chunks {
        concatenated.extend(read_samples(chunk));
    }
    assert_eq!(concatenated, final_samples);

    // Format is preserved: 44.1kHz mono 16-bit.
    let spec = hound::WavReader::open(&artifacts.final_audio)
        .unwrap()
        .spec();
    assert_eq!(spec.sample_rate, RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
}

//! Post-processing pipeline.
//!
//! Executes the trim plan as a strict sequence of external encoder
//! invocations: align the audio head, merge with video, trim the merged
//! file to the meeting boundaries, re-extract the audio, segment it into
//! chunks, and upload everything. Each stage begins only after the prior
//! stage's subprocess exited 0; the first failure is fatal to the session.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{MediaError, RecorderError};
use crate::media::MediaRunner;
use crate::paths::RecorderPaths;
use crate::sync::TrimPlan;
use crate::upload::ObjectStorage;

/// Upper bound on a single chunk, seconds.
pub const MAX_CHUNK_SECONDS: f64 = 3_600.0;

/// Expected shape of the final WAV artifact.
const FINAL_WAV_SAMPLE_RATE: u32 = 44_100;
const FINAL_WAV_BITS: u16 = 16;

/// Session-level knobs the post-processor needs beyond paths and tools.
#[derive(Debug, Clone)]
pub struct PostProcessOptions {
    pub bot_id: String,
    pub audio_bucket: String,
    pub video_bucket: String,
    /// Set when a transcription provider is configured; enables chunking.
    pub chunking_enabled: bool,
    /// Delete raw/processed/merged intermediates once the pipeline is done.
    pub delete_temp_files: bool,
}

/// What a finished session leaves behind.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub final_video: Option<PathBuf>,
    pub final_audio: PathBuf,
    pub chunks: Vec<PathBuf>,
}

/// Derive the content-addressed artifact identifier from the bot identity.
pub fn derive_identifier(bot_id: &str) -> String {
    let digest = Sha256::digest(bot_id.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

pub struct PostProcessor {
    runner: Arc<MediaRunner>,
    storage: Arc<dyn ObjectStorage>,
    paths: RecorderPaths,
    options: PostProcessOptions,
    identifier: String,
}

impl PostProcessor {
    pub fn new(
        runner: Arc<MediaRunner>,
        storage: Arc<dyn ObjectStorage>,
        paths: RecorderPaths,
        options: PostProcessOptions,
    ) -> Self {
        let identifier = derive_identifier(&options.bot_id);
        Self {
            runner,
            storage,
            paths,
            options,
            identifier,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Audio-only sessions: the raw audio is already the final audio.
    pub async fn run_audio_only(&self) -> Result<Artifacts, RecorderError> {
        let final_audio = self.paths.final_audio(&self.identifier);
        tokio::fs::copy(self.paths.raw_audio(), &final_audio).await?;
        info!("Audio-only session: copied raw audio to {:?}", final_audio);
        self.validate_final_wav(&final_audio);

        let chunks = self.chunk_audio(&final_audio).await?;
        self.upload_chunks(&chunks).await;
        let final_audio = self.upload_final(final_audio, None).await;

        if self.options.delete_temp_files {
            self.cleanup_temp().await;
        }

        Ok(Artifacts {
            final_video: None,
            final_audio,
            chunks,
        })
    }

    /// Full pipeline for audio+video sessions.
    pub async fn run(&self, plan: &TrimPlan) -> Result<Artifacts, RecorderError> {
        self.align_audio_head(plan.audio_padding).await?;
        self.merge().await?;
        let final_video = self.final_trim(plan).await?;
        let final_audio = self.extract_audio(&final_video).await?;
        self.validate_final_wav(&final_audio);

        let chunks = self.chunk_audio(&final_audio).await?;
        self.upload_chunks(&chunks).await;
        let final_audio = self.upload_final(final_audio, Some(&final_video)).await;

        if self.options.delete_temp_files {
            self.cleanup_temp().await;
        }

        Ok(Artifacts {
            final_video: Some(final_video),
            final_audio,
            chunks,
        })
    }

    /// Pad or trim the audio head so the tone lands at the same instant in
    /// both tracks.
    async fn align_audio_head(&self, padding: f64) -> Result<(), RecorderError> {
        let raw = self.paths.raw_audio();
        let processed = self.paths.processed_audio();

        if padding > 0.0 {
            self.prepend_silence(padding).await
        } else if padding < 0.0 {
            info!("Trimming {:.3}s from the audio head", -padding);
            let args = vec![
                "-y".to_string(),
                "-ss".to_string(),
                format!("{:.3}", -padding),
                "-i".to_string(),
                raw.to_string_lossy().into_owned(),
                "-c:a".to_string(),
                "pcm_s16le".to_string(),
                "-ac".to_string(),
                "1".to_string(),
                "-ar".to_string(),
                FINAL_WAV_SAMPLE_RATE.to_string(),
                "-avoid_negative_ts".to_string(),
                "make_zero".to_string(),
                processed.to_string_lossy().into_owned(),
            ];
            self.encoder_stage("trim_audio_head", args).await
        } else {
            tokio::fs::copy(&raw, &processed).await?;
            Ok(())
        }
    }

    /// Synthesize exactly `padding` seconds of silence and concatenate it
    /// ahead of the raw audio, re-encoding for monotonic timestamps.
    async fn prepend_silence(&self, padding: f64) -> Result<(), RecorderError> {
        info!("Prepending {:.3}s of silence to the audio head", padding);
        let silence = self.paths.silence();
        let list = self.paths.concat_list();

        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("anullsrc=r={}:cl=mono", FINAL_WAV_SAMPLE_RATE),
            "-t".to_string(),
            format!("{padding:.3}"),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            FINAL_WAV_SAMPLE_RATE.to_string(),
            silence.to_string_lossy().into_owned(),
        ];
        self.encoder_stage("synthesize_silence", args).await?;

        tokio::fs::write(&list, concat_list_contents(&silence, &self.paths.raw_audio())).await?;

        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list.to_string_lossy().into_owned(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            FINAL_WAV_SAMPLE_RATE.to_string(),
            self.paths.processed_audio().to_string_lossy().into_owned(),
        ];
        let result = self.encoder_stage("concat_silence", args).await;

        // The silence and the list are ephemeral regardless of outcome.
        let _ = tokio::fs::remove_file(&silence).await;
        let _ = tokio::fs::remove_file(&list).await;

        result
    }

    /// Stream-copy the raw video and encode the aligned audio to AAC into
    /// a single MP4, bounded by the shorter input.
    async fn merge(&self) -> Result<(), RecorderError> {
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            self.paths.raw_video().to_string_lossy().into_owned(),
            "-i".to_string(),
            self.paths.processed_audio().to_string_lossy().into_owned(),
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "1:a".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-shortest".to_string(),
            "-avoid_negative_ts".to_string(),
            "make_zero".to_string(),
            self.paths.merged().to_string_lossy().into_owned(),
        ];
        self.encoder_stage("merge", args).await
    }

    /// Cut the merged file to the meeting boundaries. Stream copy is safe
    /// because the recording keeps a 1-second keyframe interval.
    async fn final_trim(&self, plan: &TrimPlan) -> Result<PathBuf, RecorderError> {
        let output = self.paths.final_video(&self.identifier);
        let args = vec![
            "-y".to_string(),
            "-ss".to_string(),
            format!("{:.3}", plan.trim_start),
            "-i".to_string(),
            self.paths.merged().to_string_lossy().into_owned(),
            "-t".to_string(),
            format!("{:.3}", plan.final_duration),
            "-c".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().into_owned(),
        ];
        self.encoder_stage("final_trim", args).await?;
        Ok(output)
    }

    /// Strip the final video's audio back out so the standalone WAV agrees
    /// with the stored video sample-for-sample.
    async fn extract_audio(&self, final_video: &Path) -> Result<PathBuf, RecorderError> {
        let output = self.paths.final_audio(&self.identifier);
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            final_video.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            FINAL_WAV_SAMPLE_RATE.to_string(),
            output.to_string_lossy().into_owned(),
        ];
        self.encoder_stage("extract_audio", args).await?;
        Ok(output)
    }

    /// Segment the final audio into fixed-duration chunks.
    async fn chunk_audio(&self, final_audio: &Path) -> Result<Vec<PathBuf>, RecorderError> {
        if !self.options.chunking_enabled {
            return Ok(Vec::new());
        }

        let total = self
            .runner
            .duration_of(final_audio)
            .await
            .map_err(|source| RecorderError::PostProcess {
                stage: "chunk_audio",
                source,
            })?;
        let segment_time = total.min(MAX_CHUNK_SECONDS);

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            final_audio.to_string_lossy().into_owned(),
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            format!("{segment_time:.3}"),
            "-c".to_string(),
            "copy".to_string(),
            self.paths
                .chunk_pattern(&self.options.bot_id)
                .to_string_lossy()
                .into_owned(),
        ];
        self.encoder_stage("chunk_audio", args).await?;

        let chunks = collect_chunks(self.paths.chunks_dir(), &self.options.bot_id)?;
        info!(
            "Segmented {:.1}s of audio into {} chunk(s)",
            total,
            chunks.len()
        );
        Ok(chunks)
    }

    /// Upload each chunk; a failed chunk is logged and skipped, never
    /// aborting the batch.
    async fn upload_chunks(&self, chunks: &[PathBuf]) {
        for chunk in chunks {
            let name = chunk
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = format!("{}/{}", self.options.bot_id, name);

            if let Err(e) = self
                .storage
                .put(chunk, &self.options.audio_bucket, &key, true)
                .await
            {
                let err = RecorderError::Upload {
                    key,
                    message: e.to_string(),
                };
                warn!("Chunk upload skipped: {}", err);
            }
        }
    }

    /// Upload the final artifacts. Local copies are deleted on success and
    /// retained on failure so an out-of-band retry stays possible.
    /// Returns the (possibly still local) final audio path.
    async fn upload_final(&self, final_audio: PathBuf, final_video: Option<&Path>) -> PathBuf {
        let wav_key = format!("{}.wav", self.identifier);
        self.upload_and_remove(&final_audio, &wav_key).await;

        if let Some(video) = final_video {
            let mp4_key = format!("{}.mp4", self.identifier);
            self.upload_and_remove(video, &mp4_key).await;
        }

        final_audio
    }

    async fn upload_and_remove(&self, local: &Path, key: &str) {
        match self
            .storage
            .put(local, &self.options.video_bucket, key, false)
            .await
        {
            Ok(()) => {
                info!("Uploaded {:?} as {}/{}", local, self.options.video_bucket, key);
                if let Err(e) = tokio::fs::remove_file(local).await {
                    warn!("Failed to delete uploaded artifact {:?}: {}", local, e);
                }
            }
            Err(e) => {
                let err = RecorderError::Upload {
                    key: key.to_string(),
                    message: e.to_string(),
                };
                warn!("Final artifact retained locally: {}", err);
            }
        }
    }

    /// Sanity-check the final WAV header; a mismatch is logged, not fatal.
    fn validate_final_wav(&self, path: &Path) {
        match hound::WavReader::open(path) {
            Ok(reader) => {
                let spec = reader.spec();
                if spec.sample_rate != FINAL_WAV_SAMPLE_RATE
                    || spec.channels != 1
                    || spec.bits_per_sample != FINAL_WAV_BITS
                {
                    warn!(
                        "Final WAV has unexpected format: {}Hz {}ch {}bit",
                        spec.sample_rate, spec.channels, spec.bits_per_sample
                    );
                }
            }
            Err(e) => warn!("Could not validate final WAV {:?}: {}", path, e),
        }
    }

    async fn cleanup_temp(&self) {
        for path in [
            self.paths.raw_video(),
            self.paths.raw_audio(),
            self.paths.processed_audio(),
            self.paths.merged(),
        ] {
            if path.exists() {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to delete temp file {:?}: {}", path, e);
                }
            }
        }
    }

    async fn encoder_stage(
        &self,
        stage: &'static str,
        args: Vec<String>,
    ) -> Result<(), RecorderError> {
        self.runner
            .run_encoder(args)
            .await
            .map_err(|source| RecorderError::PostProcess { stage, source })
    }
}

/// Concat-demuxer list placing the silence ahead of the raw audio.
fn concat_list_contents(silence: &Path, raw_audio: &Path) -> String {
    format!(
        "file '{}'\nfile '{}'\n",
        silence.display(),
        raw_audio.display()
    )
}

/// Find produced chunk files, ordered by index.
fn collect_chunks(chunks_dir: &Path, bot_id: &str) -> Result<Vec<PathBuf>, RecorderError> {
    let prefix = format!("{bot_id}-");
    let mut indexed: Vec<(usize, PathBuf)> = Vec::new();

    for entry in std::fs::read_dir(chunks_dir).map_err(map_chunk_io)? {
        let entry = entry.map_err(map_chunk_io)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(index) = rest.strip_suffix(".wav") else {
            continue;
        };
        if let Ok(index) = index.parse::<usize>() {
            indexed.push((index, entry.path()));
        }
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, path)| path).collect())
}

fn map_chunk_io(e: std::io::Error) -> RecorderError {
    RecorderError::PostProcess {
        stage: "chunk_audio",
        source: MediaError::Io(e),
    }
}

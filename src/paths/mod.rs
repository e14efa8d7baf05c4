//! Working-directory layout for a recording session.
//!
//! The path manager owns the four directories a session writes into; the
//! capture, sync, and post-processing components read these paths but never
//! mutate the layout.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directory layout for one recording session.
///
/// ```text
/// <temp>/raw.mp4           raw video (video mode only)
/// <temp>/raw.wav           raw audio
/// <temp>/processed.wav     head-aligned audio
/// <temp>/silence.wav       ephemeral silence (deleted)
/// <temp>/concat_list.txt   ephemeral concat list (deleted)
/// <temp>/merged.mp4        pre-trim merged file
/// <out>/<id>.mp4           final video
/// <out>/<id>.wav           final audio
/// <chunks>/<botId>-N.wav   audio chunks, N starting at 0
/// <screenshots>/<ts>_NNNN.jpg
/// ```
#[derive(Debug, Clone)]
pub struct RecorderPaths {
    temp_dir: PathBuf,
    output_dir: PathBuf,
    screenshots_dir: PathBuf,
    chunks_dir: PathBuf,
}

impl RecorderPaths {
    /// Lay the four session directories out under a single root.
    pub fn from_root(root: &Path) -> Self {
        Self {
            temp_dir: root.join("tmp"),
            output_dir: root.join("out"),
            screenshots_dir: root.join("screenshots"),
            chunks_dir: root.join("chunks"),
        }
    }

    pub fn new(
        temp_dir: PathBuf,
        output_dir: PathBuf,
        screenshots_dir: PathBuf,
        chunks_dir: PathBuf,
    ) -> Self {
        Self {
            temp_dir,
            output_dir,
            screenshots_dir,
            chunks_dir,
        }
    }

    /// Create all session directories.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            &self.temp_dir,
            &self.output_dir,
            &self.screenshots_dir,
            &self.chunks_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn screenshots_dir(&self) -> &Path {
        &self.screenshots_dir
    }

    pub fn chunks_dir(&self) -> &Path {
        &self.chunks_dir
    }

    pub fn raw_video(&self) -> PathBuf {
        self.temp_dir.join("raw.mp4")
    }

    pub fn raw_audio(&self) -> PathBuf {
        self.temp_dir.join("raw.wav")
    }

    pub fn processed_audio(&self) -> PathBuf {
        self.temp_dir.join("processed.wav")
    }

    pub fn silence(&self) -> PathBuf {
        self.temp_dir.join("silence.wav")
    }

    pub fn concat_list(&self) -> PathBuf {
        self.temp_dir.join("concat_list.txt")
    }

    pub fn merged(&self) -> PathBuf {
        self.temp_dir.join("merged.mp4")
    }

    pub fn final_video(&self, identifier: &str) -> PathBuf {
        self.output_dir.join(format!("{identifier}.mp4"))
    }

    pub fn final_audio(&self, identifier: &str) -> PathBuf {
        self.output_dir.join(format!("{identifier}.wav"))
    }

    /// ffmpeg segment-muxer pattern for chunk files.
    pub fn chunk_pattern(&self, bot_id: &str) -> PathBuf {
        self.chunks_dir.join(format!("{bot_id}-%d.wav"))
    }

    pub fn chunk_file(&self, bot_id: &str, index: usize) -> PathBuf {
        self.chunks_dir.join(format!("{bot_id}-{index}.wav"))
    }

    /// ffmpeg image2 pattern for periodic screenshots.
    pub fn screenshot_pattern(&self, timestamp_ms: i64) -> PathBuf {
        self.screenshots_dir.join(format!("{timestamp_ms}_%04d.jpg"))
    }
}

use crate::global;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureSection,
    pub storage: StorageSection,
    pub behavior: BehaviorSection,
    pub meeting: MeetingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// X display the browser session renders on.
    pub display: String,
    /// PulseAudio/PipeWire monitor source name for meeting audio.
    pub audio_source: String,
    /// `audio-video` or `audio-only`.
    pub mode: String,
    /// Identity of this bot instance; prefixes chunk filenames and upload keys.
    pub bot_id: String,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            display: ":99".to_string(),
            audio_source: "meetcap_sink.monitor".to_string(),
            mode: "audio-video".to_string(),
            bot_id: "meetcap-bot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Object-storage endpoint uploads are PUT against.
    pub endpoint: String,
    /// Bucket for per-chunk transcription audio (short-TTL).
    pub audio_bucket: String,
    /// Bucket for final meeting artifacts.
    pub video_bucket: String,
    /// Whether a transcription provider is configured; enables chunking.
    pub transcription_enabled: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9000".to_string(),
            audio_bucket: "temporary-audio".to_string(),
            video_bucket: "meeting-videos".to_string(),
            transcription_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorSection {
    /// Delete intermediate files (raw/processed/merged) after post-processing.
    pub delete_temp_files: bool,
}

impl Default for BehaviorSection {
    fn default() -> Self {
        Self {
            delete_temp_files: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeetingSection {
    /// Global wall-clock budget for the shutdown cleanup sequence.
    pub cleanup_timeout_seconds: u64,
    /// Per-step budget for best-effort observer shutdown.
    pub cleanup_step_timeout_seconds: u64,
}

impl Default for MeetingSection {
    fn default() -> Self {
        Self {
            cleanup_timeout_seconds: 60,
            cleanup_step_timeout_seconds: 3,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = global::config_file()?;
        let config = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content)
                    .with_context(|| format!("Invalid TOML in {:?}", path))?;
                debug!("Loaded config from {:?}", path);
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {:?}; writing defaults", path);
                let config = Self::default();
                config.save()?;
                config
            }
            Err(e) => return Err(e).with_context(|| format!("Could not read {:?}", path)),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the capture stack cannot act on. Caught here so a typo
    /// in the config file fails at startup, not mid-meeting.
    pub fn validate(&self) -> Result<()> {
        match self.capture.mode.as_str() {
            "audio-video" | "audio-only" => {}
            other => bail!("capture.mode must be 'audio-video' or 'audio-only', got '{other}'"),
        }
        if self.capture.bot_id.trim().is_empty() {
            bail!("capture.bot_id must not be empty");
        }
        if self.capture.display.is_empty() || self.capture.audio_source.is_empty() {
            bail!("capture.display and capture.audio_source must be set");
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = global::config_file()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {:?}", parent))?;
        }
        let rendered = toml::to_string_pretty(self)?;
        std::fs::write(&path, rendered).with_context(|| format!("Could not write {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.capture.mode, "audio-video");
        assert_eq!(config.storage.audio_bucket, "temporary-audio");
        assert!(config.behavior.delete_temp_files);
        assert_eq!(config.meeting.cleanup_step_timeout_seconds, 3);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.capture.display, config.capture.display);
        assert_eq!(parsed.storage.endpoint, config.storage.endpoint);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config = toml::from_str("[capture]\ndisplay = \":1\"\n").unwrap();
        assert_eq!(parsed.capture.display, ":1");
        assert_eq!(parsed.capture.mode, "audio-video");
        assert!(parsed.storage.transcription_enabled);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_mode() {
        let mut config = Config::default();
        config.capture.mode = "video-only".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capture.mode"));
    }

    #[test]
    fn test_validate_rejects_blank_bot_id() {
        let mut config = Config::default();
        config.capture.bot_id = "  ".to_string();
        assert!(config.validate().is_err());
    }
}

//! Structured error kinds for the recording core.
//!
//! The capture session absorbs subprocess exit signals and reclassifies
//! them; the post-processor re-raises the first stage failure; the cleanup
//! coordinator swallows everything and always reaches the terminal state.

use thiserror::Error;

/// Errors surfaced by the recording core to the enclosing meeting machine.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("audio monitor source '{source_name}' not ready after {attempts} attempts")]
    DeviceNotReady { source_name: String, attempts: u32 },

    #[error("failed to start capture: {0}")]
    CaptureStart(String),

    #[error("capture process exited unexpectedly with code {code}")]
    CaptureAbort { code: i32 },

    #[error("audio/video sync failed: {0}")]
    SyncFailure(String),

    #[error("bot removed too early: only {recorded_ms}ms recorded before meeting start was known")]
    BotRemovedTooEarly { recorded_ms: i64 },

    #[error("post-processing stage '{stage}' failed: {source}")]
    PostProcess {
        stage: &'static str,
        #[source]
        source: MediaError,
    },

    #[error("upload of '{key}' failed: {message}")]
    Upload { key: String, message: String },

    #[error("cleanup step '{step}' exceeded its deadline")]
    CleanupStepTimeout { step: &'static str },

    #[error("cleanup exceeded the global deadline")]
    CleanupTimeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Coarse kind tag for event payloads and log fields.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceNotReady { .. } => ErrorKind::DeviceNotReady,
            Self::CaptureStart(_) => ErrorKind::CaptureStart,
            Self::CaptureAbort { .. } => ErrorKind::CaptureAbort,
            Self::SyncFailure(_) | Self::BotRemovedTooEarly { .. } => ErrorKind::Sync,
            Self::PostProcess { .. } => ErrorKind::PostProcess,
            Self::Upload { .. } => ErrorKind::Upload,
            Self::CleanupStepTimeout { .. } | Self::CleanupTimeout => ErrorKind::Cleanup,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Error kind tag carried on [`crate::capture::CaptureEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceNotReady,
    CaptureStart,
    CaptureAbort,
    Sync,
    PostProcess,
    Upload,
    Cleanup,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceNotReady => "device_not_ready",
            Self::CaptureStart => "capture_start",
            Self::CaptureAbort => "capture_abort",
            Self::Sync => "sync",
            Self::PostProcess => "post_process",
            Self::Upload => "upload",
            Self::Cleanup => "cleanup",
            Self::Io => "io",
        }
    }
}

/// Errors from a single external media-tool invocation.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("{tool} exited with code {code}")]
    FailedWithCode { tool: &'static str, code: i32 },

    #[error("{tool} was terminated by a signal")]
    Terminated { tool: &'static str },

    #[error("{tool} produced unparseable output: {detail}")]
    BadOutput { tool: &'static str, detail: String },

    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

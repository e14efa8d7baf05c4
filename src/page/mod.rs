//! Handle on the live meeting page.
//!
//! The browser-automation layer that joins the meeting is an external
//! collaborator; the recording core only needs to ask the page to emit the
//! sync tone and to close it during cleanup.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Contract the meeting-joining layer implements for the recording core.
#[async_trait]
pub trait MeetingPage: Send + Sync {
    /// Ask the page to play the short sinusoid both tracks are aligned on.
    async fn request_sync_tone(&self) -> Result<()>;

    /// Close the page and its browser context. Errors are swallowed by the
    /// cleanup coordinator.
    async fn close(&self) -> Result<()>;
}

/// Stand-in page for running the core without a browser layer attached.
/// Logs tone requests instead of injecting them.
pub struct DetachedPage;

#[async_trait]
impl MeetingPage for DetachedPage {
    async fn request_sync_tone(&self) -> Result<()> {
        info!("Sync tone requested (no live page attached)");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

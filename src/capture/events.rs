//! Typed session events for the enclosing meeting state machine.

use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ErrorKind;

/// Lifecycle events emitted by a capture session, in strict order:
/// `Started` → `Stopped`, with at most one `Error` in between. `Stopped`
/// fires only after post-processing completes or the failure is classified.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Started {
        output_path: PathBuf,
        audio_only: bool,
    },
    Stopped,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// Sending half of the session's event channel.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. A closed receiver is not an error for the session;
    /// the enclosing machine may already be gone during shutdown.
    pub fn emit(&self, event: CaptureEvent) {
        if self.tx.send(event.clone()).is_err() {
            warn!("No listener for capture event {:?}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_emit_order() {
        let (tx, mut rx) = EventSender::channel();
        tx.emit(CaptureEvent::Started {
            output_path: PathBuf::from("/w/out"),
            audio_only: false,
        });
        tx.emit(CaptureEvent::Stopped);

        assert!(matches!(
            rx.recv().await.unwrap(),
            CaptureEvent::Started { .. }
        ));
        assert_eq!(rx.recv().await.unwrap(), CaptureEvent::Stopped);
    }

    #[test]
    fn test_emit_without_listener_does_not_panic() {
        let (tx, rx) = EventSender::channel();
        drop(rx);
        tx.emit(CaptureEvent::Stopped);
    }
}

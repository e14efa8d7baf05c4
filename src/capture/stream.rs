//! Live PCM fan-out.
//!
//! Bytes arriving on the capture subprocess stdout are reinterpreted as
//! little-endian 32-bit float samples and handed to the streaming sink on a
//! best-effort basis. The pump never blocks on the sink; frames the sink
//! cannot take are dropped, not queued.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Consumer of live float-PCM frames.
#[async_trait]
pub trait StreamSink: Send + Sync {
    /// Offer one frame of samples. Returns false if the frame was dropped.
    /// Must not block.
    fn push(&self, frame: Vec<f32>) -> bool;

    /// Flush and shut down the sink.
    async fn stop(&self) -> Result<()>;
}

/// Turns a byte stream into whole-sample frames, carrying a partial sample
/// across reads so every frame is a multiple of 4 bytes.
#[derive(Default)]
pub struct FrameDecoder {
    remainder: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of bytes; returns the decoded samples, if any
    /// complete ones are available.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Option<Vec<f32>> {
        self.remainder.extend_from_slice(chunk);

        let whole = self.remainder.len() / 4 * 4;
        if whole == 0 {
            return None;
        }

        let samples: Vec<f32> = self.remainder[..whole]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        self.remainder.drain(..whole);
        Some(samples)
    }
}

/// Channel-backed sink feeding a local transcription consumer.
///
/// Bounded buffer; a full channel drops the frame and counts it.
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<f32>>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StreamSink for ChannelSink {
    fn push(&self, frame: Vec<f32>) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total % 100 == 1 {
                    debug!("Streaming sink backpressure: {} frames dropped", total);
                }
                false
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        let dropped = self.dropped_frames();
        if dropped > 0 {
            info!("Streaming sink stopped; {} frames dropped in total", dropped);
        }
        Ok(())
    }
}

//! Carrier Adapter (spec §4.2): uniform framing over two carrier flavors.
//!
//! Both variants expose the same contract upward — `recv()` yields caller
//! audio frames or control events in receive order, `send()` is best-effort
//! and drops (with a counted metric) when the outbound queue is saturated
//! rather than blocking the carrier's own read loop (spec §5).

mod binary_pcm;
mod mulaw_json;

pub use binary_pcm::BinaryPcmCarrier;
pub use mulaw_json::MulawJsonCarrier;

use crate::error::Result;
use crate::types::CarrierEvent;
use async_trait::async_trait;
use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::warn;

/// Depth of the outbound frame queue — about 1.3s of 20ms audio (spec §5).
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

#[async_trait]
pub trait CarrierTransport: Send {
    /// Next caller audio frame or control event, in receive order. `None`
    /// means the carrier socket closed.
    async fn recv(&mut self) -> Option<CarrierEvent>;

    /// Send PCM16/24k mixer output to the carrier. Best-effort: never
    /// blocks the caller audio receive loop.
    async fn send(&mut self, pcm24k: &[i16]) -> Result<()>;

    /// Count of outbound frames dropped due to back-pressure so far.
    fn dropped_frames(&self) -> u64;
}

/// Shared outbound-queue plumbing used by both carrier variants: a bounded
/// channel plus a writer task that drains it to the WebSocket sink. `send`
/// is `try_send` so a saturated queue drops the newest frame and counts it
/// rather than blocking (spec §4.2, §5).
pub(crate) struct OutboundQueue {
    tx: mpsc::Sender<Message>,
    dropped: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl OutboundQueue {
    pub(crate) fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            tx,
            dropped: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    pub(crate) fn try_send(&self, msg: Message) {
        if self.tx.try_send(msg).is_err() {
            self.dropped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!("carrier outbound queue saturated, dropping frame");
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

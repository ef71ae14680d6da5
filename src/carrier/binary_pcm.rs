//! Variant B — binary PCM carrier, no JSON control channel.
//!
//! Inbound: raw little-endian PCM16 44.1kHz binary frames; stream lifecycle
//! is inferred from the WebSocket's own open/close. Outbound: downsample
//! mixer PCM24k → 8k, base64 PCM LINEAR (not µ-law, per spec §4.2/§9),
//! wrapped in a `reverse-media` envelope bound to {streamId, channelId,
//! callId}.

use super::{CarrierTransport, OutboundQueue, OUTBOUND_QUEUE_DEPTH};
use crate::codec;
use crate::error::{BridgeError, Result};
use crate::types::{CallerFrame, CarrierEvent};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Serialize)]
struct ReverseMedia<'a> {
    event: &'static str,
    #[serde(rename = "streamId")]
    stream_id: &'a str,
    #[serde(rename = "channelId")]
    channel_id: &'a str,
    #[serde(rename = "callId")]
    call_id: &'a str,
    payload: String,
}

/// Decode one inbound binary frame into a caller frame. Pure function.
fn parse_inbound(bytes: &[u8]) -> Result<CallerFrame> {
    let pcm441 = codec::pcm16_from_bytes(bytes)?;
    let pcm16k = codec::resample(&pcm441, 44100, 16000);
    Ok(CallerFrame::new(pcm16k, 0, 0))
}

/// Build the outbound `reverse-media` envelope for PCM16/24k mixer output.
fn build_outbound(pcm24k: &[i16], stream_id: &str, channel_id: &str, call_id: &str) -> String {
    let pcm8k = codec::resample(pcm24k, 24000, 8000);
    let payload = BASE64.encode(codec::pcm16_to_bytes(&pcm8k));
    let envelope = ReverseMedia {
        event: "reverse-media",
        stream_id,
        channel_id,
        call_id,
        payload,
    };
    serde_json::to_string(&envelope).unwrap_or_default()
}

pub struct BinaryPcmCarrier {
    rx: SplitStream<WebSocket>,
    queue: OutboundQueue,
    writer: tokio::task::JoinHandle<()>,
    stream_id: String,
    channel_id: String,
    call_id: String,
    seq: u64,
}

impl BinaryPcmCarrier {
    pub fn new(ws: WebSocket, stream_id: String, channel_id: String, call_id: String) -> Self {
        let (mut ws_tx, ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Self {
            rx: ws_rx,
            queue: OutboundQueue::new(tx),
            writer,
            stream_id,
            channel_id,
            call_id,
            seq: 0,
        }
    }
}

impl Drop for BinaryPcmCarrier {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

#[async_trait]
impl CarrierTransport for BinaryPcmCarrier {
    async fn recv(&mut self) -> Option<CarrierEvent> {
        while let Some(msg) = self.rx.next().await {
            let Ok(msg) = msg else { return None };
            match msg {
                Message::Binary(data) => match parse_inbound(&data) {
                    Ok(mut frame) => {
                        frame.seq = self.seq;
                        self.seq += 1;
                        return Some(CarrierEvent::Audio(frame));
                    }
                    Err(BridgeError::InvalidPcmLength(_)) => continue,
                    Err(_) => continue,
                },
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    }

    async fn send(&mut self, pcm24k: &[i16]) -> Result<()> {
        let text = build_outbound(pcm24k, &self.stream_id, &self.channel_id, &self.call_id);
        self.queue.try_send(Message::Text(text.into()));
        Ok(())
    }

    fn dropped_frames(&self) -> u64 {
        self.queue.dropped()
    }
}

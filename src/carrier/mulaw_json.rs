//! Variant A — JSON-mulaw carrier (Twilio-style media streams).
//!
//! Inbound: text JSON frames tagged `start`/`media`/`stop`, media payload is
//! base64 µ-law 8kHz/20ms. Outbound: downsample mixer PCM24k → 8k → µ-law →
//! base64, wrapped in a `media` envelope bound to the stream id.

use super::{CarrierTransport, OutboundQueue, OUTBOUND_QUEUE_DEPTH};
use crate::codec;
use crate::error::{BridgeError, Result};
use crate::types::{CallerFrame, CarrierEvent, ControlEvent};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum InboundEvent {
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Media {
        media: MediaPayload,
    },
    Stop,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

#[derive(Debug, Serialize)]
struct OutboundMedia<'a> {
    event: &'static str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
    media: OutboundMediaPayload,
}

#[derive(Debug, Serialize)]
struct OutboundMediaPayload {
    payload: String,
}

/// Parse one inbound text frame into a caller frame or control event.
/// Pure function: testable without a socket.
fn parse_inbound(text: &str) -> Result<CarrierEvent> {
    let event: InboundEvent = serde_json::from_str(text)
        .map_err(|e| BridgeError::ProtocolError(format!("bad carrier JSON: {e}")))?;
    match event {
        InboundEvent::Start { stream_sid } => Ok(CarrierEvent::Control(
            ControlEvent::StreamStarted { stream_id: stream_sid },
        )),
        InboundEvent::Stop => Ok(CarrierEvent::Control(ControlEvent::StreamStopped)),
        InboundEvent::Media { media } => {
            let mulaw_bytes = BASE64
                .decode(media.payload.as_bytes())
                .map_err(|e| BridgeError::AudioDecodeError(format!("bad base64: {e}")))?;
            let pcm8k = codec::mulaw_decode(&mulaw_bytes);
            let pcm16k = codec::resample(&pcm8k, 8000, 16000);
            Ok(CarrierEvent::Audio(CallerFrame::new(pcm16k, 0, 0)))
        }
    }
}

/// Build the outbound `media` envelope for PCM16/24k mixer output.
fn build_outbound(pcm24k: &[i16], stream_id: &str) -> String {
    let pcm8k = codec::resample(pcm24k, 24000, 8000);
    let mulaw_bytes = codec::mulaw_encode(&pcm8k);
    let payload = BASE64.encode(mulaw_bytes);
    let envelope = OutboundMedia {
        event: "media",
        stream_sid: stream_id,
        media: OutboundMediaPayload { payload },
    };
    serde_json::to_string(&envelope).unwrap_or_default()
}

pub struct MulawJsonCarrier {
    rx: SplitStream<WebSocket>,
    queue: OutboundQueue,
    writer: tokio::task::JoinHandle<()>,
    stream_id: Option<String>,
    seq: u64,
}

impl MulawJsonCarrier {
    pub fn new(ws: WebSocket) -> Self {
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
            stream_id: None,
            seq: 0,
        }
    }
}

impl Drop for MulawJsonCarrier {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

#[async_trait]
impl CarrierTransport for MulawJsonCarrier {
    async fn recv(&mut self) -> Option<CarrierEvent> {
        while let Some(msg) = self.rx.next().await {
            let Ok(msg) = msg else { return None };
            match msg {
                Message::Text(text) => match parse_inbound(text.as_str()) {
                    Ok(CarrierEvent::Control(ControlEvent::StreamStarted { stream_id })) => {
                        self.stream_id = Some(stream_id.clone());
                        return Some(CarrierEvent::Control(ControlEvent::StreamStarted {
                            stream_id,
                        }));
                    }
                    Ok(mut event) => {
                        if let CarrierEvent::Audio(ref mut frame) = event {
                            frame.seq = self.seq;
                            self.seq += 1;
                        }
                        return Some(event);
                    }
                    Err(_) => continue, // AudioDecodeError: drop frame, keep reading
                },
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    }

    async fn send(&mut self, pcm24k: &[i16]) -> Result<()> {
        let Some(stream_id) = self.stream_id.clone() else {
            return Ok(()); // no stream announced yet, nothing to bind to
        };
        let text = build_outbound(pcm24k, &stream_id);
        self.queue.try_send(Message::Text(text.into()));
        Ok(())
    }

    fn dropped_frames(&self) -> u64 {
        self.queue.dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_event() {
        let event = parse_inbound(r#"{"event":"start","streamSid":"MZ123"}"#).unwrap();
        assert!(matches!(
            event,
            CarrierEvent::Control(ControlEvent::StreamStarted { stream_id }) if stream_id == "MZ123"
        ));
    }

    #[test]
    fn parses_stop_event() {
        let event = parse_inbound(r#"{"event":"stop"}"#).unwrap();
        assert!(matches!(
            event,
            CarrierEvent::Control(ControlEvent::StreamStopped)
        ));
    }

    #[test]
    fn parses_media_into_caller_frame() {
        let mulaw = codec::mulaw_encode(&[0, 100, -100]);
        let payload = BASE64.encode(mulaw);
        let text = format!(r#"{{"event":"media","media":{{"payload":"{payload}"}}}}"#);
        let event = parse_inbound(&text).unwrap();
        match event {
            CarrierEvent::Audio(frame) => assert_eq!(frame.pcm16_16k.len(), 6), // 8k->16k doubles
            _ => panic!("expected audio frame"),
        }
    }

    #[test]
    fn bad_base64_is_audio_decode_error() {
        let text = r#"{"event":"media","media":{"payload":"not-base64!!"}}"#;
        assert!(matches!(
            parse_inbound(text),
            Err(BridgeError::AudioDecodeError(_))
        ));
    }

    #[test]
    fn build_outbound_binds_stream_id() {
        let json = build_outbound(&[0i16; 480], "MZ999");
        assert!(json.contains("\"streamSid\":\"MZ999\""));
        assert!(json.contains("\"event\":\"media\""));
    }
}

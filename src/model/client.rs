//! Model Session Client (spec §4.3, §6.3).
//!
//! Owns the upstream WebSocket for one call: the `setup` handshake with a
//! bounded connect budget, outbound audio/text framing over a bounded
//! drop-oldest queue (mirroring the carrier adapter's back-pressure policy,
//! spec §5), and a receive loop that classifies server frames into
//! [`ModelFrame`]s. Reconnection is bounded (≤3 attempts, 1s/2s/4s backoff)
//! and only attempted for transient closes — an intentional close or a
//! fatal setup rejection ends the session for good (spec §4.3, §7).

use super::protocol::{parse_server_frame, ClientContentMessage, RealtimeInputMessage, SetupMessage};
use crate::error::{is_retryable_close_code, BridgeError, Result};
use crate::types::ModelFrame;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};
use uuid::Uuid;

const SETUP_BUDGET: Duration = Duration::from_secs(15);
const RECONNECT_BACKOFF_MS: [u64; 3] = [1000, 2000, 4000];
const MAX_RECONNECT_ATTEMPTS: u32 = 3;
const OUTBOUND_QUEUE_DEPTH: usize = 64;
/// Consecutive unparseable server frames before the session gives up and
/// surfaces a fatal error (spec §7) rather than looping forever on a
/// desynced protocol.
const MAX_CONSECUTIVE_PROTOCOL_ERRORS: u32 = 3;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Parameters needed to (re)open a session, held onto for reconnection.
#[derive(Clone)]
struct SessionParams {
    endpoint: String,
    api_key: String,
    model: String,
    voice_name: String,
    cached_content: Option<String>,
    persona_prompt: String,
}

/// The pieces of a live connection that get swapped out wholesale on
/// reconnect. Kept Drop-free so [`ModelSession::reconnect`] can move them
/// out of a freshly opened session without fighting the borrow checker.
struct Handles {
    read: SplitStream<WsStream>,
    tx: mpsc::Sender<Message>,
    writer: tokio::task::JoinHandle<()>,
    dropped: Arc<AtomicU64>,
    session_id: String,
}

/// A live connection to the upstream model: a writer task draining a
/// bounded outbound queue into the socket, and an owned receive half for
/// the session's read loop.
pub struct ModelSession {
    handles: Handles,
    params: SessionParams,
    reconnect_attempts: u32,
    total_reconnects: u64,
    consecutive_protocol_errors: u32,
}

/// Diagnostic reason the setup handshake failed, surfaced to the caller for
/// logging — distinct from [`BridgeError`] because several of these map to
/// the same error variant but mean different things operationally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupFailureReason {
    ConnectRefused,
    TlsHandshakeFailed,
    NoSetupCompleteWithinBudget,
    RejectedByModel,
}

impl SetupFailureReason {
    /// Best-effort classification of a setup-path error, for logging only —
    /// `BridgeError` stays the source of truth for control flow.
    fn classify(err: &BridgeError) -> Self {
        match err {
            BridgeError::SetupTimeout(_) => SetupFailureReason::NoSetupCompleteWithinBudget,
            BridgeError::SetupRejected(_) | BridgeError::QuotaOrAuth(_) => SetupFailureReason::RejectedByModel,
            BridgeError::WebSocket(tokio_tungstenite::tungstenite::Error::Tls(_)) => SetupFailureReason::TlsHandshakeFailed,
            _ => SetupFailureReason::ConnectRefused,
        }
    }
}

/// Validates a cache handle before it's sent upstream (spec §4.7, §8
/// scenario 5): a malformed id is never trusted, even if it came from the
/// orchestrator's own cache resolution, and falls back to inlining the
/// system instruction with a single warning instead of surfacing an error.
fn resolve_cached_content(cached_content: Option<&str>) -> Option<String> {
    match cached_content {
        Some(id) if crate::cache::is_valid_handle_id(id) => Some(id.to_string()),
        Some(id) => {
            warn!(handle = id, "malformed cache handle, inlining system instruction instead");
            None
        }
        None => None,
    }
}

impl ModelSession {
    /// Open the socket and run the `setup` handshake to completion, failing
    /// with a diagnosable reason if nothing usable arrives within
    /// [`SETUP_BUDGET`] (spec §4.3).
    pub async fn connect(
        endpoint: &str,
        api_key: &str,
        model: &str,
        voice_name: &str,
        cached_content: Option<String>,
        persona_prompt: &str,
    ) -> Result<Self> {
        let params = SessionParams {
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            voice_name: voice_name.to_string(),
            cached_content,
            persona_prompt: persona_prompt.to_string(),
        };
        Self::connect_with(params).await
    }

    async fn connect_with(params: SessionParams) -> Result<Self> {
        let handles = Self::open(&params).await?;
        Ok(ModelSession { handles, params, reconnect_attempts: 0, total_reconnects: 0, consecutive_protocol_errors: 0 })
    }

    /// Socket-open and the `setup`/`setupComplete` exchange share a single
    /// [`SETUP_BUDGET`] (spec §4.3) — not one budget per step.
    async fn open(params: &SessionParams) -> Result<Handles> {
        let url = format!("{}?key={}", params.endpoint, params.api_key);
        let request = url
            .into_client_request()
            .map_err(|e| BridgeError::ProtocolError(format!("bad model endpoint: {e}")))?;
        let session_id = Uuid::new_v4().to_string();

        let handshake = tokio::time::timeout(SETUP_BUDGET, async {
            let (ws_stream, _) = connect_async(request)
                .await
                .map_err(|e| BridgeError::TransientNetwork(format!("connect failed: {e}")))?;
            let (mut write, mut read) = ws_stream.split();

            let setup = SetupMessage::new(
                params.model.clone(),
                params.voice_name.clone(),
                resolve_cached_content(params.cached_content.as_deref()),
                &params.persona_prompt,
            );
            let json = serde_json::to_string(&setup)?;
            write.send(Message::Text(json.into())).await?;

            wait_for_setup_complete(&mut read, &session_id).await?;
            Ok::<_, BridgeError>((write, read))
        })
        .await;

        let (mut write, read) = match handshake {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!(reason = ?SetupFailureReason::classify(&e), "model setup failed");
                return Err(e);
            }
            Err(_) => {
                let err = BridgeError::SetupTimeout("setup did not complete within budget".into());
                warn!(reason = ?SetupFailureReason::classify(&err), "model setup failed");
                return Err(err);
            }
        };

        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        info!(session_id, "model session established");
        Ok(Handles {
            read,
            tx,
            writer,
            dropped: Arc::new(AtomicU64::new(0)),
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.handles.session_id
    }

    pub fn dropped_frames(&self) -> u64 {
        self.handles.dropped.load(Ordering::Relaxed)
    }

    /// Total successful reconnects over the session's lifetime, never reset
    /// (unlike [`Self::reconnect_attempts`], which tracks only the current
    /// budget window).
    pub fn total_reconnects(&self) -> u64 {
        self.total_reconnects
    }

    /// Send 20ms (or more) of caller audio. Best-effort: a saturated queue
    /// drops the newest chunk rather than blocking the state machine's
    /// audio-forwarding loop (spec §5).
    pub fn send_audio_16k(&self, pcm16_16k: &[i16]) {
        let msg = RealtimeInputMessage::audio_16k(pcm16_16k);
        let Ok(json) = serde_json::to_string(&msg) else { return };
        if self.handles.tx.try_send(Message::Text(json.into())).is_err() {
            self.handles.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(session_id = %self.handles.session_id, "model outbound queue saturated, dropping audio chunk");
        }
    }

    /// Send an out-of-band text turn (e.g. a tool result). Awaits the queue
    /// since text turns are rare and must not be silently dropped.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let msg = ClientContentMessage::text(text);
        let json = serde_json::to_string(&msg)?;
        self.handles
            .tx
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| BridgeError::CarrierClosed)?;
        Ok(())
    }

    /// Close out the model's in-flight turn on barge-in (spec §4.4, §8
    /// scenario 2): an empty, `turn_complete` client-content message tells
    /// the model to stop generating so no more of its audio gets queued.
    /// Best-effort like [`Self::send_audio_16k`] — barge-in needs this sent
    /// now, not after a full queue drains.
    pub fn cancel_turn(&self) {
        let msg = ClientContentMessage::cancel();
        let Ok(json) = serde_json::to_string(&msg) else { return };
        if self.handles.tx.try_send(Message::Text(json.into())).is_err() {
            self.handles.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(session_id = %self.handles.session_id, "model outbound queue saturated, dropping cancel-turn signal");
        }
    }

    /// Intentional close — never retried by [`Self::next_frame`]'s caller.
    pub async fn close(&mut self) -> Result<()> {
        let _ = self
            .handles
            .tx
            .send(Message::Close(Some(CloseFrame {
                code: 1000u16.into(),
                reason: "session ended".into(),
            })))
            .await;
        self.handles.writer.abort();
        Ok(())
    }

    /// Pull the next decoded frame, transparently reconnecting up to
    /// [`MAX_RECONNECT_ATTEMPTS`] times on a transient close (spec §4.3,
    /// §7). Returns `None` only after the reconnect budget is exhausted or
    /// the close was intentional/fatal.
    pub async fn next_frame(&mut self) -> Option<ModelFrame> {
        loop {
            match self.handles.read.next().await {
                Some(Ok(Message::Text(text))) => match parse_server_frame(&self.handles.session_id, &text) {
                    Ok(frames) => {
                        self.consecutive_protocol_errors = 0;
                        if let Some(frame) = frames.into_iter().next() {
                            return Some(frame);
                        }
                        continue;
                    }
                    Err(e) => {
                        self.consecutive_protocol_errors += 1;
                        warn!(session_id = %self.handles.session_id, error = %e, consecutive = self.consecutive_protocol_errors, "unparseable server frame");
                        if self.consecutive_protocol_errors >= MAX_CONSECUTIVE_PROTOCOL_ERRORS {
                            return Some(ModelFrame::Error("repeated protocol errors".into()));
                        }
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let retryable = frame.as_ref().map(|f| is_retryable_close_code(f.code.into())).unwrap_or(true);
                    if retryable && self.reconnect().await {
                        continue;
                    }
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) => {
                    if self.reconnect().await {
                        continue;
                    }
                    return None;
                }
                None => {
                    if self.reconnect().await {
                        continue;
                    }
                    return None;
                }
            }
        }
    }

    /// Bounded exponential-backoff reconnect. Resets the attempt counter on
    /// success so a long-lived call gets a fresh budget after it recovers.
    async fn reconnect(&mut self) -> bool {
        if self.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
            warn!(session_id = %self.handles.session_id, "reconnect budget exhausted");
            return false;
        }
        let delay = RECONNECT_BACKOFF_MS[self.reconnect_attempts as usize];
        self.reconnect_attempts += 1;
        warn!(session_id = %self.handles.session_id, attempt = self.reconnect_attempts, delay_ms = delay, "reconnecting to model");
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.handles.writer.abort();
        match Self::open(&self.params).await {
            Ok(fresh) => {
                self.handles = fresh;
                self.reconnect_attempts = 0;
                self.total_reconnects += 1;
                true
            }
            Err(e) => {
                warn!(session_id = %self.handles.session_id, error = %e, "reconnect attempt failed");
                false
            }
        }
    }
}

impl Drop for Handles {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

async fn wait_for_setup_complete(read: &mut SplitStream<WsStream>, session_id: &str) -> Result<()> {
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                let frames = parse_server_frame(session_id, &text)?;
                if frames.iter().any(|f| matches!(f, ModelFrame::Ready { .. })) {
                    return Ok(());
                }
                if let Some(ModelFrame::Error(e)) = frames.into_iter().next() {
                    return Err(BridgeError::SetupRejected(e));
                }
            }
            Message::Close(_) => return Err(BridgeError::TransientNetwork("closed during setup".into())),
            _ => continue,
        }
    }
    Err(BridgeError::SetupTimeout("socket closed before setupComplete".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failure_reasons_are_distinct() {
        assert_ne!(SetupFailureReason::ConnectRefused, SetupFailureReason::TlsHandshakeFailed);
    }

    #[test]
    fn reconnect_backoff_schedule_is_1_2_4_seconds() {
        assert_eq!(RECONNECT_BACKOFF_MS, [1000, 2000, 4000]);
    }

    #[test]
    fn malformed_cache_handle_falls_back_to_none() {
        assert_eq!(resolve_cached_content(Some("cached/bad id")), None);
    }

    #[test]
    fn well_formed_cache_handle_passes_through() {
        assert_eq!(
            resolve_cached_content(Some("cachedContents/abc-123")),
            Some("cachedContents/abc-123".to_string())
        );
    }

    #[test]
    fn absent_cache_handle_stays_none() {
        assert_eq!(resolve_cached_content(None), None);
    }
}

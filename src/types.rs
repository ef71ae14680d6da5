//! Core data model shared across the bridge (spec §3)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Which carrier flavor opened this call's media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarrierKind {
    /// Text JSON control channel, base64 mulaw 8kHz media (Twilio-style).
    MulawJson,
    /// Binary PCM16 44.1kHz frames, no control channel.
    BinaryPcm,
}

/// 20ms of caller audio, normalized to the Model Session Client's input rate.
///
/// PCM16 mono at 16kHz: 320 samples / 640 bytes per frame.
#[derive(Debug, Clone)]
pub struct CallerFrame {
    pub pcm16_16k: Vec<i16>,
    pub seq: u64,
    pub ts_ms: u64,
    /// Normalized RMS energy in [0,1], computed once at frame construction.
    pub rms: f32,
}

impl CallerFrame {
    pub const SAMPLES_PER_FRAME: usize = 320;

    pub fn new(pcm16_16k: Vec<i16>, seq: u64, ts_ms: u64) -> Self {
        let rms = crate::codec::rms(&pcm16_16k);
        Self { pcm16_16k, seq, ts_ms, rms }
    }
}

/// A control event surfaced by a carrier adapter alongside audio frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Carrier announced the stream identifier (`start` for variant A; a
    /// synthesized id for variant B, taken from connection metadata).
    StreamStarted { stream_id: String },
    /// Carrier signalled end of call (`stop` for variant A; socket close for B).
    StreamStopped,
}

/// Either a caller audio frame or an out-of-band carrier event.
#[derive(Debug, Clone)]
pub enum CarrierEvent {
    Audio(CallerFrame),
    Control(ControlEvent),
}

/// A decoded event emitted by the Model Session Client's receive loop.
#[derive(Debug, Clone)]
pub enum ModelFrame {
    /// PCM16 mono at 24kHz, already base64-decoded.
    Audio(Vec<i16>),
    Text(String),
    TurnComplete,
    Interrupted,
    ToolCall { id: String, payload: serde_json::Value },
    Error(String),
    Ready { session_id: String },
}

/// One contiguous span of utterance by one role, appended at turn boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
}

/// Opaque handle to an upstream "cached content" bundle.
///
/// Invariant: `id` always matches `^cachedContents/[A-Za-z0-9_-]+$` — handles
/// that fail validation are never constructed; callers fall back to inlining
/// the system instruction instead (spec §3, §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
    pub id: String,
    pub expires_at: DateTime<Utc>,
    pub owning_agent_id: String,
    pub content_fingerprint: String,
}

impl CacheHandle {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// A pre-loaded filler clip played while the agent is "thinking".
#[derive(Debug, Clone)]
pub struct FillerClip {
    pub id: String,
    pub language: String,
    pub principle_tags: Vec<String>,
    pub client_profile_tags: Vec<String>,
    pub pcm16_16k: Vec<i16>,
    pub duration: Duration,
}

/// Per-call identity and static references, owned exclusively by the Session
/// Orchestrator for the life of one call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: Uuid,
    pub agent_id: String,
    pub lead_name: Option<String>,
    pub lead_phone: Option<String>,
    pub carrier_kind: CarrierKind,
    pub started_at: DateTime<Utc>,
    pub owner_user_id: Option<String>,
}

impl CallContext {
    pub fn new(agent_id: impl Into<String>, carrier_kind: CarrierKind) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            lead_name: None,
            lead_phone: None,
            carrier_kind,
            started_at: Utc::now(),
            owner_user_id: None,
        }
    }
}

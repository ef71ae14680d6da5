//! Upstream generative-model wire protocol (spec §4.3, §6.3).
//!
//! The model speaks a bidirectional WebSocket protocol where each frame is a
//! JSON object carrying exactly one of a handful of top-level keys — there is
//! no `type`/`event` discriminant, so these are plain structs with optional
//! fields rather than tagged enums, mirroring how the server's own framing
//! actually looks on the wire.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

/// The one-time handshake frame. Exactly one of `cached_content` or
/// `system_instruction` must be set — never both, never neither
/// (spec §4.3 invariant; enforced by [`SetupMessage::new`]).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: SetupBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupBody {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl SetupMessage {
    /// Builds the handshake body, inlining the persona prompt when no cache
    /// handle is available and preferring the cache handle when one is
    /// (spec §4.3: exactly one of the two is ever sent).
    pub fn new(model: String, voice_name: String, cached_content: Option<String>, persona_prompt: &str) -> Self {
        let system_instruction = if cached_content.is_none() {
            Some(SystemInstruction {
                parts: vec![TextPart { text: persona_prompt.to_string() }],
            })
        } else {
            None
        };
        SetupMessage {
            setup: SetupBody {
                model,
                cached_content,
                system_instruction,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig { voice_name },
                        },
                    },
                },
            },
        }
    }
}

/// Outbound audio chunk frame: `realtimeInput.mediaChunks`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInputBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputBody {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    /// PCM16 mono 16kHz samples, base64-encoded as `audio/pcm;rate=16000`.
    pub fn audio_16k(pcm16_16k: &[i16]) -> Self {
        let bytes = crate::codec::pcm16_to_bytes(pcm16_16k);
        let data = BASE64.encode(bytes);
        RealtimeInputMessage {
            realtime_input: RealtimeInputBody {
                media_chunks: vec![MediaChunk { mime_type: "audio/pcm;rate=16000".to_string(), data }],
            },
        }
    }
}

/// Outbound text turn frame: `clientContent.turns`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContentMessage {
    pub client_content: ClientContentBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContentBody {
    pub turns: Vec<Turn>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: String,
    pub parts: Vec<TextPart>,
}

impl ClientContentMessage {
    pub fn text(text: impl Into<String>) -> Self {
        ClientContentMessage {
            client_content: ClientContentBody {
                turns: vec![Turn { role: "user".to_string(), parts: vec![TextPart { text: text.into() }] }],
                turn_complete: true,
            },
        }
    }

    /// Empty, `turnComplete` client-content frame telling the model to stop
    /// generating the current turn (spec §9: treat explicit stop as
    /// idempotent, fired only on barge-in).
    pub fn cancel() -> Self {
        ClientContentMessage { client_content: ClientContentBody { turns: vec![], turn_complete: true } }
    }
}

/// Inbound server frame. Every field is optional because the server sends
/// one key per message; `parse` below turns whichever key is present into a
/// single [`crate::types::ModelFrame`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<SetupComplete>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallBody>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupComplete {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ModelPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPart {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Decode one server frame's bytes into zero or more `ModelFrame`s — a frame
/// can carry several `parts` (e.g. audio + a trailing text caption).
pub fn parse_server_frame(session_id: &str, text: &str) -> crate::error::Result<Vec<crate::types::ModelFrame>> {
    use crate::types::ModelFrame;

    let msg: ServerMessage = serde_json::from_str(text)
        .map_err(|e| crate::error::BridgeError::ProtocolError(format!("bad model JSON: {e}")))?;

    let mut out = Vec::new();

    if msg.setup_complete.is_some() {
        out.push(ModelFrame::Ready { session_id: session_id.to_string() });
    }

    if let Some(err) = msg.error {
        out.push(ModelFrame::Error(err.to_string()));
    }

    if let Some(tool_call) = msg.tool_call {
        out.push(ModelFrame::ToolCall { id: tool_call.id, payload: tool_call.args });
    }

    if let Some(content) = msg.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    if inline.mime_type.starts_with("audio/") {
                        let pcm24k = crate::codec::pcm16_from_bytes(&BASE64.decode(inline.data.as_bytes())
                            .map_err(|e| crate::error::BridgeError::AudioDecodeError(format!("bad base64: {e}")))?)?;
                        out.push(ModelFrame::Audio(pcm24k));
                    }
                }
                if let Some(text) = part.text {
                    out.push(ModelFrame::Text(text));
                }
            }
        }
        if content.interrupted {
            out.push(ModelFrame::Interrupted);
        }
        if content.turn_complete {
            out.push(ModelFrame::TurnComplete);
        }
    }

    Ok(out)
}

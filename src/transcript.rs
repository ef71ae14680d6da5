//! Call transcript persistence (spec §6.6).
//!
//! A transcript is the durable record of one call: its turns, timing, and a
//! flattened human-readable form. Storage is out of scope — [`ExternalStore`]
//! is the seam a real backend plugs into; this module only builds the record
//! and defines how it's written out.

use crate::error::Result;
use crate::types::{ConversationTurn, TurnRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub call_id: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_sec: i64,
    pub turns: Vec<ConversationTurn>,
}

impl Transcript {
    pub fn new(call_id: String, agent_id: String, user_id: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self { call_id, agent_id, user_id, started_at, ended_at: started_at, duration_sec: 0, turns: Vec::new() }
    }

    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Marks the most recent agent turn `truncated` on barge-in (spec §4.4,
    /// §8 scenario 2). No-op if there's no agent turn yet to truncate.
    pub fn mark_last_agent_turn_truncated(&mut self) {
        if let Some(turn) = self.turns.iter_mut().rev().find(|t| t.role == TurnRole::Agent) {
            turn.truncated = true;
        }
    }

    /// Closes out the record at `ended_at`, fixing `duration_sec`.
    pub fn finish(&mut self, ended_at: DateTime<Utc>) {
        self.ended_at = ended_at;
        self.duration_sec = (ended_at - self.started_at).num_seconds().max(0);
    }

    /// Renders the turns as `role: text` lines, one per turn, in order —
    /// the flat, storage- and log-friendly view of the call (spec §6.6).
    pub fn flat_transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", role_label(t.role), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn role_label(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Agent => "agent",
    }
}

/// Storage backend seam. The transcript record is fully formed before it
/// reaches here; implementations only need to persist and retrieve it.
#[async_trait::async_trait]
pub trait ExternalStore: Send + Sync {
    async fn save(&self, transcript: &Transcript) -> Result<()>;
    async fn load(&self, call_id: &str) -> Result<Option<Transcript>>;
}

/// Logs the transcript instead of persisting it. The real store (a
/// persistent call-history backend) is out of scope (spec §1); this is
/// what `serve` runs with until one is plugged in.
pub struct LoggingStore;

#[async_trait::async_trait]
impl ExternalStore for LoggingStore {
    async fn save(&self, transcript: &Transcript) -> Result<()> {
        tracing::info!(call_id = %transcript.call_id, turns = transcript.turns.len(), duration_sec = transcript.duration_sec, "transcript ready (no external store configured)");
        Ok(())
    }

    async fn load(&self, _call_id: &str) -> Result<Option<Transcript>> {
        Ok(None)
    }
}

//! Session Orchestrator (spec §4.6).
//!
//! Owns one call end to end: resolves a context-cache handle, opens the
//! Model Session Client with its own connect retry, then runs a single
//! event loop wiring the Carrier Adapter, the Conversation State Machine,
//! the Model Session Client, and the Filler Engine together. The mixer
//! rule falls straight out of the loop's structure — only one branch ever
//! calls `carrier.send()` per iteration, so model audio and filler audio
//! can never overlap.

use crate::cache::CacheBackend;
use crate::cache::CacheManager;
use crate::carrier::CarrierTransport;
use crate::codec;
use crate::config::AgentConfig;
use crate::conversation::{Action, EndReason, StateMachine};
use crate::error::{BridgeError, Result};
use crate::filler::FillerEngine;
use crate::model::ModelSession;
use crate::transcript::{ExternalStore, Transcript};
use crate::types::{CarrierEvent, ControlEvent, TurnRole};
pub use crate::types::CallContext;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// How often the state machine's wall-clock timeouts are checked.
const TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Connect-retry budget for the initial Model Session (spec §4.6): three
/// attempts, exponential backoff, matching the session's own reconnect
/// schedule (spec §4.3, §7).
const CONNECT_RETRY_BACKOFF_MS: [u64; 3] = [0, 1000, 2000];
const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Upstream model connection settings held by the orchestrator across calls.
#[derive(Debug, Clone)]
pub struct ModelEndpoint {
    pub url: String,
    pub api_key: String,
    pub model_id: String,
}

/// Per-call counters, read at call end and logged. Stands in for the
/// teacher's `metrics::execution` self-improvement telemetry: same idea
/// (record what happened, surface it as a summary) scaled down to one
/// call's lifetime rather than a persisted cross-session store.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Metrics {
    pub carrier_dropped_frames: u64,
    pub model_dropped_frames: u64,
    pub model_reconnects: u64,
    pub cache_lookup_failures: u64,
    pub transcript_save_failures: u64,
}

pub struct Orchestrator<B: CacheBackend> {
    cache: Arc<CacheManager<B>>,
    filler: Arc<Mutex<FillerEngine>>,
    model_endpoint: ModelEndpoint,
    store: Arc<dyn ExternalStore>,
}

impl<B: CacheBackend> Orchestrator<B> {
    pub fn new(cache: Arc<CacheManager<B>>, filler: Arc<Mutex<FillerEngine>>, model_endpoint: ModelEndpoint, store: Arc<dyn ExternalStore>) -> Self {
        Self { cache, filler, model_endpoint, store }
    }

    /// Runs one call to completion: cache resolution, model connect,
    /// event loop, transcript persistence. Returns the finished transcript
    /// even on a caller-initiated hangup — only unrecoverable setup
    /// failures return `Err`.
    pub async fn run_call(&self, ctx: CallContext, agent: &AgentConfig, mut carrier: Box<dyn CarrierTransport>) -> Result<Transcript> {
        let mut metrics = Metrics::default();

        let fingerprint = content_fingerprint(agent);
        let cached_content = match self.cache.get_or_create(&agent.id, &fingerprint, &agent.persona_prompt).await {
            Ok(handle) => Some(handle.id),
            Err(e) => {
                metrics.cache_lookup_failures += 1;
                warn!(call_id = %ctx.call_id, error = %e, "cache resolution failed, inlining system instruction");
                None
            }
        };

        let mut model = self.connect_with_retry(agent, cached_content.clone()).await?;

        let mut sm = StateMachine::new(
            agent.interruption_sensitivity,
            Duration::from_secs(agent.max_call_duration_secs),
            Duration::from_secs(agent.silence_timeout_secs),
        );

        let mut transcript = Transcript::new(ctx.call_id.to_string(), ctx.agent_id.clone(), ctx.lead_phone.clone(), ctx.started_at);

        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for action in sm.start() {
            self.run_action(action, &mut model, &mut carrier, &mut transcript).await?;
        }

        let end_reason = loop {
            let outcome: Result<Option<EndReason>> = tokio::select! {
                event = carrier.recv() => {
                    match event {
                        Some(CarrierEvent::Audio(frame)) => {
                            let actions = sm.on_caller_frame(&frame);
                            self.run_actions(actions, &mut model, &mut carrier, &mut transcript).await
                        }
                        Some(CarrierEvent::Control(ControlEvent::StreamStopped)) | None => {
                            sm.carrier_closed();
                            Ok(Some(EndReason::CarrierHangup))
                        }
                        Some(CarrierEvent::Control(ControlEvent::StreamStarted { .. })) => Ok(None),
                    }
                }
                frame = model.next_frame() => {
                    match frame {
                        Some(frame) => {
                            record_model_frame(&mut transcript, &frame);
                            let is_turn_complete = matches!(frame, crate::types::ModelFrame::TurnComplete);
                            let actions = sm.on_model_frame(&frame);
                            let outcome = self.run_actions(actions, &mut model, &mut carrier, &mut transcript).await;
                            if is_turn_complete {
                                sm.response_flushed();
                            }
                            outcome
                        }
                        None => Ok(Some(EndReason::FatalUpstream)),
                    }
                }
                _ = ticker.tick() => {
                    let actions = sm.on_tick();
                    self.run_actions(actions, &mut model, &mut carrier, &mut transcript).await
                }
            };

            match outcome? {
                Some(reason) => break Some(reason),
                None if sm.state() == crate::conversation::State::CallEnded => break None,
                None => {}
            }
        };

        if let Some(reason) = end_reason {
            info!(call_id = %ctx.call_id, ?reason, "call ending");
        }
        sm.stop();
        metrics.carrier_dropped_frames = carrier.dropped_frames();
        metrics.model_dropped_frames = model.dropped_frames();
        metrics.model_reconnects = model.total_reconnects();
        let _ = model.close().await;

        transcript.finish(Utc::now());
        if let Err(e) = self.store.save(&transcript).await {
            metrics.transcript_save_failures += 1;
            warn!(call_id = %ctx.call_id, error = %e, "failed to persist transcript");
        }

        if let Ok(handle) = self.cache.get_or_create(&agent.id, &fingerprint, &agent.persona_prompt).await {
            self.cache.refresh_ttl(&handle).await;
        }

        info!(call_id = %ctx.call_id, ?metrics, "call metrics");

        Ok(transcript)
    }

    async fn connect_with_retry(&self, agent: &AgentConfig, cached_content: Option<String>) -> Result<ModelSession> {
        let mut last_err = None;
        for attempt in 0..MAX_CONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(CONNECT_RETRY_BACKOFF_MS[attempt as usize])).await;
            }
            match ModelSession::connect(
                &self.model_endpoint.url,
                &self.model_endpoint.api_key,
                &self.model_endpoint.model_id,
                &agent.voice_id,
                cached_content.clone(),
                &agent.persona_prompt,
            )
            .await
            {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!(attempt, error = %e, "model connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(BridgeError::SetupTimeout("exhausted connect retries".into())))
    }

    /// Carries out a batch of actions in order, stopping early (without
    /// running the rest) once an `EndCall` action is hit.
    async fn run_actions(
        &self,
        actions: Vec<Action>,
        model: &mut ModelSession,
        carrier: &mut Box<dyn CarrierTransport>,
        transcript: &mut Transcript,
    ) -> Result<Option<EndReason>> {
        for action in actions {
            if let Some(reason) = self.run_action(action, model, carrier, transcript).await? {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    /// Carries out one [`Action`]. Returns `Some(reason)` when the action
    /// was `EndCall`, signalling the caller to stop the event loop.
    async fn run_action(
        &self,
        action: Action,
        model: &mut ModelSession,
        carrier: &mut Box<dyn CarrierTransport>,
        transcript: &mut Transcript,
    ) -> Result<Option<EndReason>> {
        match action {
            Action::PlayWelcome => {}
            Action::PlayRecoveryMessage => {}
            Action::ForwardAudioToModel(pcm16_16k) => model.send_audio_16k(&pcm16_16k),
            Action::PlayModelAudio(pcm24k) => {
                let _ = carrier.send(&pcm24k).await;
            }
            Action::SendBargeIn => {
                model.cancel_turn();
                transcript.mark_last_agent_turn_truncated();
            }
            Action::RequestFillerClip => {
                let mut filler = self.filler.lock().await;
                if let Some(selection) = filler.select(&transcript_language(transcript), &[], &[]) {
                    let pcm24k = codec::resample(&selection.clip.pcm16_16k, 16000, 24000);
                    let _ = carrier.send(&pcm24k).await;
                }
            }
            Action::EndCall(reason) => return Ok(Some(reason)),
        }
        Ok(None)
    }
}

fn transcript_language(_transcript: &Transcript) -> String {
    // Agent language isn't carried on the transcript record; the caller
    // supplies it via the selection call site once multi-agent filler
    // libraries need per-language routing beyond a single active agent.
    "en-US".to_string()
}

fn record_model_frame(transcript: &mut Transcript, frame: &crate::types::ModelFrame) {
    use crate::types::ConversationTurn;
    if let crate::types::ModelFrame::Text(text) = frame {
        let now = Utc::now();
        transcript.push_turn(ConversationTurn {
            role: TurnRole::Agent,
            text: text.clone(),
            started_at: now,
            ended_at: now,
            truncated: false,
            latency_ms: None,
        });
    }
}

fn content_fingerprint(agent: &AgentConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent.persona_prompt.as_bytes());
    for doc in &agent.knowledge_docs {
        hasher.update(doc.id.as_bytes());
        hasher.update(doc.summary.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_changes_with_persona_prompt() {
        let mut agent = sample_agent();
        let fp1 = content_fingerprint(&agent);
        agent.persona_prompt = "different prompt".to_string();
        let fp2 = content_fingerprint(&agent);
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn fingerprint_stable_for_same_inputs() {
        let agent = sample_agent();
        assert_eq!(content_fingerprint(&agent), content_fingerprint(&agent));
    }

    fn sample_agent() -> AgentConfig {
        AgentConfig {
            id: "agent-1".into(),
            display_name: "Test".into(),
            persona_prompt: "You are helpful.".into(),
            voice_id: "Aoede".into(),
            language: "en-US".into(),
            emotion_level: 0.5,
            voice_speed: 1.0,
            responsiveness: 0.5,
            interruption_sensitivity: 0.5,
            background_noise_profile: crate::config::BackgroundNoiseProfile::Quiet,
            max_call_duration_secs: 600,
            silence_timeout_secs: 30,
            welcome_message: "Hi".into(),
            characteristics: vec![],
            knowledge_docs: vec![],
        }
    }
}

//! Carrier-facing WebSocket upgrade handlers (spec §6.1/§6.2).
//!
//! Each handler resolves the calling agent, builds the matching
//! [`CarrierTransport`] adapter around the upgraded socket, and hands the
//! whole call off to the Session Orchestrator. The handler's own job ends
//! the moment the call starts — everything from here on is the
//! orchestrator's event loop.

use super::ServerState;
use crate::carrier::{BinaryPcmCarrier, CarrierTransport, MulawJsonCarrier};
use crate::orchestrator::CallContext;
use crate::types::CarrierKind;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
pub struct MulawJsonParams {
    agent_id: String,
    #[serde(default)]
    lead_phone: Option<String>,
}

pub async fn mulaw_json_handler(ws: WebSocketUpgrade, State(state): State<ServerState>, Query(params): Query<MulawJsonParams>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let Some(agent) = state.agents.get(&params.agent_id).await else {
            warn!(agent_id = %params.agent_id, "rejected call for unknown agent");
            return;
        };
        let mut ctx = CallContext::new(agent.id.clone(), CarrierKind::MulawJson);
        ctx.lead_phone = params.lead_phone;
        let carrier: Box<dyn CarrierTransport> = Box::new(MulawJsonCarrier::new(socket));
        run(&state, ctx, agent, carrier).await;
    })
}

#[derive(Debug, Deserialize)]
pub struct BinaryPcmParams {
    agent_id: String,
    stream_id: String,
    channel_id: String,
    call_id: String,
}

pub async fn binary_pcm_handler(ws: WebSocketUpgrade, State(state): State<ServerState>, Query(params): Query<BinaryPcmParams>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let Some(agent) = state.agents.get(&params.agent_id).await else {
            warn!(agent_id = %params.agent_id, "rejected call for unknown agent");
            return;
        };
        let ctx = CallContext::new(agent.id.clone(), CarrierKind::BinaryPcm);
        let carrier: Box<dyn CarrierTransport> = Box::new(BinaryPcmCarrier::new(socket, params.stream_id, params.channel_id, params.call_id));
        run(&state, ctx, agent, carrier).await;
    })
}

async fn run(state: &ServerState, ctx: CallContext, agent: crate::config::AgentConfig, carrier: Box<dyn CarrierTransport>) {
    let call_id = ctx.call_id;
    info!(%call_id, agent_id = %agent.id, "call started");
    match state.orchestrator.run_call(ctx, &agent, carrier).await {
        Ok(transcript) => info!(%call_id, duration_sec = transcript.duration_sec, turns = transcript.turns.len(), "call ended"),
        Err(e) => error!(%call_id, error = %e, "call ended with error"),
    }
}

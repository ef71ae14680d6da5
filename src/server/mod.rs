//! Carrier-facing Axum server — the Session Orchestrator's host process
//! (spec §6.1/§6.2, SPEC_FULL.md §A.5).

pub mod ws;

use crate::cache::{CacheManager, HttpCacheBackend};
use crate::config::{AgentDirectory, Config};
use crate::filler::FillerEngine;
use crate::orchestrator::{ModelEndpoint, Orchestrator};
use crate::transcript::ExternalStore;
use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared, cloneable server state handed to every Axum handler.
#[derive(Clone)]
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator<HttpCacheBackend>>,
    pub agents: Arc<dyn AgentDirectory>,
}

/// Start the carrier-facing server: binds `host:port`, wires both carrier
/// variants' WebSocket upgrades to the Session Orchestrator, and serves
/// plain HTTP or TLS depending on `config.carrier`.
pub async fn start(config: Config, agents: Arc<dyn AgentDirectory>, filler_clips: Vec<crate::types::FillerClip>, transcript_store: Arc<dyn ExternalStore>) -> Result<()> {
    let api_key = config.model.api_key.clone().context("model API key not configured (set VOXBRIDGE_MODEL_API_KEY or store it in the keyring)")?;

    const MODEL_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
    const MODEL_WS_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

    let cache = Arc::new(CacheManager::new(HttpCacheBackend::new(MODEL_BASE_URL.to_string(), api_key.clone(), config.model.model_id.clone())));
    let filler = Arc::new(tokio::sync::Mutex::new(FillerEngine::new(filler_clips)));
    let model_endpoint = ModelEndpoint { url: MODEL_WS_ENDPOINT.to_string(), api_key, model_id: config.model.model_id.clone() };
    let orchestrator = Arc::new(Orchestrator::new(cache, filler, model_endpoint, transcript_store));

    let state = ServerState { orchestrator, agents };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/media/mulaw-json", get(ws::mulaw_json_handler))
        .route("/media/binary-pcm", get(ws::binary_pcm_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.carrier.host, config.carrier.port).parse().context("invalid bind address")?;

    if let (Some(cert_path), Some(key_path)) = (&config.carrier.tls_cert, &config.carrier.tls_key) {
        let cert_data = tokio::fs::read(cert_path).await.context("failed to read TLS certificate")?;
        let key_data = tokio::fs::read(key_path).await.context("failed to read TLS key")?;
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem(cert_data, key_data).await?;
        info!(%addr, "voxbridge listening (TLS)");
        axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
        return Ok(());
    }

    info!(%addr, "voxbridge listening");
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind carrier address")?;
    axum::serve(listener, app).await?;
    Ok(())
}

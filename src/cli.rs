//! Command-line dispatch (SPEC_FULL.md §A.5).
//!
//! Two subcommands: `serve` starts the carrier-facing Axum server that
//! hosts the Session Orchestrator, `dial` exercises the Telephony
//! Dispatcher's outbound-call RPC directly for operational smoke-testing.

use crate::config::{AgentConfig, BackgroundNoiseProfile, Config, InMemoryAgentDirectory};
use crate::telephony::{self, HttpCarrierDialer, WebhookUrls};
use crate::transcript::LoggingStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bridge-server", about = "Real-time telephony-to-generative-model voice bridge")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the carrier-facing WebSocket server.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Place an outbound call through the configured carrier.
    Dial {
        /// Destination phone number.
        to: String,
        /// Webhook URL the carrier should hit once the call connects.
        #[arg(long)]
        answer_url: String,
        #[arg(long)]
        status_callback_url: Option<String>,
        #[arg(long)]
        carrier_base_url: String,
        #[arg(long)]
        carrier_account_sid: String,
        #[arg(long)]
        carrier_auth_token: String,
        #[arg(long)]
        carrier_from_number: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { host, port } => run_serve(host, port).await,
        Command::Dial { to, answer_url, status_callback_url, carrier_base_url, carrier_account_sid, carrier_auth_token, carrier_from_number } => {
            run_dial(to, answer_url, status_callback_url, carrier_base_url, carrier_account_sid, carrier_auth_token, carrier_from_number).await
        }
    }
}

async fn run_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(host) = host {
        config.carrier.host = host;
    }
    if let Some(port) = port {
        config.carrier.port = port;
    }

    let agents = Arc::new(InMemoryAgentDirectory::new(vec![demo_agent()]));
    let store = Arc::new(LoggingStore);

    crate::server::start(config, agents, Vec::new(), store).await
}

async fn run_dial(
    to: String,
    answer_url: String,
    status_callback_url: Option<String>,
    carrier_base_url: String,
    carrier_account_sid: String,
    carrier_auth_token: String,
    carrier_from_number: String,
) -> Result<()> {
    let dialer = HttpCarrierDialer::new(carrier_base_url, carrier_account_sid, carrier_auth_token, carrier_from_number);
    let webhooks = WebhookUrls { answer_url, status_callback_url };
    let sid = telephony::place_call(&dialer, &to, webhooks).await?;
    println!("call placed: {sid}");
    Ok(())
}

/// Placeholder agent used by `serve` until a real agent directory is wired
/// in — the persistent agent store is out of scope (spec §1).
fn demo_agent() -> AgentConfig {
    AgentConfig {
        id: "demo".to_string(),
        display_name: "Demo Agent".to_string(),
        persona_prompt: "You are a friendly, concise voice assistant.".to_string(),
        voice_id: "Aoede".to_string(),
        language: "en-US".to_string(),
        emotion_level: 0.5,
        voice_speed: 1.0,
        responsiveness: 0.7,
        interruption_sensitivity: 0.5,
        background_noise_profile: BackgroundNoiseProfile::Quiet,
        max_call_duration_secs: 600,
        silence_timeout_secs: 30,
        welcome_message: "Hi, thanks for calling. How can I help?".to_string(),
        characteristics: Vec::new(),
        knowledge_docs: Vec::new(),
    }
}

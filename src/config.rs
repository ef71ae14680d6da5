//! Configuration management
//!
//! Loads the process-wide [`Config`] (model/carrier/server settings) from a
//! TOML file with environment-variable overrides for secrets, and loads
//! per-call [`AgentConfig`] with every numeric/enum field clamped or
//! validated at load time (spec §3 invariant).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main process configuration: model connection, carrier bind address,
/// webhook URLs. Loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub carrier: CarrierConfig,
}

/// Upstream generative-model connection settings (spec §6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Read from the OS keyring first, then `VOXBRIDGE_MODEL_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_voice_id")]
    pub default_voice_id: String,
    #[serde(default)]
    pub webhook_base_url: Option<String>,
    #[serde(default)]
    pub quality_alert_webhook: Option<String>,
}

fn default_model_id() -> String {
    "models/gemini-2.0-flash-audio-dialog".to_string()
}

fn default_voice_id() -> String {
    "Aoede".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model_id: default_model_id(),
            default_voice_id: default_voice_id(),
            webhook_base_url: None,
            quality_alert_webhook: None,
        }
    }
}

/// Carrier-facing server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    /// Load from `config_path()`, falling back to defaults and persisting
    /// them on first run, then overlay secrets from the keyring/environment.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path).context("Failed to read config file")?;
            toml::from_str(&contents).context("Failed to parse config file")?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };
        config.model.api_key = resolve_api_key();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, contents).context("Failed to write config file")?;
        Ok(())
    }
}

fn resolve_api_key() -> Option<String> {
    if let Ok(key) = std::env::var("VOXBRIDGE_MODEL_API_KEY") {
        if !key.is_empty() {
            return Some(key);
        }
    }
    keyring::Entry::new("voxbridge", "model_api_key")
        .ok()
        .and_then(|entry| entry.get_password().ok())
}

pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "voxbridge", "voxbridge")
        .context("Failed to resolve project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

// ─── Per-call agent configuration (spec §3) ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundNoiseProfile {
    #[default]
    Quiet,
    Office,
    Cafe,
    Street,
    CallCenter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDoc {
    pub id: String,
    pub title: String,
    pub summary: String,
}

/// Read-only per-call agent configuration. Immutable once a call starts;
/// edits to the underlying agent record affect only new calls (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub display_name: String,
    pub persona_prompt: String,
    pub voice_id: String,
    pub language: String,
    pub emotion_level: f32,
    pub voice_speed: f32,
    pub responsiveness: f32,
    pub interruption_sensitivity: f32,
    pub background_noise_profile: BackgroundNoiseProfile,
    pub max_call_duration_secs: u64,
    pub silence_timeout_secs: u64,
    pub welcome_message: String,
    #[serde(default)]
    pub characteristics: Vec<String>,
    #[serde(default)]
    pub knowledge_docs: Vec<KnowledgeDoc>,
}

impl AgentConfig {
    /// Clamp every numeric field into its documented range and validate
    /// enums, the way [`Config::load`] validates process settings. This is
    /// the single place field ranges are enforced — call sites never clamp
    /// again at use.
    pub fn load(raw: AgentConfig) -> Self {
        let mut cfg = raw;
        cfg.emotion_level = cfg.emotion_level.clamp(0.0, 1.0);
        cfg.voice_speed = cfg.voice_speed.clamp(0.5, 2.0);
        cfg.responsiveness = cfg.responsiveness.clamp(0.0, 1.0);
        cfg.interruption_sensitivity = cfg.interruption_sensitivity.clamp(0.0, 1.0);
        if cfg.max_call_duration_secs == 0 {
            cfg.max_call_duration_secs = 600;
        }
        if cfg.silence_timeout_secs == 0 {
            cfg.silence_timeout_secs = 30;
        }
        cfg
    }
}

/// Per-call agent lookup seam. The real directory (a persistent
/// users/agents store) is out of scope (spec §1); this trait is what the
/// server depends on so a real backend can be dropped in without touching
/// call-handling code.
#[async_trait::async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn get(&self, agent_id: &str) -> Option<AgentConfig>;
}

/// Fixed in-process directory, seeded once at startup from the process
/// config file. Stands in for the real agent store.
pub struct InMemoryAgentDirectory {
    agents: std::collections::HashMap<String, AgentConfig>,
}

impl InMemoryAgentDirectory {
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self {
            agents: agents.into_iter().map(|a| (a.id.clone(), AgentConfig::load(a))).collect(),
        }
    }
}

#[async_trait::async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn get(&self, agent_id: &str) -> Option<AgentConfig> {
        self.agents.get(agent_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgentConfig {
        AgentConfig {
            id: "agent-1".into(),
            display_name: "Test Agent".into(),
            persona_prompt: "You are helpful.".into(),
            voice_id: "Aoede".into(),
            language: "en-US".into(),
            emotion_level: 5.0,
            voice_speed: 10.0,
            responsiveness: -1.0,
            interruption_sensitivity: 2.0,
            background_noise_profile: BackgroundNoiseProfile::Office,
            max_call_duration_secs: 0,
            silence_timeout_secs: 0,
            welcome_message: "Hi there".into(),
            characteristics: vec![],
            knowledge_docs: vec![],
        }
    }

    #[test]
    fn out_of_range_fields_are_clamped_at_load() {
        let cfg = AgentConfig::load(sample());
        assert_eq!(cfg.emotion_level, 1.0);
        assert_eq!(cfg.voice_speed, 2.0);
        assert_eq!(cfg.responsiveness, 0.0);
        assert_eq!(cfg.interruption_sensitivity, 1.0);
        assert_eq!(cfg.max_call_duration_secs, 600);
        assert_eq!(cfg.silence_timeout_secs, 30);
    }

    #[tokio::test]
    async fn directory_clamps_on_insert_and_looks_up_by_id() {
        let directory = InMemoryAgentDirectory::new(vec![sample()]);
        let found = directory.get("agent-1").await.unwrap();
        assert_eq!(found.voice_speed, 2.0);
        assert!(directory.get("missing").await.is_none());
    }
}

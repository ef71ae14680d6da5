//! REST-backed [`CacheBackend`] for the upstream model's cached-content API
//! (spec §4.7). Mints a `cachedContents/<id>` handle from an agent's persona
//! prompt; the TTL and handle id come straight back from the provider.

use super::CacheBackend;
use crate::error::{BridgeError, Result};
use crate::types::CacheHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct CreateCachedContentRequest {
    model: String,
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstructionBody,
    ttl: String,
}

#[derive(Debug, Serialize)]
struct SystemInstructionBody {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CreateCachedContentResponse {
    name: String,
    #[serde(rename = "expireTime")]
    expire_time: DateTime<Utc>,
}

pub struct HttpCacheBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    ttl: String,
}

impl HttpCacheBackend {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self { client: reqwest::Client::new(), base_url, api_key, model, ttl: "3600s".to_string() }
    }
}

#[async_trait::async_trait]
impl CacheBackend for HttpCacheBackend {
    async fn create(&self, agent_id: &str, content_fingerprint: &str, persona_prompt: &str) -> Result<CacheHandle> {
        let url = format!("{}/cachedContents?key={}", self.base_url, self.api_key);
        let body = CreateCachedContentRequest {
            model: self.model.clone(),
            system_instruction: SystemInstructionBody { parts: vec![TextPart { text: persona_prompt.to_string() }] },
            ttl: self.ttl.clone(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::QuotaOrAuth(format!("cache creation rejected: {text}")));
        }

        let parsed: CreateCachedContentResponse = response.json().await?;
        Ok(CacheHandle {
            id: parsed.name,
            expires_at: parsed.expire_time,
            owning_agent_id: agent_id.to_string(),
            content_fingerprint: content_fingerprint.to_string(),
        })
    }
}

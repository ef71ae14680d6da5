//! Context-Cache Manager (spec §4.7).
//!
//! A process-wide table of [`CacheHandle`]s keyed by `(agent_id,
//! content_fingerprint)`. Concurrent calls for the same agent starting at
//! the same instant must not each mint their own upstream cache — the
//! first caller creates it, everyone else waits on that same in-flight
//! creation and gets the result (single-flight, the same shape as the
//! teacher's registry tables in [`crate` skills/orchestrator modules],
//! generalized from a plain `Mutex<HashMap>` to `tokio::sync::OnceCell`
//! per key so concurrent callers await the same future instead of racing).

mod backend;

pub use backend::HttpCacheBackend;

use crate::error::{BridgeError, Result};
use crate::types::CacheHandle;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

static HANDLE_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^cachedContents/[A-Za-z0-9_-]+$").unwrap());

/// Validates a cache handle id against the upstream's documented format
/// (spec §3 invariant). Malformed ids are never trusted — callers fall
/// back to inlining the system instruction instead.
pub fn is_valid_handle_id(id: &str) -> bool {
    HANDLE_ID_PATTERN.is_match(id)
}

type CreateFuture = OnceCell<Result<CacheHandle>>;

/// Something that knows how to mint a new upstream cache handle. The real
/// implementation calls the model provider's cache-creation RPC; tests
/// supply a stub.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn create(&self, agent_id: &str, content_fingerprint: &str, persona_prompt: &str) -> Result<CacheHandle>;
}

pub struct CacheManager<B: CacheBackend> {
    backend: B,
    inflight: Mutex<HashMap<(String, String), Arc<CreateFuture>>>,
}

impl<B: CacheBackend> CacheManager<B> {
    pub fn new(backend: B) -> Self {
        Self { backend, inflight: Mutex::new(HashMap::new()) }
    }

    /// Returns a live handle for `(agent_id, content_fingerprint)`,
    /// creating it at most once across concurrent callers. A previously
    /// created handle that's expired or fails validation is discarded and
    /// recreated rather than returned stale.
    pub async fn get_or_create(&self, agent_id: &str, content_fingerprint: &str, persona_prompt: &str) -> Result<CacheHandle> {
        let key = (agent_id.to_string(), content_fingerprint.to_string());

        loop {
            let cell = {
                let mut table = self.inflight.lock().await;
                table.entry(key.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
            };

            let result = cell
                .get_or_init(|| async { self.backend.create(agent_id, content_fingerprint, persona_prompt).await })
                .await;

            match result {
                Ok(handle) if !handle.is_expired() && is_valid_handle_id(&handle.id) => return Ok(handle.clone()),
                Ok(_) => {
                    // Stale or invalid: evict and let the next iteration recreate it.
                    self.inflight.lock().await.remove(&key);
                    continue;
                }
                Err(e) => {
                    self.inflight.lock().await.remove(&key);
                    return Err(BridgeError::CacheInvalid(e.to_string()));
                }
            }
        }
    }

    /// Best-effort TTL refresh — failure here never fails the call, since a
    /// cache handle that can't be refreshed simply expires and gets
    /// recreated on the next [`Self::get_or_create`] (spec §4.7).
    pub async fn refresh_ttl(&self, handle: &CacheHandle) -> Option<CacheHandle> {
        match self.backend.create(&handle.owning_agent_id, &handle.content_fingerprint, "").await {
            Ok(fresh) => Some(fresh),
            Err(e) => {
                warn!(handle_id = %handle.id, error = %e, "cache TTL refresh failed, letting it expire");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingBackend {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl CacheBackend for CountingBackend {
        async fn create(&self, agent_id: &str, fingerprint: &str, _persona_prompt: &str) -> Result<CacheHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(CacheHandle {
                id: "cachedContents/abc123".to_string(),
                expires_at: Utc::now() + chrono::Duration::minutes(10),
                owning_agent_id: agent_id.to_string(),
                content_fingerprint: fingerprint.to_string(),
            })
        }
    }

    #[test]
    fn validates_handle_id_format() {
        assert!(is_valid_handle_id("cachedContents/abc-123_DEF"));
        assert!(!is_valid_handle_id("cachedContents/"));
        assert!(!is_valid_handle_id("abc123"));
        assert!(!is_valid_handle_id("cachedContents/has space"));
    }

    #[tokio::test]
    async fn concurrent_requests_for_same_key_create_once() {
        let manager = Arc::new(CacheManager::new(CountingBackend { calls: AtomicU32::new(0) }));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move { m.get_or_create("agent-1", "fp-1", "persona").await }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(manager.backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_create_independently() {
        let manager = CacheManager::new(CountingBackend { calls: AtomicU32::new(0) });
        manager.get_or_create("agent-1", "fp-1", "persona").await.unwrap();
        manager.get_or_create("agent-2", "fp-1", "persona").await.unwrap();
        assert_eq!(manager.backend.calls.load(Ordering::SeqCst), 2);
    }
}

//! Best-effort persistence of the enclave session.
//!
//! The config and token are kept in session-scoped storage so a restarted
//! context (page reload, worker wake-up) can reconnect without a new login.
//! Persistence is an optimization: every backend failure is logged and
//! swallowed, and a failed read is reported as "no session".

use crate::config::EnclaveConfig;
use crate::error::{EnclaveError, EnclaveResult};
use crate::token::SessionToken;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Storage key for the serialized [`EnclaveConfig`].
pub const CONFIG_KEY: &str = "ork_enclave_config";

/// Storage key for the raw session token.
pub const TOKEN_KEY: &str = "ork_session_token";

/// Session-scoped key/value storage.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn get(&self, key: &str) -> EnclaveResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> EnclaveResult<()>;
    async fn remove(&self, keys: &[&str]) -> EnclaveResult<()>;
}

/// Volatile backend that lives as long as the process.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn get(&self, key: &str) -> EnclaveResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| EnclaveError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> EnclaveResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| EnclaveError::Storage(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> EnclaveResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| EnclaveError::Storage(e.to_string()))?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// Persists the enclave config and session token. Never fails.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub async fn save(&self, config: &EnclaveConfig, token: &SessionToken) {
        match serde_json::to_string(config) {
            Ok(json) => {
                if let Err(e) = self.backend.set(CONFIG_KEY, json).await {
                    warn!("failed to persist enclave config: {e}");
                }
            }
            Err(e) => warn!("failed to serialize enclave config: {e}"),
        }
        self.update_token(token).await;
    }

    pub async fn update_token(&self, token: &SessionToken) {
        if let Err(e) = self.backend.set(TOKEN_KEY, token.as_str().to_string()).await {
            warn!("failed to persist session token: {e}");
        }
    }

    /// Loads the persisted session; `None` if either record is missing or unreadable.
    pub async fn load(&self) -> Option<(EnclaveConfig, SessionToken)> {
        let config = self.load_config().await?;

        let token = match self.backend.get(TOKEN_KEY).await {
            Ok(Some(raw)) if !raw.is_empty() => SessionToken::new(raw),
            Ok(_) => return None,
            Err(e) => {
                warn!("failed to read session token: {e}");
                return None;
            }
        };

        Some((config, token))
    }

    /// Whether a session config is persisted, i.e. the user signed in with ORK.
    pub async fn has_persisted_session(&self) -> bool {
        self.load_config().await.is_some()
    }

    pub async fn clear(&self) {
        if let Err(e) = self.backend.remove(&[CONFIG_KEY, TOKEN_KEY]).await {
            warn!("failed to clear persisted enclave session: {e}");
        }
    }

    async fn load_config(&self) -> Option<EnclaveConfig> {
        let json = match self.backend.get(CONFIG_KEY).await {
            Ok(Some(json)) if !json.is_empty() => json,
            Ok(_) => return None,
            Err(e) => {
                warn!("failed to read enclave config: {e}");
                return None;
            }
        };

        match serde_json::from_str(&json) {
            Ok(config) => Some(config),
            Err(e) => {
                debug!("discarding unreadable enclave config: {e}");
                None
            }
        }
    }
}

//! Enclave hosted in the current context.

use super::{EnclaveConnector, EnclaveHandle};
use crate::config::{EnclaveConfig, EnclavePolicy};
use crate::error::{EnclaveError, EnclaveResult};
use crate::token::SessionToken;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub struct DirectTransport {
    connector: Arc<dyn EnclaveConnector>,
    client_id: String,
    handle: Mutex<Option<Arc<dyn EnclaveHandle>>>,
}

impl DirectTransport {
    pub fn new(connector: Arc<dyn EnclaveConnector>, policy: &EnclavePolicy) -> Self {
        Self {
            connector,
            client_id: policy.client_id.clone(),
            handle: Mutex::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        self.connector.is_available()
    }

    pub fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    pub async fn open(&self, config: &EnclaveConfig, token: &SessionToken) -> EnclaveResult<()> {
        let target = config.target(&self.client_id)?;
        let handle = self
            .connector
            .connect(&target, token)
            .await
            .map_err(EnclaveError::into_init_failed)?;

        let previous = self.slot().replace(handle);
        if let Some(old) = previous {
            debug!("replacing existing enclave connection");
            old.close().await;
        }
        Ok(())
    }

    pub async fn encrypt(&self, data: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.current()?.encrypt(data, tags).await
    }

    pub async fn decrypt(&self, ciphertext: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.current()?.decrypt(ciphertext, tags).await
    }

    pub async fn update_token(&self, token: &SessionToken) -> EnclaveResult<()> {
        self.current()?.update_token(token).await
    }

    pub async fn close(&self) {
        let handle = self.slot().take();
        if let Some(handle) = handle {
            handle.close().await;
        }
    }

    fn current(&self) -> EnclaveResult<Arc<dyn EnclaveHandle>> {
        self.slot().clone().ok_or(EnclaveError::NotReady)
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<dyn EnclaveHandle>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Enclave hosted in a separate context, reached by message passing.
//!
//! Delivery across the boundary is not guaranteed: the hosting context can be
//! torn down and recreated between two messages, silently dropping a
//! request. Every operation is sent once and, if nothing answers, retried
//! exactly once after a short backoff.

use super::keepalive::{HostContext, KeepAlive};
use super::protocol::{ProxyReply, ProxyRequest, ProxyStatus};
use crate::config::{EnclaveConfig, EnclavePolicy};
use crate::error::{EnclaveError, EnclaveResult};
use crate::token::SessionToken;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on the best-effort `destroy` notification at teardown.
const RELEASE_GRACE: Duration = Duration::from_secs(2);

const HOLD_REASON: &str = "ORK enclave (persistent)";

/// Asynchronous request/response boundary to the hosting context.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Sends one request. `None` means nothing answered.
    async fn send(&self, request: Value) -> Option<Value>;
}

pub struct ProxiedTransport {
    channel: Arc<dyn MessageChannel>,
    host: Arc<dyn HostContext>,
    keep_alive: Mutex<Option<KeepAlive>>,
    connected: AtomicBool,
    readiness_attempts: u32,
    readiness_interval: Duration,
    retry_backoff: Duration,
}

impl ProxiedTransport {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        host: Arc<dyn HostContext>,
        policy: &EnclavePolicy,
    ) -> Self {
        Self {
            channel,
            host,
            keep_alive: Mutex::new(None),
            connected: AtomicBool::new(false),
            readiness_attempts: policy.readiness_attempts,
            readiness_interval: policy.readiness_interval(),
            retry_backoff: policy.retry_backoff(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.host.is_available()
    }

    /// Whether a keep-alive hold is currently held.
    pub fn is_holding(&self) -> bool {
        self.hold_slot().is_some()
    }

    pub async fn open(&self, config: &EnclaveConfig, token: &SessionToken) -> EnclaveResult<()> {
        self.acquire_hold().map_err(EnclaveError::into_init_failed)?;

        match self.connect(config, token).await {
            Ok(status) => {
                self.connected.store(true, Ordering::SeqCst);
                info!("enclave connected through host context ({status:?})");
                Ok(())
            }
            Err(e) => {
                self.release_hold();
                Err(e.into_init_failed())
            }
        }
    }

    async fn connect(
        &self,
        config: &EnclaveConfig,
        token: &SessionToken,
    ) -> EnclaveResult<ProxyStatus> {
        self.wait_for_listener().await?;

        let request = ProxyRequest::Init {
            config: config.clone(),
            token: token.as_str().to_string(),
        };
        let reply = self
            .channel
            .send(request.to_value()?)
            .await
            .ok_or_else(|| {
                EnclaveError::InitFailed("no response from host context".to_string())
            })?;

        let reply = ProxyReply::from_value(reply)?.check()?;
        match reply.status {
            ProxyStatus::Initialized | ProxyStatus::AlreadyInitialized => Ok(reply.status),
            other => Err(EnclaveError::Protocol(format!(
                "unexpected init status {other:?}"
            ))),
        }
    }

    pub async fn encrypt(&self, data: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.require_connected()?;
        let reply = self.send_with_retry(&ProxyRequest::encrypt(data, tags)).await?;
        ProxyReply::from_value(reply)?.into_bytes()
    }

    pub async fn decrypt(&self, ciphertext: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.require_connected()?;
        let reply = self
            .send_with_retry(&ProxyRequest::decrypt(ciphertext, tags))
            .await?;
        ProxyReply::from_value(reply)?.into_bytes()
    }

    pub async fn update_token(&self, token: &SessionToken) -> EnclaveResult<()> {
        self.require_connected()?;
        let request = ProxyRequest::UpdateToken {
            token: token.as_str().to_string(),
        };
        let reply = self.send_with_retry(&request).await?;
        ProxyReply::from_value(reply)?.check()?;
        Ok(())
    }

    /// Notifies the host (best effort) and releases the keep-alive hold.
    pub async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let request = ProxyRequest::Destroy;
            match request.to_value() {
                Ok(value) => {
                    match tokio::time::timeout(RELEASE_GRACE, self.channel.send(value)).await {
                        Ok(Some(_)) => debug!("host context released enclave"),
                        Ok(None) | Err(_) => debug!("no acknowledgement for destroy"),
                    }
                }
                Err(e) => debug!("could not encode destroy request: {e}"),
            }
        }
        self.release_hold();
    }

    /// Polls `isReady` until the host answers anything at all.
    ///
    /// Opening the context and the context's script listening for messages
    /// are separate events.
    async fn wait_for_listener(&self) -> EnclaveResult<()> {
        let ready_check = ProxyRequest::IsReady.to_value()?;

        for attempt in 1..=self.readiness_attempts {
            if self.channel.send(ready_check.clone()).await.is_some() {
                debug!("host context listening after {attempt} attempt(s)");
                return Ok(());
            }
            if attempt < self.readiness_attempts {
                tokio::time::sleep(self.readiness_interval).await;
            }
        }

        Err(EnclaveError::InitFailed(format!(
            "host context did not become ready after {} attempts",
            self.readiness_attempts
        )))
    }

    async fn send_with_retry(&self, request: &ProxyRequest) -> EnclaveResult<Value> {
        let value = request.to_value()?;

        if let Some(reply) = self.channel.send(value.clone()).await {
            return Ok(reply);
        }

        warn!("no response for {}, retrying", request.command());
        tokio::time::sleep(self.retry_backoff).await;

        self.channel
            .send(value)
            .await
            .ok_or(EnclaveError::TransportNoResponse)
    }

    fn require_connected(&self) -> EnclaveResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EnclaveError::NotReady)
        }
    }

    fn acquire_hold(&self) -> EnclaveResult<()> {
        let mut slot = self.hold_slot();
        if slot.is_none() {
            *slot = Some(KeepAlive::acquire(self.host.clone(), HOLD_REASON)?);
        }
        Ok(())
    }

    fn release_hold(&self) {
        let hold = self.hold_slot().take();
        if let Some(hold) = hold {
            hold.release();
        }
    }

    fn hold_slot(&self) -> MutexGuard<'_, Option<KeepAlive>> {
        self.keep_alive.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Remote side of the proxied topology.
//!
//! A [`ProxyHost`] lives in the context that can actually host the enclave.
//! It answers the JSON protocol with a direct enclave connection of its own
//! and serializes encrypt/decrypt through its own operation queue.

use super::direct::DirectTransport;
use super::keepalive::HostContext;
use super::protocol::{ProxyReply, ProxyRequest, ProxyStatus, ReadyReply};
use super::proxied::MessageChannel;
use super::EnclaveConnector;
use crate::config::{EnclaveConfig, EnclavePolicy};
use crate::error::{EnclaveError, EnclaveResult};
use crate::queue::OperationQueue;
use crate::token::SessionToken;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const NOT_INITIALIZED: &str = "Enclave not initialized";
const DECRYPT_TIMED_OUT: &str = "ORK decrypt timed out";

/// Channel depth between the session owner and the host task.
const HOST_CHANNEL_CAPACITY: usize = 64;

pub struct ProxyHost {
    enclave: DirectTransport,
    init_lock: Mutex<()>,
    queue: OperationQueue,
    decrypt_timeout: Duration,
}

impl ProxyHost {
    pub fn new(connector: Arc<dyn EnclaveConnector>, policy: &EnclavePolicy) -> Self {
        Self {
            enclave: DirectTransport::new(connector, policy),
            init_lock: Mutex::new(()),
            queue: OperationQueue::new("proxy-host"),
            decrypt_timeout: policy.decrypt_timeout(),
        }
    }

    /// Answers one protocol message.
    ///
    /// Always produces a reply once the host is listening; `None` is left to
    /// the channel for messages that were never delivered.
    pub async fn handle(&self, message: Value) -> Option<Value> {
        let request: ProxyRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejecting malformed request: {e}");
                return Some(ProxyReply::error(format!("malformed request: {e}")).to_value());
            }
        };

        let command = request.command();
        debug!("host received {command}");

        let reply = match request {
            ProxyRequest::IsReady => {
                let ready = ReadyReply {
                    ready: self.enclave.is_open(),
                };
                return serde_json::to_value(ready).ok();
            }
            ProxyRequest::Init { config, token } => {
                self.init(&config, SessionToken::new(token)).await
            }
            ProxyRequest::Encrypt { data_b64, tags } => self.encrypt(&data_b64, &tags).await,
            ProxyRequest::Decrypt { encrypted_b64, tags } => {
                self.decrypt(&encrypted_b64, &tags).await
            }
            ProxyRequest::UpdateToken { token } => self.update_token(token).await,
            ProxyRequest::Destroy => {
                self.enclave.close().await;
                info!("host released enclave connection");
                ProxyReply::status(ProxyStatus::Destroyed)
            }
        };

        if let Some(message) = &reply.error {
            debug!("host {command} failed: {message}");
        }
        Some(reply.to_value())
    }

    async fn init(&self, config: &EnclaveConfig, token: SessionToken) -> ProxyReply {
        let _guard = self.init_lock.lock().await;
        if self.enclave.is_open() {
            return ProxyReply::status(ProxyStatus::AlreadyInitialized);
        }

        match self.enclave.open(config, &token).await {
            Ok(()) => {
                info!("host opened enclave connection");
                ProxyReply::status(ProxyStatus::Initialized)
            }
            Err(e) => {
                error!("host failed to open enclave connection: {e}");
                ProxyReply::error(e.to_string())
            }
        }
    }

    async fn encrypt(&self, data_b64: &str, tags: &[String]) -> ProxyReply {
        if !self.enclave.is_open() {
            return ProxyReply::error(NOT_INITIALIZED);
        }
        let data = match decode(data_b64) {
            Ok(data) => data,
            Err(e) => return ProxyReply::error(e.to_string()),
        };

        let result = self
            .queue
            .run("encrypt", self.enclave.encrypt(&data, tags))
            .await;
        reply_bytes(result)
    }

    async fn decrypt(&self, encrypted_b64: &str, tags: &[String]) -> ProxyReply {
        if !self.enclave.is_open() {
            return ProxyReply::error(NOT_INITIALIZED);
        }
        let ciphertext = match decode(encrypted_b64) {
            Ok(ciphertext) => ciphertext,
            Err(e) => return ProxyReply::error(e.to_string()),
        };

        let timeout = self.decrypt_timeout;
        let result = self
            .queue
            .run("decrypt", async {
                tokio::time::timeout(timeout, self.enclave.decrypt(&ciphertext, tags)).await
            })
            .await;

        match result {
            Ok(inner) => reply_bytes(inner),
            Err(_) => {
                warn!("host decrypt exceeded {timeout:?}");
                ProxyReply::error(DECRYPT_TIMED_OUT)
            }
        }
    }

    async fn update_token(&self, token: String) -> ProxyReply {
        let token = SessionToken::new(token);
        let result = self
            .queue
            .run("update-token", self.enclave.update_token(&token))
            .await;
        match result {
            Ok(()) => ProxyReply::status(ProxyStatus::Success),
            Err(EnclaveError::NotReady) => ProxyReply::error(NOT_INITIALIZED),
            Err(e) => ProxyReply::error(e.to_string()),
        }
    }
}

fn decode(b64: &str) -> EnclaveResult<Vec<u8>> {
    STANDARD
        .decode(b64)
        .map_err(|e| EnclaveError::Protocol(format!("payload is not base64: {e}")))
}

fn reply_bytes(result: EnclaveResult<Vec<u8>>) -> ProxyReply {
    match result {
        Ok(bytes) => ProxyReply::success(&bytes),
        Err(EnclaveError::NotReady) => ProxyReply::error(NOT_INITIALIZED),
        Err(EnclaveError::Remote(message)) => ProxyReply::error(message),
        Err(e) => ProxyReply::error(e.to_string()),
    }
}

type Delivery = (Value, oneshot::Sender<Option<Value>>);

/// In-process [`MessageChannel`] to a spawned [`ProxyHost`].
#[derive(Clone)]
pub struct HostChannel {
    tx: mpsc::Sender<Delivery>,
}

#[async_trait]
impl MessageChannel for HostChannel {
    async fn send(&self, request: Value) -> Option<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((request, reply_tx)).await.is_err() {
            debug!("host task has stopped");
            return None;
        }
        reply_rx.await.ok().flatten()
    }
}

/// Runs `host` on its own task and returns a channel to it.
///
/// Each message is answered on a separate task so a slow `init` does not
/// hold up `isReady`. The task ends when every [`HostChannel`] is dropped.
pub fn spawn_proxy_host(host: Arc<ProxyHost>) -> (HostChannel, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Delivery>(HOST_CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        info!("proxy host listening");
        while let Some((message, reply_tx)) = rx.recv().await {
            let host = host.clone();
            tokio::spawn(async move {
                let reply = host.handle(message).await;
                if reply_tx.send(reply).is_err() {
                    debug!("reply dropped: requester went away");
                }
            });
        }
        debug!("proxy host stopped");
    });

    (HostChannel { tx }, task)
}

/// [`HostContext`] for a host running in this process.
///
/// Counts holds so callers can verify that each acquire is matched by
/// exactly one release.
#[derive(Debug, Default)]
pub struct LocalHostContext {
    holds: AtomicUsize,
    released: AtomicUsize,
}

impl LocalHostContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_holds(&self) -> usize {
        self.holds.load(Ordering::SeqCst)
    }

    /// Total number of releases seen.
    pub fn releases(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl HostContext for LocalHostContext {
    fn is_available(&self) -> bool {
        true
    }

    fn retain(&self, reason: &str) -> EnclaveResult<()> {
        let n = self.holds.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("host context retained ({reason}), {n} hold(s)");
        Ok(())
    }

    fn release(&self, reason: &str) {
        self.released.fetch_add(1, Ordering::SeqCst);
        let previous = self
            .holds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(n) => debug!("host context released ({reason}), {} hold(s)", n - 1),
            Err(_) => warn!("host context released ({reason}) with no hold outstanding"),
        }
    }
}

//! Shared fakes for enclave integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use orkvault_enclave::{
    EnclaveConfig, EnclaveConnector, EnclaveError, EnclaveHandle, EnclavePolicy, EnclaveResult,
    EnclaveSessionManager, EnclaveTarget, EnclaveTransport, HostChannel, HostContext,
    LocalHostContext, MemoryBackend, MessageChannel, ProxyHost, SessionBackend, SessionStore,
    SessionToken, spawn_proxy_host,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Fixtures ──

pub fn sample_config() -> EnclaveConfig {
    config_for("vault-vendor")
}

pub fn config_for(vendor: &str) -> EnclaveConfig {
    EnclaveConfig::new(
        Url::parse("https://ork1.example.com").expect("valid url"),
        vendor,
        Url::parse("https://auth.example.com/realms/my%20realm/tidecloak/vouchers?sessionId=s-42")
            .expect("valid url"),
        "signed-origin",
    )
}

/// Token with a decodable claim set: `{"sub":"alice","exp":1900000000,"sid":"s-42"}`.
pub const SAMPLE_TOKEN: &str =
    "eyJhbGciOiJFZERTQSJ9.eyJzdWIiOiJhbGljZSIsImV4cCI6MTkwMDAwMDAwMCwic2lkIjoicy00MiJ9.c2ln";

pub fn sample_token() -> SessionToken {
    SessionToken::new(SAMPLE_TOKEN)
}

pub fn tags() -> Vec<String> {
    vec!["vault".to_string()]
}

pub fn fast_policy() -> EnclavePolicy {
    EnclavePolicy {
        readiness_interval_ms: 10,
        retry_backoff_ms: 20,
        ..EnclavePolicy::default()
    }
}

// ── Mock enclave ──

const MASK: u8 = 0x5a;

/// In-memory stand-in for the remote enclave.
///
/// Ciphertext is `ork:<tags>:` followed by the data XOR-masked, so decrypting
/// with different tags fails like the real enclave would.
#[derive(Default)]
pub struct MockEnclave {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub encrypt_calls: AtomicUsize,
    pub decrypt_calls: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_decrypt: AtomicBool,
    pub hang_decrypt: AtomicBool,
    pub connect_delay: Mutex<Duration>,
    pub op_delay: Mutex<Duration>,
    pub tokens: Mutex<Vec<String>>,
    pub targets: Mutex<Vec<EnclaveTarget>>,
    log: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockEnclave {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn EnclaveConnector> {
        Arc::new(MockConnector(self.clone()))
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_op_delay(&self, delay: Duration) {
        *self.op_delay.lock().unwrap() = delay;
    }

    /// Operations in the order the enclave saw them, e.g. `encrypt:a`.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn remote_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst) + self.decrypt_calls.load(Ordering::SeqCst)
    }

    pub fn seal(data: &[u8], tags: &[String]) -> Vec<u8> {
        let mut out = format!("ork:{}:", tags.join(",")).into_bytes();
        out.extend(data.iter().map(|b| b ^ MASK));
        out
    }

    pub fn open(ciphertext: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        let prefix = format!("ork:{}:", tags.join(",")).into_bytes();
        ciphertext
            .strip_prefix(prefix.as_slice())
            .map(|body| body.iter().map(|b| b ^ MASK).collect())
            .ok_or_else(|| EnclaveError::Remote("tag policy mismatch".to_string()))
    }

    async fn enter(&self, label: String) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.log.lock().unwrap().push(label);

        let delay = *self.op_delay.lock().unwrap();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockConnector(Arc<MockEnclave>);

#[async_trait]
impl EnclaveConnector for MockConnector {
    async fn connect(
        &self,
        target: &EnclaveTarget,
        token: &SessionToken,
    ) -> EnclaveResult<Arc<dyn EnclaveHandle>> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.0.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.0.fail_connect.load(Ordering::SeqCst) {
            return Err(EnclaveError::Remote("voucher rejected".to_string()));
        }
        self.0.targets.lock().unwrap().push(target.clone());
        self.0.tokens.lock().unwrap().push(token.as_str().to_string());
        Ok(Arc::new(MockHandle(self.0.clone())))
    }
}

struct MockHandle(Arc<MockEnclave>);

#[async_trait]
impl EnclaveHandle for MockHandle {
    async fn encrypt(&self, data: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.0.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.0
            .enter(format!("encrypt:{}", String::from_utf8_lossy(data)))
            .await;
        let out = MockEnclave::seal(data, tags);
        self.0.leave();
        Ok(out)
    }

    async fn decrypt(&self, ciphertext: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.0.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if self.0.hang_decrypt.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let out = MockEnclave::open(ciphertext, tags);
        let label = match &out {
            Ok(plain) => format!("decrypt:{}", String::from_utf8_lossy(plain)),
            Err(_) => "decrypt:?".to_string(),
        };
        self.0.enter(label).await;
        self.0.leave();
        if self.0.fail_decrypt.load(Ordering::SeqCst) {
            return Err(EnclaveError::Remote("decryption denied".to_string()));
        }
        out
    }

    async fn update_token(&self, token: &SessionToken) -> EnclaveResult<()> {
        self.0.enter("update-token".to_string()).await;
        self.0.tokens.lock().unwrap().push(token.as_str().to_string());
        self.0.leave();
        Ok(())
    }

    async fn close(&self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Channels and host contexts ──

/// Wraps a real host channel and drops selected messages on the floor.
pub struct LossyChannel {
    inner: HostChannel,
    /// Number of upcoming non-`isReady` messages to drop.
    pub drop_next: AtomicUsize,
    /// Number of upcoming `isReady` polls to leave unanswered.
    pub silent_polls: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl LossyChannel {
    pub fn new(inner: HostChannel) -> Arc<Self> {
        Arc::new(Self {
            inner,
            drop_next: AtomicUsize::new(0),
            silent_polls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Commands sent so far, in order, including dropped ones.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.sent().iter().filter(|c| *c == command).count()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl MessageChannel for LossyChannel {
    async fn send(&self, request: Value) -> Option<Value> {
        let command = request
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.sent.lock().unwrap().push(command.clone());

        let counter = if command == "isReady" {
            &self.silent_polls
        } else {
            &self.drop_next
        };
        if take_one(counter) {
            return None;
        }
        self.inner.send(request).await
    }
}

/// A channel where nothing ever answers.
#[derive(Default)]
pub struct SilentChannel {
    pub sends: AtomicUsize,
}

#[async_trait]
impl MessageChannel for SilentChannel {
    async fn send(&self, _request: Value) -> Option<Value> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// A channel that replies to every command with a fixed value.
pub struct ScriptedChannel {
    reply: Value,
}

impl ScriptedChannel {
    pub fn new(reply: Value) -> Arc<Self> {
        Arc::new(Self { reply })
    }
}

#[async_trait]
impl MessageChannel for ScriptedChannel {
    async fn send(&self, request: Value) -> Option<Value> {
        if request.get("command").and_then(Value::as_str) == Some("isReady") {
            return Some(serde_json::json!({ "ready": false }));
        }
        Some(self.reply.clone())
    }
}

/// Platform without a hosting context.
pub struct NoHost;

impl HostContext for NoHost {
    fn is_available(&self) -> bool {
        false
    }

    fn retain(&self, _reason: &str) -> EnclaveResult<()> {
        Err(EnclaveError::HostUnavailable("offscreen documents unsupported".to_string()))
    }

    fn release(&self, _reason: &str) {}
}

// ── Storage ──

/// Backend where every operation fails.
pub struct FailingBackend;

#[async_trait]
impl SessionBackend for FailingBackend {
    async fn get(&self, _key: &str) -> EnclaveResult<Option<String>> {
        Err(EnclaveError::Storage("quota exceeded".to_string()))
    }

    async fn set(&self, _key: &str, _value: String) -> EnclaveResult<()> {
        Err(EnclaveError::Storage("quota exceeded".to_string()))
    }

    async fn remove(&self, _keys: &[&str]) -> EnclaveResult<()> {
        Err(EnclaveError::Storage("quota exceeded".to_string()))
    }
}

/// In-memory backend whose reads take a while, like session storage behind IPC.
pub struct SlowBackend {
    inner: MemoryBackend,
    read_delay: Duration,
}

impl SlowBackend {
    pub fn store(read_delay: Duration) -> SessionStore {
        SessionStore::new(Arc::new(Self {
            inner: MemoryBackend::new(),
            read_delay,
        }))
    }
}

#[async_trait]
impl SessionBackend for SlowBackend {
    async fn get(&self, key: &str) -> EnclaveResult<Option<String>> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> EnclaveResult<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, keys: &[&str]) -> EnclaveResult<()> {
        self.inner.remove(keys).await
    }
}

// ── Managers ──

pub fn direct_manager(enclave: &Arc<MockEnclave>, store: SessionStore) -> EnclaveSessionManager {
    let policy = fast_policy();
    let transport = EnclaveTransport::direct(enclave.connector(), &policy);
    EnclaveSessionManager::new(transport, store, policy).expect("valid policy")
}

/// A manager talking to a spawned proxy host through a lossy channel.
pub struct ProxiedRig {
    pub manager: EnclaveSessionManager,
    pub enclave: Arc<MockEnclave>,
    pub channel: Arc<LossyChannel>,
    pub host: Arc<LocalHostContext>,
    pub store: SessionStore,
}

pub fn proxied_rig() -> ProxiedRig {
    let policy = fast_policy();
    let enclave = MockEnclave::new();
    let proxy = Arc::new(ProxyHost::new(enclave.connector(), &policy));
    let (host_channel, _task) = spawn_proxy_host(proxy);
    let channel = LossyChannel::new(host_channel);
    let host = Arc::new(LocalHostContext::new());
    let store = SessionStore::in_memory();

    let transport = EnclaveTransport::proxied(channel.clone(), host.clone(), &policy);
    let manager = EnclaveSessionManager::new(transport, store.clone(), policy).expect("valid policy");

    ProxiedRig {
        manager,
        enclave,
        channel,
        host,
        store,
    }
}

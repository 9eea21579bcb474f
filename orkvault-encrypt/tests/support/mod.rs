//! Shared fakes for router integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use orkvault_crypto::SymmetricKey;
use orkvault_enclave::{
    EnclaveConfig, EnclaveConnector, EnclaveError, EnclaveHandle, EnclavePolicy, EnclaveResult,
    EnclaveSessionManager, EnclaveTarget, EnclaveTransport, SessionStore, SessionToken,
};
use orkvault_encrypt::{OrkEncryptionRouter, RouterConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use url::Url;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn sample_config() -> EnclaveConfig {
    EnclaveConfig::new(
        Url::parse("https://ork1.example.com").expect("valid url"),
        "vault-vendor",
        Url::parse("https://auth.example.com/realms/acme/vouchers?sessionId=s-1").expect("valid url"),
        "signed-origin",
    )
}

pub fn sample_token() -> SessionToken {
    SessionToken::new("header.eyJzdWIiOiJib2IifQ.sig")
}

pub fn key() -> SymmetricKey {
    SymmetricKey::from_bytes([7u8; 32])
}

/// Enclave fake: reverses the bytes and prefixes the tags.
#[derive(Default)]
pub struct FakeEnclave {
    pub available: AtomicBool,
    pub connects: AtomicUsize,
    pub encrypt_calls: AtomicUsize,
    pub decrypt_calls: AtomicUsize,
    pub fail_encrypt: AtomicBool,
    pub fail_decrypt: AtomicBool,
    pub hang_decrypt: AtomicBool,
    pub seen_tags: Mutex<Vec<Vec<String>>>,
}

impl FakeEnclave {
    pub fn new() -> Arc<Self> {
        let enclave = Self::default();
        enclave.available.store(true, Ordering::SeqCst);
        Arc::new(enclave)
    }

    pub fn remote_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst) + self.decrypt_calls.load(Ordering::SeqCst)
    }
}

struct FakeConnector(Arc<FakeEnclave>);

#[async_trait]
impl EnclaveConnector for FakeConnector {
    fn is_available(&self) -> bool {
        self.0.available.load(Ordering::SeqCst)
    }

    async fn connect(
        &self,
        _target: &EnclaveTarget,
        _token: &SessionToken,
    ) -> EnclaveResult<Arc<dyn EnclaveHandle>> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeHandle(self.0.clone())))
    }
}

struct FakeHandle(Arc<FakeEnclave>);

fn prefix(tags: &[String]) -> Vec<u8> {
    format!("{}|", tags.join(",")).into_bytes()
}

#[async_trait]
impl EnclaveHandle for FakeHandle {
    async fn encrypt(&self, data: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.0.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.0.seen_tags.lock().unwrap().push(tags.to_vec());
        if self.0.fail_encrypt.load(Ordering::SeqCst) {
            return Err(EnclaveError::Remote("policy denied".to_string()));
        }
        let mut out = prefix(tags);
        out.extend(data.iter().rev());
        Ok(out)
    }

    async fn decrypt(&self, ciphertext: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.0.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.0.seen_tags.lock().unwrap().push(tags.to_vec());
        if self.0.hang_decrypt.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.0.fail_decrypt.load(Ordering::SeqCst) {
            return Err(EnclaveError::Remote("decryption denied".to_string()));
        }
        let body = ciphertext
            .strip_prefix(prefix(tags).as_slice())
            .ok_or_else(|| EnclaveError::Remote("tag policy mismatch".to_string()))?;
        Ok(body.iter().rev().copied().collect())
    }

    async fn update_token(&self, _token: &SessionToken) -> EnclaveResult<()> {
        Ok(())
    }

    async fn close(&self) {}
}

pub fn manager(enclave: &Arc<FakeEnclave>, store: SessionStore) -> EnclaveSessionManager {
    let policy = EnclavePolicy::default();
    let transport = EnclaveTransport::direct(Arc::new(FakeConnector(enclave.clone())), &policy);
    EnclaveSessionManager::new(transport, store, policy).expect("valid policy")
}

/// Router whose session has not been initialized and has nothing persisted.
pub fn cold_router(enclave: &Arc<FakeEnclave>) -> OrkEncryptionRouter {
    OrkEncryptionRouter::with_defaults(manager(enclave, SessionStore::in_memory()))
}

/// Router with a live enclave session.
pub async fn ready_router(enclave: &Arc<FakeEnclave>) -> OrkEncryptionRouter {
    ready_router_with(enclave, RouterConfig::default()).await
}

pub async fn ready_router_with(
    enclave: &Arc<FakeEnclave>,
    config: RouterConfig,
) -> OrkEncryptionRouter {
    let session = manager(enclave, SessionStore::in_memory());
    session
        .initialize(sample_config(), sample_token())
        .await
        .expect("fake enclave connects");
    OrkEncryptionRouter::new(session, Arc::new(orkvault_crypto::ChaChaEncryptor), config)
}

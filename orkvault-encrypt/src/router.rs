//! Per-field routing between the ORK enclave and local encryption.
//!
//! Encryption goes to the enclave whenever a session can be made ready and
//! falls back to local symmetric encryption otherwise. Decryption dispatches
//! on the envelope's discriminant, never on its content. A remote decrypt
//! failure starts a cooldown during which further remote decrypts fail
//! fast, so a vault with hundreds of ORK fields does not wait out hundreds of
//! timeouts.

use crate::config::RouterConfig;
use crate::error::{EncryptError, EncryptResult, RevealError};
use crate::scope::{SkipFlag, SkipGuard};
use orkvault_crypto::{ChaChaEncryptor, Envelope, EnvelopeKind, LocalEncryptor, SymmetricKey};
use orkvault_enclave::{EnclaveError, EnclaveSessionManager};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct OrkEncryptionRouter {
    session: EnclaveSessionManager,
    local: Arc<dyn LocalEncryptor>,
    config: RouterConfig,
}

impl OrkEncryptionRouter {
    pub fn new(
        session: EnclaveSessionManager,
        local: Arc<dyn LocalEncryptor>,
        config: RouterConfig,
    ) -> Self {
        Self {
            session,
            local,
            config,
        }
    }

    /// Router with ChaCha20-Poly1305 local encryption and default tags.
    pub fn with_defaults(session: EnclaveSessionManager) -> Self {
        Self::new(session, Arc::new(ChaChaEncryptor), RouterConfig::default())
    }

    pub fn session(&self) -> &EnclaveSessionManager {
        &self.session
    }

    pub fn tags(&self) -> &[String] {
        &self.config.tags
    }

    // ── Encrypt ──

    /// Encrypts a field value. `key` is only used on the local branch.
    ///
    /// Once the enclave is ready a remote failure is an error; it is never
    /// downgraded to local encryption.
    pub async fn encrypt_bytes(&self, plain: &[u8], key: &SymmetricKey) -> EncryptResult<Envelope> {
        if self.session.should_skip_ork_encrypt() {
            debug!("ORK encryption skipped, using local encryption");
            return Ok(self.local.encrypt(key, plain)?);
        }

        if !self.session.ensure_ready().await {
            debug!("enclave unavailable, using local encryption");
            return Ok(self.local.encrypt(key, plain)?);
        }

        self.encrypt_remote(plain).await
    }

    pub async fn encrypt_string(&self, plain: &str, key: &SymmetricKey) -> EncryptResult<Envelope> {
        self.encrypt_bytes(plain.as_bytes(), key).await
    }

    /// Encrypts through the enclave, which must already be ready.
    pub(crate) async fn encrypt_remote(&self, plain: &[u8]) -> EncryptResult<Envelope> {
        match self.session.encrypt(plain, &self.config.tags).await {
            Ok(ciphertext) => Ok(Envelope::from_bytes(EnvelopeKind::OrkRemote, &ciphertext)),
            Err(e) => {
                error!("ORK encryption failed: {e}");
                Err(EncryptError::OrkEncryptFailed(e))
            }
        }
    }

    // ── Decrypt ──

    /// Decrypts a field value.
    ///
    /// `Ok(None)` means an OrkRemote value was left encrypted: the skip flag
    /// is set or no enclave session can be made ready in this context.
    pub async fn decrypt_bytes(
        &self,
        envelope: &Envelope,
        key: &SymmetricKey,
    ) -> EncryptResult<Option<Vec<u8>>> {
        match envelope.kind() {
            EnvelopeKind::Plaintext => Ok(Some(envelope.payload_bytes()?)),
            EnvelopeKind::OrkRemote => self.decrypt_remote(envelope, true).await,
            _ => Ok(Some(self.local.decrypt(key, envelope)?)),
        }
    }

    pub async fn decrypt_string(
        &self,
        envelope: &Envelope,
        key: &SymmetricKey,
    ) -> EncryptResult<Option<String>> {
        let bytes = self.decrypt_bytes(envelope, key).await?;
        Ok(bytes.map(String::from_utf8).transpose()?)
    }

    pub(crate) async fn decrypt_remote(
        &self,
        envelope: &Envelope,
        honor_skip: bool,
    ) -> EncryptResult<Option<Vec<u8>>> {
        if honor_skip && self.session.should_skip_ork_decrypt() {
            return Ok(None);
        }

        if let Some(remaining) = self.session.cooldown_remaining() {
            debug!("ORK decrypt in cooldown for another {remaining:?}");
            return Err(EncryptError::OrkDecryptCooldown { remaining });
        }

        if !self.session.ensure_ready().await {
            return Ok(None);
        }

        let ciphertext = envelope.payload_bytes()?;
        match self.session.decrypt(&ciphertext, &self.config.tags).await {
            Ok(plain) => Ok(Some(plain)),
            Err(EnclaveError::CoolingDown(remaining)) => {
                debug!("ORK decrypt queued behind a failure, cooling down");
                Err(EncryptError::OrkDecryptCooldown { remaining })
            }
            Err(e) => {
                error!("ORK decryption failed: {e}");
                Err(EncryptError::OrkDecryptFailed(e))
            }
        }
    }

    // ── Reveal ──

    /// Decrypts a single field the user asked to see.
    ///
    /// Ignores the skip-decrypt flag for this call only. Every failure,
    /// including an enclave that cannot be made ready, is a [`RevealError`].
    pub async fn reveal_bytes(
        &self,
        envelope: &Envelope,
        key: &SymmetricKey,
    ) -> Result<Vec<u8>, RevealError> {
        let result = match envelope.kind() {
            EnvelopeKind::OrkRemote => self.decrypt_remote(envelope, false).await,
            _ => self.decrypt_bytes(envelope, key).await,
        };

        match result {
            Ok(Some(plain)) => Ok(plain),
            Ok(None) => {
                warn!("reveal failed: enclave session unavailable");
                Err(RevealError::new(EncryptError::OrkDecryptFailed(
                    EnclaveError::NotReady,
                )))
            }
            Err(e) => {
                warn!("reveal failed: {e}");
                Err(RevealError::new(e))
            }
        }
    }

    pub async fn reveal_string(
        &self,
        envelope: &Envelope,
        key: &SymmetricKey,
    ) -> Result<String, RevealError> {
        let bytes = self.reveal_bytes(envelope, key).await?;
        String::from_utf8(bytes).map_err(|e| RevealError::new(e.into()))
    }

    // ── Scopes ──

    /// Runs `fut` with ORK encryption disabled. The scope ends however
    /// `fut` ends.
    pub async fn without_ork<F: Future>(&self, fut: F) -> F::Output {
        let _guard = SkipGuard::new(&self.session, SkipFlag::Encrypt);
        fut.await
    }

    /// Runs `fut` with OrkRemote decryption skipped, for bulk vault loads.
    pub async fn with_ork_decrypt_skipped<F: Future>(&self, fut: F) -> F::Output {
        let _guard = SkipGuard::new(&self.session, SkipFlag::Decrypt);
        fut.await
    }

    /// Skips OrkRemote decryption until the returned guard is dropped.
    pub fn skip_ork_decrypt(&self) -> SkipGuard {
        SkipGuard::new(&self.session, SkipFlag::Decrypt)
    }
}

//! Standard on-device encryption used whenever the enclave is not involved.
//!
//! Consumers depend on `Arc<dyn LocalEncryptor>` so the router never cares
//! which local cipher is in use. [`ChaChaEncryptor`] is the default.

use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Local symmetric encryption producing and consuming envelopes.
pub trait LocalEncryptor: Send + Sync {
    /// Encrypts `plaintext`, returning a `SymmetricLocal` envelope.
    fn encrypt(&self, key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<Envelope>;

    /// Decrypts an envelope this encryptor understands.
    fn decrypt(&self, key: &SymmetricKey, envelope: &Envelope) -> CryptoResult<Vec<u8>>;

    fn encrypt_string(&self, key: &SymmetricKey, plaintext: &str) -> CryptoResult<Envelope> {
        self.encrypt(key, plaintext.as_bytes())
    }

    fn decrypt_string(&self, key: &SymmetricKey, envelope: &Envelope) -> CryptoResult<String> {
        Ok(String::from_utf8(self.decrypt(key, envelope)?)?)
    }
}

/// ChaCha20-Poly1305 with a random nonce per value.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChaChaEncryptor;

impl LocalEncryptor for ChaChaEncryptor {
    fn encrypt(&self, key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<Envelope> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(Envelope::tag(EnvelopeKind::SymmetricLocal, STANDARD.encode(payload)))
    }

    fn decrypt(&self, key: &SymmetricKey, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
        match envelope.kind() {
            EnvelopeKind::SymmetricLocal => {}
            EnvelopeKind::Plaintext => return envelope.payload_bytes(),
            other => return Err(CryptoError::UnsupportedKind(other)),
        }

        let payload = envelope.payload_bytes()?;
        if payload.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption(format!(
                "payload too short: {} bytes",
                payload.len()
            )));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                CryptoError::Decryption("wrong key or tampered data".to_string())
            })
    }
}

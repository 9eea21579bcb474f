//! Error types for the field encryption service.

use orkvault_crypto::CryptoError;
use orkvault_enclave::EnclaveError;
use std::string::FromUtf8Error;
use std::time::Duration;
use thiserror::Error;

pub type EncryptResult<T> = Result<T, EncryptError>;

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("ORK decryption failed: {0}")]
    OrkDecryptFailed(#[source] EnclaveError),

    #[error("ORK decryption paused after a recent failure, retry in {remaining:?}")]
    OrkDecryptCooldown { remaining: Duration },

    #[error("ORK encryption failed: {0}")]
    OrkEncryptFailed(#[source] EnclaveError),

    /// Envelope parsing and local cipher errors, including `MalformedEnvelope`.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("invalid export document: {0}")]
    InvalidExport(String),
}

impl EncryptError {
    pub fn is_malformed_envelope(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::MalformedEnvelope(_)))
    }
}

const REVEAL_MESSAGE: &str = "Could not decrypt this field. Please try again or log in again.";

/// Failure on the user-initiated reveal path.
///
/// Displays a message fit for the user; the underlying cause is kept as the
/// error source.
#[derive(Debug, Error)]
#[error("Could not decrypt this field. Please try again or log in again.")]
pub struct RevealError {
    #[source]
    cause: EncryptError,
}

impl RevealError {
    pub(crate) fn new(cause: EncryptError) -> Self {
        Self { cause }
    }

    pub fn user_message(&self) -> &'static str {
        REVEAL_MESSAGE
    }

    pub fn cause(&self) -> &EncryptError {
        &self.cause
    }

    pub fn into_cause(self) -> EncryptError {
        self.cause
    }
}

//! Error types for the crypto layer.

use crate::envelope::EnvelopeKind;
use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while tagging, encoding or locally encrypting values.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid base64 payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("envelope kind {0} cannot be decrypted locally")]
    UnsupportedKind(EnvelopeKind),

    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

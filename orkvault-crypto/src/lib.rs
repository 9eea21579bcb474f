//! Envelope codec and local symmetric encryption for OrkVault.
//!
//! Every stored field value is an [`Envelope`]: a discriminant naming the
//! scheme that produced it plus an opaque payload. Two schemes are handled
//! on-device:
//!
//! - **Plaintext**: base64 of the raw value, decoded without any key.
//! - **SymmetricLocal**: ChaCha20-Poly1305 under a [`SymmetricKey`] held by
//!   the vault.
//!
//! **OrkRemote** payloads are only ever produced and opened by the remote
//! enclave (see `orkvault-enclave`); this crate never touches them beyond
//! tagging and classification.

pub mod cipher;
pub mod envelope;
mod error;
mod key;

pub use cipher::{ChaChaEncryptor, LocalEncryptor, NONCE_SIZE, TAG_SIZE};
pub use envelope::{classify, tag, Envelope, EnvelopeKind};
pub use error::{CryptoError, CryptoResult};
pub use key::{SymmetricKey, KEY_SIZE};

//! Tagged envelopes for stored field values.
//!
//! The wire form is `<discriminant>.<payload>`:
//!
//! | kind                      | discriminant | payload                                 |
//! |---------------------------|--------------|-----------------------------------------|
//! | `PasswordProtectedLegacy` | `0`          | opaque, produced by older clients       |
//! | `SymmetricLocal`          | `2`          | base64(nonce \|\| ciphertext \|\| tag)  |
//! | `OrkRemote`               | `100`        | base64 of the enclave ciphertext        |
//! | `Plaintext`               | `101`        | base64 of the raw value                 |
//!
//! The kind is always read from the discriminant, never guessed from the
//! payload. An unknown discriminant is a hard error, not plaintext.

use crate::error::{CryptoError, CryptoResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Scheme that produced an envelope's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Password-protected value written by legacy clients.
    PasswordProtectedLegacy,
    /// Encrypted on-device with the vault's symmetric key.
    SymmetricLocal,
    /// Encrypted by the remote ORK enclave.
    OrkRemote,
    /// Stored unencrypted (base64).
    Plaintext,
}

impl EnvelopeKind {
    pub const fn discriminant(self) -> u16 {
        match self {
            Self::PasswordProtectedLegacy => 0,
            Self::SymmetricLocal => 2,
            Self::OrkRemote => 100,
            Self::Plaintext => 101,
        }
    }

    pub fn from_discriminant(value: u16) -> CryptoResult<Self> {
        match value {
            0 => Ok(Self::PasswordProtectedLegacy),
            2 => Ok(Self::SymmetricLocal),
            100 => Ok(Self::OrkRemote),
            101 => Ok(Self::Plaintext),
            other => Err(CryptoError::MalformedEnvelope(format!(
                "unknown discriminant {other}"
            ))),
        }
    }

    /// Only remote payloads may be sent to the enclave.
    pub fn is_remote(self) -> bool {
        matches!(self, Self::OrkRemote)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PasswordProtectedLegacy => "password-protected-legacy",
            Self::SymmetricLocal => "symmetric-local",
            Self::OrkRemote => "ork-remote",
            Self::Plaintext => "plaintext",
        };
        f.write_str(name)
    }
}

/// An encrypted (or explicitly plaintext) field value.
///
/// Immutable once built: there is no way to change the kind of an existing
/// envelope, and decoding borrows it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Envelope {
    kind: EnvelopeKind,
    payload: String,
}

impl Envelope {
    /// Tags an already-encoded payload with a kind.
    pub fn tag(kind: EnvelopeKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Tags raw bytes, base64-encoding them as the payload.
    pub fn from_bytes(kind: EnvelopeKind, bytes: &[u8]) -> Self {
        Self::tag(kind, STANDARD.encode(bytes))
    }

    /// Builds a plaintext envelope for a string value.
    pub fn plaintext(value: &str) -> Self {
        Self::from_bytes(EnvelopeKind::Plaintext, value.as_bytes())
    }

    /// Parses the `<discriminant>.<payload>` wire form.
    pub fn parse(raw: &str) -> CryptoResult<Self> {
        let (discriminant, payload) = raw.split_once('.').ok_or_else(|| {
            CryptoError::MalformedEnvelope("missing discriminant separator".to_string())
        })?;

        if discriminant.is_empty() || !discriminant.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CryptoError::MalformedEnvelope(format!(
                "invalid discriminant {discriminant:?}"
            )));
        }

        let value: u16 = discriminant.parse().map_err(|_| {
            CryptoError::MalformedEnvelope(format!("discriminant out of range: {discriminant}"))
        })?;

        Ok(Self::tag(EnvelopeKind::from_discriminant(value)?, payload))
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Decodes the base64 payload.
    pub fn payload_bytes(&self) -> CryptoResult<Vec<u8>> {
        Ok(STANDARD.decode(&self.payload)?)
    }

    /// True when the value can only be read through the enclave.
    ///
    /// Bulk loads leave such fields empty, so callers use this to decide
    /// whether a field must be fetched and decrypted on demand.
    pub fn is_ork_protected(&self) -> bool {
        self.kind.is_remote()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.discriminant(), self.payload)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl FromStr for Envelope {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Tags a payload with a kind.
pub fn tag(kind: EnvelopeKind, payload: impl Into<String>) -> Envelope {
    Envelope::tag(kind, payload)
}

/// Reads the kind of a raw wire-form envelope without keeping the payload.
pub fn classify(raw: &str) -> CryptoResult<EnvelopeKind> {
    Envelope::parse(raw).map(|e| e.kind())
}

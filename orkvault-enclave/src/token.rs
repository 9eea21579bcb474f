//! Session token ("doken") handling.
//!
//! The token is an opaque bearer credential. Its claim set (the second
//! dot-separated segment, base64url JSON) is decoded lazily and at most once
//! per token value. Signatures are never checked here; the enclave does that.

use crate::error::{EnclaveError, EnclaveResult};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

/// Decoded, unverified token claims.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenClaims(Map<String, Value>);

impl TokenClaims {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// `exp` claim in seconds since the Unix epoch.
    pub fn expires_at(&self) -> Option<u64> {
        self.0.get("exp").and_then(Value::as_u64)
    }

    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.0.get("sid").and_then(Value::as_str)
    }
}

/// Short-lived bearer credential authorizing enclave operations.
#[derive(Clone)]
pub struct SessionToken {
    raw: String,
    claims: OnceLock<Result<TokenClaims, String>>,
}

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            claims: OnceLock::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Decodes the claim set on first use and caches the outcome.
    pub fn claims(&self) -> EnclaveResult<&TokenClaims> {
        self.claims
            .get_or_init(|| decode_claims(&self.raw))
            .as_ref()
            .map_err(|e| EnclaveError::InvalidToken(e.clone()))
    }

    /// Whether the claim set has been decoded yet.
    pub fn claims_decoded(&self) -> bool {
        self.claims.get().is_some()
    }
}

fn decode_claims(raw: &str) -> Result<TokenClaims, String> {
    let segment = raw
        .split('.')
        .nth(1)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing claims segment".to_string())?;
    let segment = segment.trim_end_matches('=');

    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD_NO_PAD.decode(segment))
        .map_err(|e| format!("claims segment is not base64: {e}"))?;

    serde_json::from_slice::<Map<String, Value>>(&bytes)
        .map(TokenClaims)
        .map_err(|e| format!("claims segment is not a JSON object: {e}"))
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for SessionToken {}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(<{} bytes>)", self.raw.len())
    }
}

impl From<String> for SessionToken {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for SessionToken {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl Serialize for SessionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for SessionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

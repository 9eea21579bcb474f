//! Wire protocol between the session owner and the proxy host.
//!
//! Requests are JSON objects tagged by `command`; binary payloads travel as
//! standard base64. `isReady` is special: a host that is not yet listening
//! produces no reply at all, which is how the readiness poll tells
//! "connection open" apart from "script running".

use crate::config::EnclaveConfig;
use crate::error::{EnclaveError, EnclaveResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ProxyRequest {
    Init {
        config: EnclaveConfig,
        token: String,
    },
    Encrypt {
        #[serde(rename = "dataB64")]
        data_b64: String,
        tags: Vec<String>,
    },
    Decrypt {
        #[serde(rename = "encryptedB64")]
        encrypted_b64: String,
        tags: Vec<String>,
    },
    UpdateToken {
        token: String,
    },
    Destroy,
    IsReady,
}

impl ProxyRequest {
    pub fn encrypt(data: &[u8], tags: &[String]) -> Self {
        Self::Encrypt {
            data_b64: STANDARD.encode(data),
            tags: tags.to_vec(),
        }
    }

    pub fn decrypt(ciphertext: &[u8], tags: &[String]) -> Self {
        Self::Decrypt {
            encrypted_b64: STANDARD.encode(ciphertext),
            tags: tags.to_vec(),
        }
    }

    /// Command name as it appears on the wire.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Encrypt { .. } => "encrypt",
            Self::Decrypt { .. } => "decrypt",
            Self::UpdateToken { .. } => "updateToken",
            Self::Destroy => "destroy",
            Self::IsReady => "isReady",
        }
    }

    pub fn to_value(&self) -> EnclaveResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| EnclaveError::Protocol(e.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyStatus {
    Initialized,
    AlreadyInitialized,
    Success,
    Destroyed,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyReply {
    pub status: ProxyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_b64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxyReply {
    pub fn status(status: ProxyStatus) -> Self {
        Self {
            status,
            result_b64: None,
            error: None,
        }
    }

    pub fn success(result: &[u8]) -> Self {
        Self {
            status: ProxyStatus::Success,
            result_b64: Some(STANDARD.encode(result)),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ProxyStatus::Error,
            result_b64: None,
            error: Some(message.into()),
        }
    }

    pub fn from_value(value: serde_json::Value) -> EnclaveResult<Self> {
        serde_json::from_value(value).map_err(|e| EnclaveError::Protocol(e.to_string()))
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "status": "error", "error": e.to_string() })
        })
    }

    /// Fails with `Remote` if the host reported an error.
    pub fn check(self) -> EnclaveResult<Self> {
        match self.status {
            ProxyStatus::Error => Err(EnclaveError::Remote(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            _ => Ok(self),
        }
    }

    /// Decodes the base64 result of a successful encrypt/decrypt.
    pub fn into_bytes(self) -> EnclaveResult<Vec<u8>> {
        let reply = self.check()?;
        let b64 = reply
            .result_b64
            .ok_or_else(|| EnclaveError::Protocol("reply has no result".to_string()))?;
        STANDARD
            .decode(b64)
            .map_err(|e| EnclaveError::Protocol(format!("result is not base64: {e}")))
    }
}

/// Reply to `isReady` once the host is listening.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyReply {
    pub ready: bool,
}

//! Whole-vault JSON exports sealed by the enclave.
//!
//! A sealed export replaces the plaintext document with
//! `{"encrypted": true, "orkEncrypted": true, "data": "<envelope>"}`. Only the
//! enclave can open it again, so sealing never falls back to local keys.

use crate::error::{EncryptError, EncryptResult};
use crate::router::OrkEncryptionRouter;
use orkvault_crypto::{Envelope, EnvelopeKind};
use orkvault_enclave::EnclaveError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedExport {
    pub encrypted: bool,
    pub ork_encrypted: bool,
    pub data: Envelope,
}

/// Encrypts an export document with the enclave.
pub async fn seal_export(router: &OrkEncryptionRouter, export: &Value) -> EncryptResult<Value> {
    if !router.session().ensure_ready().await {
        return Err(EncryptError::OrkEncryptFailed(EnclaveError::NotReady));
    }

    let json = serde_json::to_vec(export)
        .map_err(|e| EncryptError::InvalidExport(e.to_string()))?;
    let data = router.encrypt_remote(&json).await?;

    let sealed = SealedExport {
        encrypted: true,
        ork_encrypted: true,
        data,
    };
    info!("sealed export ({} bytes)", json.len());
    serde_json::to_value(sealed).map_err(|e| EncryptError::InvalidExport(e.to_string()))
}

/// Whether `document` looks like a sealed export.
pub fn is_ork_sealed_export(document: &Value) -> bool {
    document.get("encrypted").and_then(Value::as_bool) == Some(true)
        && document.get("orkEncrypted").and_then(Value::as_bool) == Some(true)
        && document.get("data").is_some_and(Value::is_string)
}

/// Decrypts a sealed export back to the original document.
pub async fn open_export(router: &OrkEncryptionRouter, document: &Value) -> EncryptResult<Value> {
    if !is_ork_sealed_export(document) {
        return Err(EncryptError::InvalidExport(
            "not an ORK-sealed export".to_string(),
        ));
    }

    let sealed: SealedExport = serde_json::from_value(document.clone())
        .map_err(|e| EncryptError::InvalidExport(e.to_string()))?;
    if sealed.data.kind() != EnvelopeKind::OrkRemote {
        return Err(EncryptError::InvalidExport(format!(
            "export data is {}, expected ork-remote",
            sealed.data.kind()
        )));
    }

    let json = router
        .decrypt_remote(&sealed.data, false)
        .await?
        .ok_or(EncryptError::OrkDecryptFailed(EnclaveError::NotReady))?;

    serde_json::from_slice(&json).map_err(|e| EncryptError::InvalidExport(e.to_string()))
}

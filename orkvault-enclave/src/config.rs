//! Enclave connection configuration and session policy.

use crate::error::{EnclaveError, EnclaveResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Where and how to reach the remote enclave.
///
/// Supplied by the authentication flow at login and persisted for the
/// lifetime of the session. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnclaveConfig {
    enclave_origin: Url,
    vendor_id: String,
    voucher_endpoint: Url,
    signed_client_origin: String,
}

/// ORK decryption option as returned by the server in the login response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrkDecryptionOption {
    pub home_ork_url: String,
    pub vendor_id: String,
    pub voucher_url: String,
    pub signed_client_origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_client_origin_browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_user_key: Option<String>,
}

/// Connection parameters derived from an [`EnclaveConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnclaveTarget {
    /// Origin of the voucher endpoint, e.g. `https://auth.example.com`.
    pub auth_server_url: String,
    /// Realm taken from the `/realms/<realm>/` voucher path segment.
    pub realm: String,
    /// `sessionId` query parameter of the voucher endpoint.
    pub session_id: String,
    pub vendor_id: String,
    pub client_origin_auth: String,
    pub client_id: String,
}

impl EnclaveConfig {
    pub fn new(
        enclave_origin: Url,
        vendor_id: impl Into<String>,
        voucher_endpoint: Url,
        signed_client_origin: impl Into<String>,
    ) -> Self {
        Self {
            enclave_origin,
            vendor_id: vendor_id.into(),
            voucher_endpoint,
            signed_client_origin: signed_client_origin.into(),
        }
    }

    /// Builds a config from the server's decryption option.
    ///
    /// Browser clients use the browser-specific signed origin when the
    /// server supplied one.
    pub fn from_decryption_option(
        option: &OrkDecryptionOption,
        browser: bool,
    ) -> EnclaveResult<Self> {
        let enclave_origin = Url::parse(&option.home_ork_url)
            .map_err(|e| EnclaveError::InvalidConfig(format!("home ORK url: {e}")))?;
        let voucher_endpoint = Url::parse(&option.voucher_url)
            .map_err(|e| EnclaveError::InvalidConfig(format!("voucher url: {e}")))?;

        let signed_client_origin = match (&option.signed_client_origin_browser, browser) {
            (Some(origin), true) => origin.clone(),
            _ => option.signed_client_origin.clone(),
        };

        Ok(Self {
            enclave_origin,
            vendor_id: option.vendor_id.clone(),
            voucher_endpoint,
            signed_client_origin,
        })
    }

    pub fn enclave_origin(&self) -> &Url {
        &self.enclave_origin
    }

    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }

    pub fn voucher_endpoint(&self) -> &Url {
        &self.voucher_endpoint
    }

    pub fn signed_client_origin(&self) -> &str {
        &self.signed_client_origin
    }

    /// Derives the connection target from the voucher endpoint.
    pub fn target(&self, client_id: &str) -> EnclaveResult<EnclaveTarget> {
        let origin = self.voucher_endpoint.origin();
        if !origin.is_tuple() {
            return Err(EnclaveError::InvalidConfig(
                "voucher endpoint has no origin".to_string(),
            ));
        }

        let segments: Vec<&str> = self
            .voucher_endpoint
            .path_segments()
            .map(|s| s.collect())
            .unwrap_or_default();

        let realm = match segments.iter().position(|s| *s == "realms") {
            Some(idx) => match segments.get(idx + 1) {
                Some(raw) => urlencoding::decode(raw)
                    .map_err(|e| EnclaveError::InvalidConfig(format!("realm: {e}")))?
                    .into_owned(),
                None => String::new(),
            },
            None => String::new(),
        };

        let session_id = self
            .voucher_endpoint
            .query_pairs()
            .find(|(k, _)| k == "sessionId")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        Ok(EnclaveTarget {
            auth_server_url: origin.ascii_serialization(),
            realm,
            session_id,
            vendor_id: self.vendor_id.clone(),
            client_origin_auth: self.signed_client_origin.clone(),
            client_id: client_id.to_string(),
        })
    }
}

/// Timing policy for the enclave session.
///
/// None of the specific values matter for correctness; what matters is
/// that every wait is bounded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnclavePolicy {
    /// How long decrypts fail fast after a remote decrypt failure.
    pub cooldown_secs: u64,

    /// Hard upper bound on a single remote decrypt.
    pub decrypt_timeout_secs: u64,

    /// Readiness polls before a proxied connection is given up.
    pub readiness_attempts: u32,

    /// Delay between readiness polls (milliseconds).
    pub readiness_interval_ms: u64,

    /// Delay before the single retry of an unanswered proxied request (milliseconds).
    pub retry_backoff_ms: u64,

    /// Client id presented to the auth server when connecting.
    pub client_id: String,
}

impl Default for EnclavePolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: 10,
            decrypt_timeout_secs: 30,
            readiness_attempts: 20,
            readiness_interval_ms: 100,
            retry_backoff_ms: 200,
            client_id: "orkvault".to_string(),
        }
    }
}

impl EnclavePolicy {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn decrypt_timeout(&self) -> Duration {
        Duration::from_secs(self.decrypt_timeout_secs)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Rejects policies that would leave a wait unbounded or disabled.
    pub fn validate(&self) -> EnclaveResult<()> {
        if self.cooldown_secs == 0 {
            return Err(EnclaveError::InvalidConfig(
                "cooldown_secs must be greater than zero".to_string(),
            ));
        }
        if self.decrypt_timeout_secs == 0 {
            return Err(EnclaveError::InvalidConfig(
                "decrypt_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.readiness_attempts == 0 {
            return Err(EnclaveError::InvalidConfig(
                "readiness_attempts must be greater than zero".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(EnclaveError::InvalidConfig("client_id is empty".to_string()));
        }
        Ok(())
    }
}

//! Enclave error types.

use std::time::Duration;
use thiserror::Error;

/// Result type for enclave operations.
pub type EnclaveResult<T> = Result<T, EnclaveError>;

/// Errors that can occur while managing or using the enclave session.
///
/// `Clone` because every waiter on an in-flight initialization receives the
/// same outcome.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EnclaveError {
    #[error("enclave initialization failed: {0}")]
    InitFailed(String),

    #[error("enclave not ready")]
    NotReady,

    #[error("enclave decrypt timed out after {0:?}")]
    DecryptTimeout(Duration),

    #[error("enclave decrypt cooling down for another {0:?}")]
    CoolingDown(Duration),

    #[error("no response from enclave host")]
    TransportNoResponse,

    #[error("enclave reported an error: {0}")]
    Remote(String),

    #[error("malformed reply from enclave host: {0}")]
    Protocol(String),

    #[error("enclave host context unavailable: {0}")]
    HostUnavailable(String),

    #[error("invalid enclave configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid session token: {0}")]
    InvalidToken(String),

    #[error("session storage error: {0}")]
    Storage(String),
}

impl EnclaveError {
    /// Wraps any error raised while connecting as `InitFailed`.
    pub(crate) fn into_init_failed(self) -> Self {
        match self {
            Self::InitFailed(_) => self,
            other => Self::InitFailed(other.to_string()),
        }
    }
}

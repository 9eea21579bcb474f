//! ORK enclave session management for OrkVault.
//!
//! The enclave is a remote capability reachable only through
//! `encrypt(data, tags)` and `decrypt(ciphertext, tags)`. This crate owns the
//! single connection to it:
//!
//! - [`EnclaveSessionManager`]: lifecycle, lazy reconnect from persisted
//!   state, serialized operations, decrypt timeout and cooldown bookkeeping.
//! - [`SessionStore`]: best-effort persistence of config and token.
//! - [`transport`]: direct and proxied channels to the enclave, the proxy
//!   wire protocol and the host that answers it.

pub mod config;
pub mod error;
pub mod queue;
pub mod session;
pub mod store;
pub mod token;
pub mod transport;

pub use config::{EnclaveConfig, EnclavePolicy, EnclaveTarget, OrkDecryptionOption};
pub use error::{EnclaveError, EnclaveResult};
pub use queue::OperationQueue;
pub use session::{EnclaveSessionManager, SessionState};
pub use store::{MemoryBackend, SessionBackend, SessionStore};
pub use token::{SessionToken, TokenClaims};
pub use transport::{
    EnclaveConnector, EnclaveHandle, EnclaveTransport, HostChannel, HostContext, KeepAlive,
    LocalHostContext, MessageChannel, ProxyHost, Topology, spawn_proxy_host,
};

//! Channels to wherever the enclave actually lives.
//!
//! Two topologies are supported and chosen at construction:
//!
//! - **Direct**: this context can host the enclave itself. Calls go straight
//!   to an [`EnclaveHandle`] obtained from an [`EnclaveConnector`].
//! - **Proxied**: only a separate, UI-capable context can host it. Every call
//!   is a JSON message over a [`MessageChannel`]; the remote context is kept
//!   alive with a [`KeepAlive`] hold for the whole session.
//!
//! The session manager sees the same contract either way.

mod direct;
mod host;
mod keepalive;
pub mod protocol;
mod proxied;

pub use direct::DirectTransport;
pub use host::{spawn_proxy_host, HostChannel, LocalHostContext, ProxyHost};
pub use keepalive::{HostContext, KeepAlive};
pub use proxied::{MessageChannel, ProxiedTransport};

use crate::config::{EnclaveConfig, EnclavePolicy, EnclaveTarget};
use crate::error::EnclaveResult;
use crate::token::SessionToken;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Opens connections to the remote enclave. The enclave is a black box.
#[async_trait]
pub trait EnclaveConnector: Send + Sync {
    /// Whether this context can host an enclave connection at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Connects and resolves once the enclave reports it is ready.
    async fn connect(
        &self,
        target: &EnclaveTarget,
        token: &SessionToken,
    ) -> EnclaveResult<Arc<dyn EnclaveHandle>>;
}

/// A live enclave connection.
#[async_trait]
pub trait EnclaveHandle: Send + Sync {
    async fn encrypt(&self, data: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>>;
    async fn decrypt(&self, ciphertext: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>>;
    async fn update_token(&self, token: &SessionToken) -> EnclaveResult<()>;
    /// Releases remote resources. Must tolerate an already-closed connection.
    async fn close(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    Direct,
    Proxied,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Proxied => f.write_str("proxied"),
        }
    }
}

/// The enclave channel used by the session manager.
pub enum EnclaveTransport {
    Direct(DirectTransport),
    Proxied(ProxiedTransport),
}

impl EnclaveTransport {
    pub fn direct(connector: Arc<dyn EnclaveConnector>, policy: &EnclavePolicy) -> Self {
        Self::Direct(DirectTransport::new(connector, policy))
    }

    pub fn proxied(
        channel: Arc<dyn MessageChannel>,
        host: Arc<dyn HostContext>,
        policy: &EnclavePolicy,
    ) -> Self {
        Self::Proxied(ProxiedTransport::new(channel, host, policy))
    }

    pub fn topology(&self) -> Topology {
        match self {
            Self::Direct(_) => Topology::Direct,
            Self::Proxied(_) => Topology::Proxied,
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Self::Direct(t) => t.is_available(),
            Self::Proxied(t) => t.is_available(),
        }
    }

    pub async fn open(&self, config: &EnclaveConfig, token: &SessionToken) -> EnclaveResult<()> {
        match self {
            Self::Direct(t) => t.open(config, token).await,
            Self::Proxied(t) => t.open(config, token).await,
        }
    }

    pub async fn encrypt(&self, data: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        match self {
            Self::Direct(t) => t.encrypt(data, tags).await,
            Self::Proxied(t) => t.encrypt(data, tags).await,
        }
    }

    pub async fn decrypt(&self, ciphertext: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        match self {
            Self::Direct(t) => t.decrypt(ciphertext, tags).await,
            Self::Proxied(t) => t.decrypt(ciphertext, tags).await,
        }
    }

    pub async fn update_token(&self, token: &SessionToken) -> EnclaveResult<()> {
        match self {
            Self::Direct(t) => t.update_token(token).await,
            Self::Proxied(t) => t.update_token(token).await,
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Direct(t) => t.close().await,
            Self::Proxied(t) => t.close().await,
        }
    }
}

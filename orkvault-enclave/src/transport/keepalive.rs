//! Keeping the remote hosting context alive between operations.
//!
//! The platform reclaims an idle hosting context, which would take the
//! enclave connection with it. A [`KeepAlive`] is an explicit hold on the
//! context: acquired when the proxied connection opens and released exactly
//! once, either by [`KeepAlive::release`] or on drop.

use crate::error::EnclaveResult;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The separate context that hosts the enclave in the proxied topology.
pub trait HostContext: Send + Sync {
    /// Whether the platform supports spawning a hosting context at all.
    fn is_available(&self) -> bool;

    /// Creates the context if needed and registers a hold on it.
    fn retain(&self, reason: &str) -> EnclaveResult<()>;

    /// Drops one hold. The context may be reclaimed once no holds remain.
    fn release(&self, reason: &str);
}

/// An acquired hold on a [`HostContext`].
pub struct KeepAlive {
    host: Arc<dyn HostContext>,
    reason: &'static str,
    held: bool,
}

impl KeepAlive {
    pub fn acquire(host: Arc<dyn HostContext>, reason: &'static str) -> EnclaveResult<Self> {
        host.retain(reason)?;
        debug!("acquired host context hold: {reason}");
        Ok(Self {
            host,
            reason,
            held: true,
        })
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.held {
            self.held = false;
            self.host.release(self.reason);
            debug!("released host context hold: {}", self.reason);
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("reason", &self.reason)
            .field("held", &self.held)
            .finish()
    }
}

//! Router configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::OrkEncryptionRouter`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Policy tags sent with every enclave operation.
    pub tags: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tags: vec!["vault".to_string()],
        }
    }
}

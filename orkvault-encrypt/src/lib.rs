//! ORK-routing field encryption for OrkVault.
//!
//! [`OrkEncryptionRouter`] is the encrypt/decrypt facade the vault calls for
//! every field. It routes OrkRemote values through the enclave session from
//! `orkvault-enclave` and everything else through local symmetric
//! encryption from `orkvault-crypto`.

mod config;
mod error;
pub mod export;
mod router;
mod scope;

pub use config::RouterConfig;
pub use error::{EncryptError, EncryptResult, RevealError};
pub use export::{SealedExport, is_ork_sealed_export, open_export, seal_export};
pub use router::OrkEncryptionRouter;
pub use scope::{SkipFlag, SkipGuard};

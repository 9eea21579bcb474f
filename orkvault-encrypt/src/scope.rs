//! Scoped skipping of ORK routing.
//!
//! A guard opens a skip scope on the session when created and closes it when
//! dropped, so the scope ends on return, on error, on panic and when the
//! enclosing future is cancelled. Scopes are counted: the flag stays set
//! until every overlapping scope has ended, whatever order they end in.

use orkvault_enclave::EnclaveSessionManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipFlag {
    /// Route new encryptions to local crypto.
    Encrypt,
    /// Leave OrkRemote fields undecrypted during bulk loads.
    Decrypt,
}

#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct SkipGuard {
    session: EnclaveSessionManager,
    flag: SkipFlag,
}

impl SkipGuard {
    pub fn new(session: &EnclaveSessionManager, flag: SkipFlag) -> Self {
        match flag {
            SkipFlag::Encrypt => session.enter_skip_ork_encrypt_scope(),
            SkipFlag::Decrypt => session.enter_skip_ork_decrypt_scope(),
        }
        Self {
            session: session.clone(),
            flag,
        }
    }

    pub fn flag(&self) -> SkipFlag {
        self.flag
    }
}

impl Drop for SkipGuard {
    fn drop(&mut self) {
        match self.flag {
            SkipFlag::Encrypt => self.session.exit_skip_ork_encrypt_scope(),
            SkipFlag::Decrypt => self.session.exit_skip_ork_decrypt_scope(),
        }
    }
}

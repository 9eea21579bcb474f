//! Lifecycle of the single logical enclave connection.
//!
//! ```text
//! Uninitialized -> Initializing -> Ready <-> Degraded
//!        any state -> Destroyed
//! ```
//!
//! The manager owns the one [`EnclaveTransport`] for this context and is
//! cheap to clone; every clone shares the same session. Initialization is
//! lazy: [`EnclaveSessionManager::ensure_ready`] reconnects from the
//! persisted config and token when a restarted context needs the enclave
//! again, and concurrent callers share a single attempt. Once destroyed, a
//! session only comes back through an explicit [`EnclaveSessionManager::initialize`].

use crate::config::{EnclaveConfig, EnclavePolicy};
use crate::error::{EnclaveError, EnclaveResult};
use crate::queue::OperationQueue;
use crate::store::SessionStore;
use crate::token::SessionToken;
use crate::transport::{EnclaveTransport, Topology};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    /// Live, but a recent remote failure started a cooldown.
    Degraded,
    Destroyed,
}

impl SessionState {
    /// Whether a connection is open and operations may be issued.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Result of one initialization attempt, shared by all of its waiters.
#[derive(Clone, Debug)]
enum InitOutcome {
    Ready,
    /// Nothing persisted to reconnect from.
    NoSession,
    Failed(EnclaveError),
}

enum InitSource {
    Explicit {
        config: EnclaveConfig,
        token: SessionToken,
        /// Tear down the current connection before opening the new one.
        reconnect: bool,
    },
    Persisted,
}

type InitFuture = Shared<BoxFuture<'static, InitOutcome>>;

#[derive(Clone)]
struct InFlight {
    attempt: InitFuture,
    /// Started by `initialize` rather than by a lazy reconnect.
    explicit: bool,
}

struct Session {
    config: EnclaveConfig,
    token: SessionToken,
}

struct Inner {
    state: SessionState,
    session: Option<Session>,
    in_flight: Option<InFlight>,
    cooldown_until: Option<Instant>,
    /// Bumped by `destroy` so a late initialization can tell it lost.
    epoch: u64,
}

struct ManagerCore {
    transport: EnclaveTransport,
    store: SessionStore,
    policy: EnclavePolicy,
    queue: OperationQueue,
    inner: Mutex<Inner>,
    skip_decrypt: AtomicBool,
    skip_encrypt: AtomicBool,
    /// Open skip scopes; a flag reads as set while any scope is open.
    skip_decrypt_scopes: AtomicUsize,
    skip_encrypt_scopes: AtomicUsize,
}

/// Owns the enclave session for one execution context.
#[derive(Clone)]
pub struct EnclaveSessionManager {
    core: Arc<ManagerCore>,
}

enum Plan {
    Done,
    Rotate(SessionToken),
    Await(InitFuture),
    /// Let a lazy reconnect finish, then plan again.
    Settle(InitFuture),
}

impl EnclaveSessionManager {
    /// Fails with `InvalidConfig` if `policy` does not validate.
    pub fn new(
        transport: EnclaveTransport,
        store: SessionStore,
        policy: EnclavePolicy,
    ) -> EnclaveResult<Self> {
        policy.validate()?;
        Ok(Self {
            core: Arc::new(ManagerCore {
                transport,
                store,
                policy,
                queue: OperationQueue::new("enclave"),
                inner: Mutex::new(Inner {
                    state: SessionState::Uninitialized,
                    session: None,
                    in_flight: None,
                    cooldown_until: None,
                    epoch: 0,
                }),
                skip_decrypt: AtomicBool::new(false),
                skip_encrypt: AtomicBool::new(false),
                skip_decrypt_scopes: AtomicUsize::new(0),
                skip_encrypt_scopes: AtomicUsize::new(0),
            }),
        })
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_live()
    }

    pub fn policy(&self) -> &EnclavePolicy {
        &self.core.policy
    }

    pub fn topology(&self) -> Topology {
        self.core.transport.topology()
    }

    /// Config of the live session, if any.
    pub fn config(&self) -> Option<EnclaveConfig> {
        self.core.lock().session.as_ref().map(|s| s.config.clone())
    }

    /// Opens the enclave connection and persists the session once it is ready.
    ///
    /// Callers arriving while another `initialize` is in flight wait for
    /// that attempt. A lazy reconnect in flight is allowed to finish first and
    /// the caller's own config then decides what happens. On a live session
    /// the same config with a new token rotates the token in place; a
    /// different config replaces the connection.
    pub async fn initialize(&self, config: EnclaveConfig, token: SessionToken) -> EnclaveResult<()> {
        loop {
            let plan = {
                let mut inner = self.core.lock();
                match inner.in_flight.clone() {
                    Some(in_flight) if in_flight.explicit => Plan::Await(in_flight.attempt),
                    Some(in_flight) => Plan::Settle(in_flight.attempt),
                    None => {
                        let current = inner
                            .session
                            .as_ref()
                            .filter(|_| inner.state.is_live())
                            .map(|s| (s.config == config, s.token == token));
                        match current {
                            Some((true, true)) => Plan::Done,
                            Some((true, false)) => Plan::Rotate(token.clone()),
                            Some((false, _)) => {
                                info!("enclave config changed, reconnecting");
                                Plan::Await(self.begin(
                                    &mut inner,
                                    InitSource::Explicit {
                                        config: config.clone(),
                                        token: token.clone(),
                                        reconnect: true,
                                    },
                                ))
                            }
                            None => Plan::Await(self.begin(
                                &mut inner,
                                InitSource::Explicit {
                                    config: config.clone(),
                                    token: token.clone(),
                                    reconnect: false,
                                },
                            )),
                        }
                    }
                }
            };

            match plan {
                Plan::Settle(attempt) => {
                    debug!("waiting for lazy enclave reconnect before initializing");
                    attempt.await;
                }
                Plan::Done => return Ok(()),
                Plan::Rotate(token) => return self.rotate_token(token).await,
                Plan::Await(attempt) => {
                    return match attempt.await {
                        InitOutcome::Ready => Ok(()),
                        InitOutcome::NoSession => Err(EnclaveError::InitFailed(
                            "no persisted session to initialize from".to_string(),
                        )),
                        InitOutcome::Failed(e) => Err(e),
                    };
                }
            }
        }
    }

    /// Makes the session usable if it can be, without ever failing.
    ///
    /// Returns `false` when this context cannot host an enclave, when
    /// nothing is persisted, when reconnecting failed, or after `destroy`.
    pub async fn ensure_ready(&self) -> bool {
        let attempt = {
            let mut inner = self.core.lock();
            if inner.state.is_live() {
                return true;
            }
            match inner.in_flight.clone() {
                Some(in_flight) => in_flight.attempt,
                None if inner.state == SessionState::Destroyed => {
                    debug!("enclave session was destroyed, not reconnecting");
                    return false;
                }
                None => {
                    if !self.core.transport.is_available() {
                        debug!("{} enclave transport unavailable here", self.topology());
                        return false;
                    }
                    self.begin(&mut inner, InitSource::Persisted)
                }
            }
        };

        matches!(attempt.await, InitOutcome::Ready)
    }

    pub async fn encrypt(&self, data: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.require_live()?;
        let core = &self.core;
        core.queue
            .run("encrypt", core.transport.encrypt(data, tags))
            .await
    }

    /// Remote decrypt bounded by the policy's decrypt timeout.
    ///
    /// The timeout runs inside the queued operation, so a hung call still
    /// frees the queue for the operations behind it. A failure starts the
    /// cooldown, and operations that reach the front of the queue during
    /// the cooldown fail with `CoolingDown` without contacting the enclave.
    pub async fn decrypt(&self, ciphertext: &[u8], tags: &[String]) -> EnclaveResult<Vec<u8>> {
        self.require_live()?;
        let core = &self.core;
        let limit = core.policy.decrypt_timeout();

        core.queue
            .run("decrypt", async {
                if let Some(remaining) = core.cooldown_remaining() {
                    debug!("enclave decrypt in cooldown for another {remaining:?}");
                    return Err(EnclaveError::CoolingDown(remaining));
                }

                let result =
                    match tokio::time::timeout(limit, core.transport.decrypt(ciphertext, tags))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => {
                            warn!("enclave decrypt exceeded {limit:?}");
                            Err(EnclaveError::DecryptTimeout(limit))
                        }
                    };

                match &result {
                    Ok(_) => self.record_success(),
                    Err(_) => self.record_failure(),
                }
                result
            })
            .await
    }

    /// Replaces the session token without tearing down the connection.
    ///
    /// An initialization in flight finishes first, so the token it persists
    /// cannot overwrite this one.
    pub async fn rotate_token(&self, token: SessionToken) -> EnclaveResult<()> {
        let pending = self.core.lock().in_flight.clone();
        if let Some(in_flight) = pending {
            debug!("waiting for enclave initialization before rotating token");
            in_flight.attempt.await;
        }

        if self.is_ready() {
            let core = &self.core;
            core.queue
                .run("update-token", core.transport.update_token(&token))
                .await?;

            let mut inner = core.lock();
            if let Some(session) = inner.session.as_mut() {
                session.token = token.clone();
            }
            debug!("rotated enclave session token");
        } else {
            debug!("no live enclave session, persisting token only");
        }

        self.core.store.update_token(&token).await;
        Ok(())
    }

    /// Tears the session down and purges persisted state. Idempotent.
    pub async fn destroy(&self) {
        let previous = {
            let mut inner = self.core.lock();
            let previous = inner.state;
            inner.epoch += 1;
            inner.state = SessionState::Destroyed;
            inner.session = None;
            inner.in_flight = None;
            inner.cooldown_until = None;
            previous
        };

        self.core.transport.close().await;
        self.core.store.clear().await;

        if previous != SessionState::Destroyed {
            info!("enclave session destroyed (was {previous})");
        }
    }

    pub async fn has_persisted_session(&self) -> bool {
        self.core.store.has_persisted_session().await
    }

    /// Starts the decrypt cooldown after a remote failure.
    pub fn record_failure(&self) {
        let cooldown = self.core.policy.cooldown();
        let mut inner = self.core.lock();
        inner.cooldown_until = Some(Instant::now() + cooldown);
        if inner.state == SessionState::Ready {
            inner.state = SessionState::Degraded;
        }
        warn!("enclave degraded, failing fast for {cooldown:?}");
    }

    /// Clears the cooldown after a remote call succeeded.
    pub fn record_success(&self) {
        let mut inner = self.core.lock();
        inner.cooldown_until = None;
        if inner.state == SessionState::Degraded {
            inner.state = SessionState::Ready;
            info!("enclave recovered");
        }
    }

    /// Time left in the current cooldown window, if one is active.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.core.cooldown_remaining()
    }

    // ── Skip flags ──
    //
    // Each flag is set while its explicit value is true or any scope is open.

    /// Sets the explicit skip-decrypt value and returns its previous value.
    pub fn set_skip_ork_decrypt(&self, skip: bool) -> bool {
        self.core.skip_decrypt.swap(skip, Ordering::SeqCst)
    }

    pub fn should_skip_ork_decrypt(&self) -> bool {
        self.core.skip_decrypt.load(Ordering::SeqCst)
            || self.core.skip_decrypt_scopes.load(Ordering::SeqCst) > 0
    }

    pub fn enter_skip_ork_decrypt_scope(&self) {
        self.core.skip_decrypt_scopes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit_skip_ork_decrypt_scope(&self) {
        exit_scope(&self.core.skip_decrypt_scopes, "decrypt");
    }

    /// Sets the explicit skip-encrypt value and returns its previous value.
    pub fn set_skip_ork_encrypt(&self, skip: bool) -> bool {
        self.core.skip_encrypt.swap(skip, Ordering::SeqCst)
    }

    pub fn should_skip_ork_encrypt(&self) -> bool {
        self.core.skip_encrypt.load(Ordering::SeqCst)
            || self.core.skip_encrypt_scopes.load(Ordering::SeqCst) > 0
    }

    pub fn enter_skip_ork_encrypt_scope(&self) {
        self.core.skip_encrypt_scopes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit_skip_ork_encrypt_scope(&self) {
        exit_scope(&self.core.skip_encrypt_scopes, "encrypt");
    }

    fn require_live(&self) -> EnclaveResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(EnclaveError::NotReady)
        }
    }

    /// Registers a new in-flight attempt. Called with the state lock held.
    fn begin(&self, inner: &mut Inner, source: InitSource) -> InitFuture {
        inner.state = SessionState::Initializing;
        let epoch = inner.epoch;
        let core = self.core.clone();

        let explicit = matches!(source, InitSource::Explicit { .. });

        let attempt = async move { core.run_init(source, epoch).await }
            .boxed()
            .shared();
        inner.in_flight = Some(InFlight {
            attempt: attempt.clone(),
            explicit,
        });
        attempt
    }
}

fn exit_scope(scopes: &AtomicUsize, flag: &str) {
    if scopes
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_err()
    {
        warn!("skip-{flag} scope exited more often than entered");
    }
}

impl ManagerCore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let deadline = self.lock().cooldown_until?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    async fn run_init(&self, source: InitSource, epoch: u64) -> InitOutcome {
        let explicit = matches!(source, InitSource::Explicit { .. });

        let (config, token) = match source {
            InitSource::Explicit {
                config,
                token,
                reconnect,
            } => {
                if reconnect {
                    self.transport.close().await;
                }
                (config, token)
            }
            InitSource::Persisted => match self.store.load().await {
                Some(persisted) => {
                    debug!("reconnecting enclave from persisted session");
                    persisted
                }
                None => {
                    debug!("no persisted enclave session");
                    self.settle_failed(epoch);
                    return InitOutcome::NoSession;
                }
            },
        };

        if let Err(e) = self.transport.open(&config, &token).await {
            let e = e.into_init_failed();
            if explicit {
                warn!("{e}");
            } else {
                error!("failed to restore enclave session: {e}");
            }
            self.settle_failed(epoch);
            return InitOutcome::Failed(e);
        }

        self.store.save(&config, &token).await;

        let current = {
            let mut inner = self.lock();
            let current = inner.epoch == epoch;
            if current {
                inner.state = SessionState::Ready;
                inner.session = Some(Session { config, token });
                inner.in_flight = None;
                inner.cooldown_until = None;
            }
            current
        };

        if !current {
            warn!("enclave session destroyed during initialization, closing late connection");
            self.transport.close().await;
            self.store.clear().await;
            return InitOutcome::Failed(EnclaveError::InitFailed(
                "session destroyed during initialization".to_string(),
            ));
        }

        info!("enclave session ready ({})", self.transport.topology());
        InitOutcome::Ready
    }

    /// Returns to Uninitialized after an attempt that did not connect.
    fn settle_failed(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }
        inner.state = SessionState::Uninitialized;
        inner.session = None;
        inner.in_flight = None;
    }
}

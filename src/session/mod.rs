//! Session and account lifecycle.
//!
//! [`SessionManager`] merges three sources into one [`SessionSnapshot`]: the persisted
//! session probe, identity events from the [`AuthProvider`], and a periodic validity poll.
//! Snapshots are published on a `watch` channel.
//!
//! Loads are single-flight. `sign_in` and `sign_up` hold the load lock across the provider
//! call and the account load, so the identity events they trigger are skipped as redundant.
//! A generation counter is bumped on every sign-out, expiry and shutdown; any load or poll
//! result computed under an older generation is dropped.

use crate::{
    auth::{AuthEvent, AuthEventKind, AuthProvider, Identity},
    backend::Backend,
    config::AppConfig,
    core::{
        account as account_ops,
        validity::{self, InvalidReason},
    },
    entities::account,
    errors::{Error, Result},
    realtime::ChangeKind,
};
use std::{
    sync::{
        Arc, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, broadcast, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Nothing is known yet
    Bootstrapping,
    /// No identity
    SignedOut,
    /// Identity and account loaded, account usable
    Active,
    /// The account failed the validity rule and the session was ended
    Expired(InvalidReason),
}

/// What the application may show for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Still resolving the session
    Loading,
    /// Nobody is signed in
    SignIn,
    /// The account expired or was disabled
    Expired,
    /// The protected screens are reachable
    Granted,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Signed-in identity
    pub identity: Option<Identity>,
    /// Account of the identity; kept after expiry for the expired screen
    pub account: Option<account::Model>,
    /// Lifecycle status
    pub status: SessionStatus,
    /// True until the first definitive state
    pub is_bootstrapping: bool,
    /// True from the first definitive state on
    pub is_ready: bool,
    /// False only when the latest validity evaluation failed
    pub account_usable: bool,
}

impl SessionSnapshot {
    fn bootstrapping() -> Self {
        Self {
            identity: None,
            account: None,
            status: SessionStatus::Bootstrapping,
            is_bootstrapping: true,
            is_ready: false,
            account_usable: true,
        }
    }

    fn signed_out() -> Self {
        Self {
            status: SessionStatus::SignedOut,
            is_bootstrapping: false,
            is_ready: true,
            ..Self::bootstrapping()
        }
    }

    fn active(identity: Identity, account: account::Model) -> Self {
        Self {
            identity: Some(identity),
            account: Some(account),
            status: SessionStatus::Active,
            is_bootstrapping: false,
            is_ready: true,
            account_usable: true,
        }
    }

    fn expired(account: account::Model, reason: InvalidReason) -> Self {
        Self {
            identity: None,
            account: Some(account),
            status: SessionStatus::Expired(reason),
            is_bootstrapping: false,
            is_ready: true,
            account_usable: false,
        }
    }

    /// Gate for the protected screens.
    #[must_use]
    pub const fn access(&self) -> Access {
        if self.is_bootstrapping {
            return Access::Loading;
        }
        match self.status {
            SessionStatus::Bootstrapping => Access::Loading,
            SessionStatus::Expired(_) => Access::Expired,
            SessionStatus::SignedOut | SessionStatus::Active => {
                if self.identity.is_none() {
                    Access::SignIn
                } else if !self.account_usable {
                    Access::Expired
                } else {
                    Access::Granted
                }
            }
        }
    }

    /// Owner key of the signed-in identity.
    #[must_use]
    pub fn owner_key(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.id.as_str())
    }

    /// Owner key of a session that may use the protected screens.
    ///
    /// # Errors
    /// [`Error::NotSignedIn`] unless access is granted.
    pub fn require_owner(&self) -> Result<&str> {
        match (self.access(), self.owner_key()) {
            (Access::Granted, Some(owner_key)) => Ok(owner_key),
            _ => Err(Error::NotSignedIn),
        }
    }

    /// The error `sign_in` reports for an expired snapshot.
    fn validity_error(&self) -> Option<Error> {
        match self.status {
            SessionStatus::Expired(InvalidReason::Disabled) => Some(Error::AccountDisabled),
            SessionStatus::Expired(InvalidReason::Expired) => Some(
                self.account
                    .as_ref()
                    .and_then(|a| a.validity_date)
                    .map_or(Error::AccountDisabled, |deadline| Error::AccountExpired {
                        deadline,
                    }),
            ),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Tasks {
    listener: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
    account_watch: Option<JoinHandle<()>>,
}

fn abort(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
    }
}

struct Inner {
    backend: Backend,
    auth: Arc<dyn AuthProvider>,
    validity_interval: Duration,
    default_currency: String,
    state: watch::Sender<SessionSnapshot>,
    bootstrapped: AtomicBool,
    active: AtomicBool,
    generation: AtomicU64,
    load_lock: Mutex<()>,
    validity_slot: Mutex<()>,
    tasks: std::sync::Mutex<Tasks>,
}

/// Owns the session state. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Creates a manager using the session and display settings of `config`.
    #[must_use]
    pub fn new(backend: Backend, auth: Arc<dyn AuthProvider>, config: &AppConfig) -> Self {
        Self::with_options(
            backend,
            auth,
            config.session.validity_check_interval(),
            &config.display.default_currency,
        )
    }

    /// Creates a manager with an explicit poll interval and default currency.
    #[must_use]
    pub fn with_options(
        backend: Backend,
        auth: Arc<dyn AuthProvider>,
        validity_interval: Duration,
        default_currency: &str,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::bootstrapping());
        Self {
            inner: Arc::new(Inner {
                backend,
                auth,
                validity_interval,
                default_currency: default_currency.to_owned(),
                state,
                bootstrapped: AtomicBool::new(false),
                active: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                load_lock: Mutex::new(()),
                validity_slot: Mutex::new(()),
                tasks: std::sync::Mutex::new(Tasks::default()),
            }),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver of every published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Resolves the initial session. Only the first call does anything.
    ///
    /// Subscribes to identity events, then probes the persisted session. Whichever yields
    /// a definitive state first ends bootstrapping. A failing probe counts as signed out.
    pub async fn bootstrap(&self) {
        if self.inner.bootstrapped.swap(true, Ordering::SeqCst) {
            debug!("Session already bootstrapped");
            return;
        }

        let listener = self.inner.spawn_listener(self.inner.auth.subscribe());
        self.inner.tasks().listener = Some(listener);

        let generation = self.inner.current_generation();
        match self.inner.auth.current_session().await {
            Ok(Some(identity)) => {
                if let Ok(_guard) = self.inner.load_lock.try_lock() {
                    self.inner.load_identity(identity, generation).await;
                } else {
                    debug!("Identity load already in flight, probe result dropped");
                }
            }
            Ok(None) => self.inner.settle_signed_out(),
            Err(e) => {
                warn!(error = %e, "Session probe failed, treating as signed out");
                self.inner.settle_signed_out();
            }
        }
    }

    /// Signs in and returns once identity and account are loaded.
    ///
    /// # Errors
    /// Returns the provider's error for bad credentials, or `AccountExpired` /
    /// `AccountDisabled` when the account fails the validity rule. In the latter case the
    /// session has already been ended and the snapshot is `Expired`.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionSnapshot> {
        let _guard = self.inner.load_lock.lock().await;
        let identity = self.inner.auth.sign_in(email, password).await?;
        let generation = self.inner.current_generation();
        let snapshot = self.inner.load_identity(identity, generation).await;
        snapshot.validity_error().map_or(Ok(snapshot), Err)
    }

    /// Registers an identity, stores its account and returns once both are loaded.
    ///
    /// A failure to store the account is logged and does not undo the registration; the
    /// session continues with a placeholder account.
    ///
    /// # Errors
    /// Returns the provider's error if registration fails, or a validity error as for
    /// [`sign_in`](Self::sign_in).
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        account_name: &str,
        validity_date: Option<chrono::NaiveDate>,
    ) -> Result<SessionSnapshot> {
        let _guard = self.inner.load_lock.lock().await;
        let identity = self.inner.auth.sign_up(email, password).await?;
        let generation = self.inner.current_generation();

        let input = account_ops::NewAccount {
            account_name: account_name.to_owned(),
            email: identity.email.clone(),
            validity_date,
            currency: self.inner.default_currency.clone(),
        };
        if let Err(e) = account_ops::create_account(&self.inner.backend, &identity.id, input).await {
            warn!(identity_id = %identity.id, error = %e, "Account creation failed after sign-up");
        }

        let snapshot = self.inner.load_identity(identity, generation).await;
        snapshot.validity_error().map_or(Ok(snapshot), Err)
    }

    /// Signs out. Clears identity and account and stops the validity poll.
    ///
    /// # Errors
    /// Returns the provider's error; the local state is left untouched in that case.
    pub async fn sign_out(&self) -> Result<()> {
        self.inner.auth.sign_out().await?;
        self.inner.clear(true);
        info!("Session signed out");
        Ok(())
    }

    /// Re-evaluates the signed-in account now, outside the poll schedule.
    pub async fn check_validity(&self) {
        let Some(owner_key) = self.snapshot().owner_key().map(str::to_owned) else {
            return;
        };
        self.inner.check_validity(&owner_key).await;
    }

    /// Stops every background task. Results still in flight are dropped.
    pub fn shutdown(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let mut tasks = self.inner.tasks();
        abort(tasks.listener.take());
        abort(tasks.poll.take());
        abort(tasks.account_watch.take());
        debug!("Session manager shut down");
    }
}

impl Inner {
    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active.load(Ordering::SeqCst) && self.current_generation() == generation
    }

    fn publish(&self, snapshot: SessionSnapshot) {
        self.state.send_replace(snapshot);
    }

    /// Ends bootstrapping as signed out, unless another source already settled it.
    fn settle_signed_out(&self) {
        self.state.send_if_modified(|state| {
            if state.status == SessionStatus::Bootstrapping {
                *state = SessionSnapshot::signed_out();
                true
            } else {
                false
            }
        });
    }

    /// Drops the session. An `Expired` snapshot survives unless `force` is set.
    fn clear(&self, force: bool) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_session_tasks();
        self.state.send_if_modified(|state| {
            if !force && matches!(state.status, SessionStatus::Expired(_)) {
                return false;
            }
            *state = SessionSnapshot::signed_out();
            true
        });
    }

    fn stop_session_tasks(&self) {
        let mut tasks = self.tasks();
        abort(tasks.poll.take());
        abort(tasks.account_watch.take());
    }

    /// Loads the account of `identity`, evaluates it and publishes the result.
    ///
    /// Callers hold `load_lock` and pass the generation they observed before learning about
    /// `identity`.
    async fn load_identity(self: &Arc<Self>, identity: Identity, generation: u64) -> SessionSnapshot {
        let account = match account_ops::get_account_for_owner(self.backend.database(), &identity.id)
            .await
        {
            Ok(Some(account)) => account,
            Ok(None) => {
                debug!(identity_id = %identity.id, "No stored account, using placeholder");
                self.placeholder(&identity).await
            }
            Err(e) => {
                warn!(identity_id = %identity.id, error = %e, "Account load failed, using placeholder");
                self.placeholder(&identity).await
            }
        };

        if !self.is_current(generation) {
            debug!(identity_id = %identity.id, "Session changed during load, result dropped");
            return self.state.borrow().clone();
        }

        let outcome = validity::evaluate_today(Some(&account));
        if let Some(reason) = outcome.reason {
            return self.expire(account, reason).await;
        }

        let owner_key = identity.id.clone();
        let snapshot = SessionSnapshot::active(identity, account);
        self.publish(snapshot.clone());
        info!(%owner_key, "Session active");
        self.start_session_tasks(&owner_key);
        snapshot
    }

    async fn placeholder(&self, identity: &Identity) -> account::Model {
        let currency =
            account_ops::cached_currency(self.backend.database(), &self.default_currency).await;
        account_ops::placeholder_account(identity, &currency)
    }

    /// Moves to the terminal expired state and ends the provider session.
    async fn expire(&self, account: account::Model, reason: InvalidReason) -> SessionSnapshot {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let snapshot = SessionSnapshot::expired(account, reason);
        self.publish(snapshot.clone());
        warn!(
            owner_key = ?snapshot.account.as_ref().map(|a| a.owner_key.as_str()),
            %reason,
            "Account no longer valid, ending session"
        );

        if let Err(e) = self.auth.sign_out().await {
            warn!(error = %e, "Forced sign-out failed");
        }
        // May abort the task running this, so it comes last.
        self.stop_session_tasks();
        snapshot
    }

    /// Applies a freshly read account to the active session.
    async fn apply_account(&self, generation: u64, account: account::Model) {
        if !self.is_current(generation) {
            return;
        }
        let (identity, status) = {
            let state = self.state.borrow();
            (state.identity.clone(), state.status)
        };
        let Some(identity) = identity else {
            return;
        };
        if status != SessionStatus::Active || identity.id != account.owner_key {
            return;
        }

        match validity::evaluate_today(Some(&account)).reason {
            Some(reason) => {
                self.expire(account, reason).await;
            }
            None => {
                self.state.send_if_modified(|state| {
                    if state.account.as_ref() == Some(&account) && state.account_usable {
                        return false;
                    }
                    state.account = Some(account);
                    state.account_usable = true;
                    true
                });
            }
        }
    }

    /// One validity check. A check already in flight makes this a no-op.
    async fn check_validity(&self, owner_key: &str) {
        let Ok(_slot) = self.validity_slot.try_lock() else {
            debug!(%owner_key, "Validity check in flight, tick dropped");
            return;
        };
        let generation = self.current_generation();

        match account_ops::get_account_for_owner(self.backend.database(), owner_key).await {
            Ok(Some(account)) => self.apply_account(generation, account).await,
            Ok(None) => debug!(%owner_key, "No stored account to re-validate"),
            Err(e) => warn!(%owner_key, error = %e, "Validity check failed"),
        }
    }

    fn start_session_tasks(self: &Arc<Self>, owner_key: &str) {
        let poll = self.spawn_poll(owner_key.to_owned());
        let account_watch = self.spawn_account_watch(owner_key);

        let mut tasks = self.tasks();
        abort(tasks.poll.replace(poll));
        abort(tasks.account_watch.replace(account_watch));
    }

    fn spawn_poll(self: &Arc<Self>, owner_key: String) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.validity_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.check_validity(&owner_key).await;
            }
        })
    }

    fn spawn_account_watch(self: &Arc<Self>, owner_key: &str) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut subscription = self
            .backend
            .changes()
            .subscribe::<account::Model>(owner_key);

        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if event.kind == ChangeKind::Delete {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let generation = inner.current_generation();
                let _slot = inner.validity_slot.lock().await;
                inner.apply_account(generation, event.record).await;
            }
        })
    }

    fn spawn_listener(self: &Arc<Self>, mut events: broadcast::Receiver<AuthEvent>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!(lagged = count, "Auth listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_auth_event(event).await;
            }
        })
    }

    async fn handle_auth_event(self: &Arc<Self>, event: AuthEvent) {
        debug!(kind = ?event.kind, "Auth event");
        match (event.kind, event.identity) {
            (AuthEventKind::SignedOut, _) => self.clear(false),
            (kind @ (AuthEventKind::SignedIn | AuthEventKind::TokenRefreshed), Some(identity)) => {
                let already_active = {
                    let state = self.state.borrow();
                    state.status == SessionStatus::Active && state.owner_key() == Some(identity.id.as_str())
                };
                if kind == AuthEventKind::SignedIn && already_active {
                    debug!(identity_id = %identity.id, "Identity already active");
                    return;
                }

                // Events can trail a sign-out that already happened.
                let generation = self.current_generation();
                match self.auth.current_session().await {
                    Ok(Some(current)) if current.id == identity.id => {}
                    Ok(_) => {
                        debug!(identity_id = %identity.id, "Stale auth event ignored");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "Session probe failed, auth event ignored");
                        return;
                    }
                }

                let Ok(_guard) = self.load_lock.try_lock() else {
                    debug!(identity_id = %identity.id, "Identity load in flight, event skipped");
                    return;
                };
                self.load_identity(identity, generation).await;
            }
            (kind, None) => debug!(?kind, "Auth event without identity ignored"),
        }
    }
}

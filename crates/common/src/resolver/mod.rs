//! Session resolution
//!
//! Owns the resolved identity of one browser client:
//! - Bootstraps from a persisted demo identity or the backend session
//! - Resolves role, supervisor flag and school through ordered strategies
//! - Follows backend auth events for the lifetime of the client
//! - Discards resolutions overtaken by a newer auth change
//!
//! Readers get an [`IdentityHandle`]; only the resolver writes.

pub mod strategy;

pub use strategy::{Outcome, ResolveContext, RoleResolution, RoleStrategy};

use crate::backend::Backend;
use crate::config::{AppConfig, DemoConfig};
use crate::demo::{self, DemoIdentity};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::models::{AuthEvent, Profile, Role, Session, SignUpRequest, User, UserMetadata};
use crate::storage::{keys, LocalStore};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use validator::Validate;

/// Route a client lands on after signing out
pub const SIGNED_OUT_ROUTE: &str = "/";

/// Who the client is, as far as the portal knows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Identity {
    pub user: Option<User>,
    pub profile: Option<Profile>,
    #[serde(skip)]
    pub session: Option<Session>,
    pub role: Option<Role>,
    pub is_supervisor: bool,
    pub school_id: Option<String>,
    pub is_demo: bool,
    /// Strategy that produced the role, `"demo"` for demo identities
    pub role_source: Option<&'static str>,
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Best available display name
    pub fn display_name(&self) -> Option<&str> {
        self.profile
            .as_ref()
            .and_then(|p| p.full_name.as_deref())
            .or_else(|| self.user.as_ref().and_then(|u| u.user_metadata.full_name.as_deref()))
            .or_else(|| self.user.as_ref().and_then(|u| u.email.as_deref()))
    }

    fn from_demo(demo: &DemoIdentity) -> Self {
        Self {
            user: Some(demo.user.clone()),
            profile: Some(demo.profile.clone()),
            session: Some(demo.session.clone()),
            role: Some(demo.role),
            is_supervisor: false,
            school_id: Some(demo.school_id.clone()),
            is_demo: true,
            role_source: Some("demo"),
        }
    }
}

/// Identity plus whether resolution is still in flight
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityState {
    pub loading: bool,
    pub identity: Identity,
}

impl IdentityState {
    fn initial() -> Self {
        Self { loading: true, identity: Identity::default() }
    }
}

/// Read-only view of a resolver's state
#[derive(Clone)]
pub struct IdentityHandle {
    rx: watch::Receiver<IdentityState>,
}

impl IdentityHandle {
    pub fn current(&self) -> IdentityState {
        self.rx.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.rx.borrow().loading
    }

    /// Wait until resolution has finished
    pub async fn settled(&mut self) -> Identity {
        if let Ok(state) = self.rx.wait_for(|state| !state.loading).await {
            return state.identity.clone();
        }
        self.rx.borrow().identity.clone()
    }

    /// Wait for the next state change; `false` once the resolver is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-visible message (a toast in the browser)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

struct Inner {
    backend: Arc<dyn Backend>,
    store: Arc<dyn LocalStore>,
    strategies: Vec<Box<dyn RoleStrategy>>,
    demo: DemoConfig,
    state: watch::Sender<IdentityState>,
    generation: AtomicU64,
    /// Held by whoever rewrites the persisted identity keys
    keys_lock: AsyncMutex<()>,
    notices: broadcast::Sender<Notice>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.listener.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// Session and identity resolver for one browser client
#[derive(Clone)]
pub struct SessionResolver {
    inner: Arc<Inner>,
}

impl SessionResolver {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn LocalStore>,
        strategies: Vec<Box<dyn RoleStrategy>>,
        demo: DemoConfig,
    ) -> Self {
        let (state, _) = watch::channel(IdentityState::initial());
        let (notices, _) = broadcast::channel(32);

        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                strategies,
                demo,
                state,
                generation: AtomicU64::new(0),
                keys_lock: AsyncMutex::new(()),
                notices,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Resolver with strategies and demo settings from configuration
    pub fn from_config(
        backend: Arc<dyn Backend>,
        store: Arc<dyn LocalStore>,
        config: &AppConfig,
    ) -> Result<Self> {
        let strategies = strategy::from_names(&config.resolver.strategies)?;
        Ok(Self::new(backend, store, strategies, config.demo.clone()))
    }

    pub fn handle(&self) -> IdentityHandle {
        IdentityHandle { rx: self.inner.state.subscribe() }
    }

    pub fn snapshot(&self) -> IdentityState {
        self.inner.state.borrow().clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.inner.backend.clone()
    }

    pub fn store(&self) -> Arc<dyn LocalStore> {
        self.inner.store.clone()
    }

    /// Subscribe to backend auth events; idempotent
    pub fn start(&self) {
        let mut slot = self.inner.listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return;
        }

        let events = self.inner.backend.subscribe();
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(listen(weak, events)));
    }

    /// Subscribe to auth events, then restore the initial identity
    pub async fn bootstrap(&self) {
        self.start();
        self.load_session().await;
    }

    /// Restore the identity from a persisted demo flag or the backend session
    ///
    /// Never fails: errors leave an empty identity and a notice.
    pub async fn load_session(&self) {
        let generation = self.next_generation();

        if let Some((role, index)) = self.persisted_demo().await {
            match demo::synthesize(role, index) {
                Ok(demo) => {
                    debug!(role = %role, index, "Restored demo identity");
                    self.apply(generation, Identity::from_demo(&demo));
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Persisted demo identity is invalid");
                    self.forget(&keys::DEMO_KEYS).await;
                }
            }
        }

        match self.inner.backend.get_session().await {
            Ok(Some(session)) => {
                self.resolve_with(generation, session).await;
            }
            Ok(None) => {
                self.apply(generation, Identity::default());
            }
            Err(e) => {
                warn!(error = %e, "Failed to load session");
                self.notify(NoticeLevel::Warning, "We couldn't restore your session. Please sign in again.");
                self.apply(generation, Identity::default());
            }
        }
    }

    /// React to a backend auth event
    pub async fn on_auth_state_change(&self, event: AuthEvent) {
        metrics::record_auth_event(event.name());
        let demo_active = self.inner.state.borrow().identity.is_demo;
        debug!(event = event.name(), demo_active, "Auth state changed");

        match event {
            AuthEvent::SignedIn(session) => {
                if self.already_resolved(&session) || !self.is_current(&session).await {
                    return;
                }
                let generation = self.claim_for_session().await;
                self.resolve_with(generation, session).await;
            }
            AuthEvent::TokenRefreshed(session) | AuthEvent::UserUpdated(session) => {
                if demo_active || !self.is_current(&session).await {
                    return;
                }
                self.resolve_session(session).await;
            }
            AuthEvent::SignedOut => {
                if demo_active {
                    return;
                }
                // A sign-in that happened after this event still holds a session
                if let Ok(Some(_)) = self.inner.backend.get_session().await {
                    debug!("Ignoring superseded sign-out event");
                    return;
                }
                let _keys = self.inner.keys_lock.lock().await;
                if self.inner.state.borrow().identity.is_demo {
                    return;
                }
                let generation = self.next_generation();
                self.apply(generation, Identity::default());
            }
        }
    }

    /// Whether the published identity already came from `session`
    fn already_resolved(&self, session: &Session) -> bool {
        let state = self.inner.state.borrow();
        !state.loading
            && state
                .identity
                .session
                .as_ref()
                .is_some_and(|held| held.access_token == session.access_token)
    }

    /// Whether `session` is still the backend's session; events can arrive late
    async fn is_current(&self, session: &Session) -> bool {
        match self.inner.backend.get_session().await {
            Ok(Some(current)) => current.access_token == session.access_token,
            Ok(None) => {
                debug!("Ignoring auth event for a session that has ended");
                false
            }
            Err(e) => {
                debug!(error = %e, "Could not confirm session; trusting event");
                true
            }
        }
    }

    /// Re-run resolution for the current user
    ///
    /// No-op without a user or while a demo identity is active.
    pub async fn refresh_profile(&self) {
        let identity = self.snapshot().identity;
        if identity.is_demo {
            return;
        }
        let Some(session) = identity.session else {
            return;
        };
        self.resolve_session(session).await;
    }

    /// Password sign-in; failures also surface as an error notice
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        match self.inner.backend.sign_in_with_password(email, password).await {
            Ok(session) => {
                metrics::record_auth_call("sign_in", true);
                info!(user_id = %session.user.id, "Signed in");
                let generation = self.claim_for_session().await;
                Ok(self.resolve_with(generation, session).await)
            }
            Err(e) => {
                metrics::record_auth_call("sign_in", false);
                warn!(error = %e, "Sign-in failed");
                let message = match e {
                    AppError::InvalidCredentials => "Invalid email or password.".to_string(),
                    ref other => format!("Sign-in failed: {}", other),
                };
                self.notify(NoticeLevel::Error, message);
                Err(e)
            }
        }
    }

    /// Register an account
    ///
    /// `None` when the backend requires email confirmation before a session exists.
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<Option<Identity>> {
        request.validate()?;

        match self.inner.backend.sign_up(&request).await {
            Ok(Some(session)) => {
                metrics::record_auth_call("sign_up", true);
                info!(user_id = %session.user.id, "Signed up");
                let generation = self.claim_for_session().await;
                Ok(Some(self.resolve_with(generation, session).await))
            }
            Ok(None) => {
                metrics::record_auth_call("sign_up", true);
                self.notify(NoticeLevel::Info, "Check your email to confirm your account.");
                Ok(None)
            }
            Err(e) => {
                metrics::record_auth_call("sign_up", false);
                warn!(error = %e, "Sign-up failed");
                self.notify(NoticeLevel::Error, format!("Sign-up failed: {}", e));
                Err(e)
            }
        }
    }

    /// End the session, clear persisted keys and return the landing route
    ///
    /// The backend is always signed out: a real session may still be held
    /// behind a demo identity.
    pub async fn sign_out(&self) -> &'static str {
        let was_demo = {
            let _keys = self.inner.keys_lock.lock().await;
            let generation = self.next_generation();
            let was_demo = self.inner.state.borrow().identity.is_demo;
            self.forget(&keys::SESSION_KEYS).await;
            self.apply(generation, Identity::default());
            was_demo
        };

        self.end_backend_session().await;
        info!(demo = was_demo, "Signed out");
        SIGNED_OUT_ROUTE
    }

    /// Activate the demo identity for `role` and `index`
    pub async fn set_test_user(&self, role: Role, index: u32) -> Result<Identity> {
        if !self.inner.demo.enabled {
            return Err(AppError::DemoDisabled);
        }
        if index > self.inner.demo.max_index {
            return Err(AppError::Validation {
                message: format!("demo index must be at most {}", self.inner.demo.max_index),
                field: Some("index".to_string()),
            });
        }

        let demo = demo::synthesize(role, index)?;
        let identity = Identity::from_demo(&demo);

        // The demo identity replaces a real account rather than hiding it
        let holds_real_session = {
            let state = self.inner.state.borrow();
            !state.identity.is_demo && state.identity.session.is_some()
        };
        if holds_real_session {
            self.end_backend_session().await;
        }

        {
            let _keys = self.inner.keys_lock.lock().await;
            let generation = self.next_generation();
            if !self.apply(generation, identity.clone()) {
                debug!(role = %role, index, "Demo login overtaken by a newer change");
                return Ok(self.snapshot().identity);
            }

            // Flag last: a concurrent load that sees it must also see role and index
            self.persist(keys::DEMO_ROLE, role.as_str()).await;
            self.persist(keys::DEMO_INDEX, &index.to_string()).await;
            self.persist(keys::DEMO_FLAG, "true").await;
            self.remember_active(&identity).await;
        }

        metrics::record_demo_login(role.as_str());
        info!(role = %role, index, "Demo identity active");

        if self.inner.demo.seed_data {
            let backend = self.inner.backend.clone();
            tokio::spawn(async move {
                if let Err(e) = demo::seed(backend.as_ref(), &demo).await {
                    debug!(user_id = %demo.user.id, error = %e, "Demo data seeding failed");
                }
            });
        }

        Ok(identity)
    }

    /// Update the signed-in user's metadata and re-resolve
    pub async fn update_user_metadata(&self, metadata: UserMetadata) -> Result<Identity> {
        let identity = self.snapshot().identity;
        if identity.is_demo {
            return Err(AppError::Forbidden {
                message: "Demo accounts cannot be edited".to_string(),
            });
        }
        let Some(mut session) = identity.session else {
            return Err(AppError::Unauthorized {
                message: "Not signed in".to_string(),
            });
        };

        session.user = self.inner.backend.update_user(&metadata).await?;
        Ok(self.resolve_session(session).await)
    }

    /// Generation for a real session; any demo identity keys are dropped
    async fn claim_for_session(&self) -> u64 {
        let _keys = self.inner.keys_lock.lock().await;
        self.forget(&keys::DEMO_KEYS).await;
        self.next_generation()
    }

    async fn end_backend_session(&self) {
        match self.inner.backend.sign_out().await {
            Ok(()) => metrics::record_auth_call("sign_out", true),
            Err(e) => {
                metrics::record_auth_call("sign_out", false);
                warn!(error = %e, "Backend sign-out failed; clearing local state anyway");
            }
        }
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publish `identity` unless a newer generation has started
    fn apply(&self, generation: u64, identity: Identity) -> bool {
        let latest = &self.inner.generation;
        self.inner.state.send_if_modified(|state| {
            if latest.load(Ordering::SeqCst) != generation {
                return false;
            }
            state.loading = false;
            state.identity = identity;
            true
        })
    }

    async fn resolve_session(&self, session: Session) -> Identity {
        let generation = self.next_generation();
        self.resolve_with(generation, session).await
    }

    async fn resolve_with(&self, generation: u64, session: Session) -> Identity {
        let started = Instant::now();
        let identity = self.resolve(session).await;
        let applied = self.apply(generation, identity.clone());

        metrics::record_resolution(
            started.elapsed().as_secs_f64(),
            identity.role_source.unwrap_or("none"),
            applied,
        );

        if applied {
            self.remember_active(&identity).await;
        } else {
            debug!(generation, user_id = ?identity.user_id(), "Discarded stale resolution");
        }
        identity
    }

    async fn resolve(&self, session: Session) -> Identity {
        let user = session.user.clone();

        let profile = match self.inner.backend.fetch_profile(&user.id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Profile lookup failed; continuing without it");
                self.notify(NoticeLevel::Warning, "We couldn't load your profile. Some details may be missing.");
                None
            }
        };

        let ctx = ResolveContext {
            backend: self.inner.backend.as_ref(),
            user: &user,
            profile: profile.as_ref(),
        };

        let mut resolved = None;
        for strategy in &self.inner.strategies {
            match strategy.resolve(&ctx).await {
                Ok(Outcome::Resolved(resolution)) => {
                    resolved = Some((strategy.name(), resolution));
                    break;
                }
                Ok(Outcome::Next) => {}
                Err(e) => {
                    warn!(strategy = strategy.name(), user_id = %user.id, error = %e, "Role strategy failed");
                }
            }
        }

        let metadata = &user.user_metadata;
        let (role_source, role, is_supervisor, resolved_school) = match resolved {
            Some((name, r)) => (Some(name), Some(r.role), r.is_supervisor, r.school_id),
            None => {
                debug!(user_id = %user.id, "No role found for user");
                (None, None, false, None)
            }
        };
        let school_id = resolved_school
            .or_else(|| profile.as_ref().and_then(Profile::school_ref))
            .or_else(|| metadata.school_id.clone())
            .or_else(|| metadata.school_code.clone());

        Identity {
            user: Some(user),
            profile,
            session: Some(session),
            role,
            is_supervisor,
            school_id,
            is_demo: false,
            role_source,
        }
    }

    /// Role and index of a persisted demo identity, if one is usable
    async fn persisted_demo(&self) -> Option<(Role, u32)> {
        let store = &self.inner.store;
        let flag = store.get(keys::DEMO_FLAG).await.ok().flatten()?;
        if flag != "true" {
            return None;
        }
        if !self.inner.demo.enabled {
            info!("Demo identities are disabled; dropping persisted demo flag");
            self.forget(&keys::DEMO_KEYS).await;
            return None;
        }

        let role = store
            .get(keys::DEMO_ROLE)
            .await
            .ok()
            .flatten()
            .and_then(|label| Role::from_label(&label));
        let index = store
            .get(keys::DEMO_INDEX)
            .await
            .ok()
            .flatten()
            .and_then(|text| text.parse::<u32>().ok())
            .unwrap_or(0);

        match role {
            Some(role) if index <= self.inner.demo.max_index => Some((role, index)),
            _ => {
                warn!(index, "Persisted demo identity is unusable; clearing it");
                self.forget(&keys::DEMO_KEYS).await;
                None
            }
        }
    }

    async fn remember_active(&self, identity: &Identity) {
        if let Some(role) = identity.role {
            self.persist(keys::LAST_ACTIVE_ROLE, role.as_str()).await;
        }
        if let Some(school_id) = &identity.school_id {
            self.persist(keys::LAST_ACTIVE_SCHOOL, school_id).await;
        }
    }

    async fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.inner.store.set(key, value).await {
            warn!(key = key, error = %e, "Failed to persist value");
        }
    }

    async fn forget(&self, keys: &[&str]) {
        for key in keys {
            if let Err(e) = self.inner.store.remove(key).await {
                warn!(key = key, error = %e, "Failed to remove persisted value");
            }
        }
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        // No subscribers is fine
        let _ = self.inner.notices.send(Notice { level, message: message.into() });
    }
}

async fn listen(weak: Weak<Inner>, mut events: broadcast::Receiver<AuthEvent>) {
    loop {
        let received = events.recv().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let resolver = SessionResolver { inner };

        match received {
            Ok(event) => resolver.on_auth_state_change(event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Auth events lagged; reloading session");
                resolver.load_session().await;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

//! In-memory backend for tests and offline demos

use super::{Backend, SessionCache};
use crate::errors::{AppError, Result};
use crate::models::{AuthEvent, Profile, RoleAssignment, Session, SignUpRequest, User, UserMetadata};
use crate::storage::LocalStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Backend whose tables, accounts and procedures live in memory
pub struct MockBackend {
    accounts: Mutex<HashMap<String, (String, User)>>,
    profiles: Mutex<HashMap<String, Profile>>,
    role_assignments: Mutex<HashMap<String, RoleAssignment>>,
    rpc_results: Mutex<HashMap<String, serde_json::Value>>,
    rpc_failures: Mutex<HashMap<String, u32>>,
    rpc_calls: Mutex<Vec<(String, serde_json::Value)>>,
    session: Mutex<Option<Session>>,
    persisted: SessionCache,
    profile_delays: Mutex<HashMap<String, Duration>>,
    rpc_delay: Mutex<Option<Duration>>,
    fail_profiles: AtomicBool,
    fail_role_tables: AtomicBool,
    get_session_calls: AtomicUsize,
    sign_in_calls: AtomicUsize,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            accounts: Mutex::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
            role_assignments: Mutex::new(HashMap::new()),
            rpc_results: Mutex::new(HashMap::new()),
            rpc_failures: Mutex::new(HashMap::new()),
            rpc_calls: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            persisted: SessionCache::default(),
            profile_delays: Mutex::new(HashMap::new()),
            rpc_delay: Mutex::new(None),
            fail_profiles: AtomicBool::new(false),
            fail_role_tables: AtomicBool::new(false),
            get_session_calls: AtomicUsize::new(0),
            sign_in_calls: AtomicUsize::new(0),
            events,
        }
    }

    /// Register credentials for a user
    pub fn with_account(self, email: &str, password: &str, user: User) -> Self {
        lock(&self.accounts).insert(email.to_string(), (password.to_string(), user));
        self
    }

    pub fn with_profile(self, profile: Profile) -> Self {
        lock(&self.profiles).insert(profile.id.clone(), profile);
        self
    }

    pub fn with_role_assignment(self, user_id: &str, assignment: RoleAssignment) -> Self {
        lock(&self.role_assignments).insert(user_id.to_string(), assignment);
        self
    }

    /// Canned result for a remote procedure
    pub fn with_rpc(self, function: &str, result: serde_json::Value) -> Self {
        lock(&self.rpc_results).insert(function.to_string(), result);
        self
    }

    /// A session the backend already holds, as after a page reload
    pub fn with_session(self, session: Session) -> Self {
        *lock(&self.session) = Some(session);
        self
    }

    /// Mirror the session into `store`, as the hosted client does
    pub fn with_session_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.persisted = SessionCache::new(store);
        self
    }

    async fn hold(&self, session: Option<Session>) {
        self.persisted.save(session.as_ref()).await;
        *lock(&self.session) = session;
    }

    /// Make the next `count` calls to `function` fail with a transient error
    pub fn fail_rpc(&self, function: &str, count: u32) {
        lock(&self.rpc_failures).insert(function.to_string(), count);
    }

    /// Make profile lookups fail
    pub fn fail_profiles(&self, fail: bool) {
        self.fail_profiles.store(fail, Ordering::SeqCst);
    }

    /// Make role-table lookups fail
    pub fn fail_role_tables(&self, fail: bool) {
        self.fail_role_tables.store(fail, Ordering::SeqCst);
    }

    /// Delay profile lookups for one user
    pub fn delay_profile(&self, user_id: &str, delay: Duration) {
        lock(&self.profile_delays).insert(user_id.to_string(), delay);
    }

    /// Delay every remote procedure call
    pub fn delay_rpc(&self, delay: Option<Duration>) {
        *lock(&self.rpc_delay) = delay;
    }

    /// Replace a stored profile
    pub fn put_profile(&self, profile: Profile) {
        lock(&self.profiles).insert(profile.id.clone(), profile);
    }

    /// Publish an auth event as the hosted client would
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub fn get_session_calls(&self) -> usize {
        self.get_session_calls.load(Ordering::SeqCst)
    }

    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    /// Remote procedure calls made so far, in order
    pub fn rpc_calls(&self) -> Vec<(String, serde_json::Value)> {
        lock(&self.rpc_calls).clone()
    }

    /// Session token format issued by this backend
    pub fn session_for(user: User) -> Session {
        Session {
            access_token: format!("mock-token-{}", user.id),
            refresh_token: Some(format!("mock-refresh-{}", user.id)),
            expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
            user,
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        let held = lock(&self.session).clone();
        if held.is_some() {
            return Ok(held);
        }

        let restored = self.persisted.load().await;
        if restored.is_some() {
            *lock(&self.session) = restored.clone();
        }
        Ok(restored)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);

        let user = match lock(&self.accounts).get(email) {
            Some((expected, user)) if expected == password => user.clone(),
            _ => return Err(AppError::InvalidCredentials),
        };

        let session = Self::session_for(user);
        self.hold(Some(session.clone())).await;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<Option<Session>> {
        if lock(&self.accounts).contains_key(&request.email) {
            return Err(AppError::Backend {
                status: 422,
                message: "User already registered".to_string(),
            });
        }

        let user = User {
            id: format!("user-{}", uuid::Uuid::new_v4()),
            email: Some(request.email.clone()),
            user_metadata: request.metadata(),
        };
        lock(&self.accounts).insert(request.email.clone(), (request.password.clone(), user.clone()));

        let session = Self::session_for(user);
        self.hold(Some(session.clone())).await;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<()> {
        self.hold(None).await;
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn update_user(&self, metadata: &UserMetadata) -> Result<User> {
        let updated = {
            let mut held = lock(&self.session);
            let Some(session) = held.as_mut() else {
                return Err(AppError::Unauthorized {
                    message: "No active session".to_string(),
                });
            };
            session.user.user_metadata = metadata.clone();
            session.clone()
        };
        self.persisted.save(Some(&updated)).await;

        self.emit(AuthEvent::UserUpdated(updated.clone()));
        Ok(updated.user)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let delay = lock(&self.profile_delays).get(user_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(AppError::Backend {
                status: 500,
                message: "profiles unavailable".to_string(),
            });
        }

        Ok(lock(&self.profiles).get(user_id).cloned())
    }

    async fn fetch_role_assignment(&self, user_id: &str) -> Result<Option<RoleAssignment>> {
        if self.fail_role_tables.load(Ordering::SeqCst) {
            return Err(AppError::Backend {
                status: 500,
                message: "role tables unavailable".to_string(),
            });
        }

        Ok(lock(&self.role_assignments).get(user_id).cloned())
    }

    async fn rpc(&self, function: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        lock(&self.rpc_calls).push((function.to_string(), params));

        let delay = *lock(&self.rpc_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = {
            let mut failures = lock(&self.rpc_failures);
            match failures.get_mut(function) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(AppError::ServiceUnavailable {
                message: format!("{} temporarily unavailable", function),
            });
        }

        lock(&self.rpc_results)
            .get(function)
            .cloned()
            .ok_or_else(|| AppError::Backend {
                status: 404,
                message: format!("function {} not found", function),
            })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

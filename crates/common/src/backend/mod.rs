//! Hosted backend abstraction
//!
//! The portal owns no data: sessions, tables and procedures live in a hosted
//! backend-as-a-service. This module provides:
//! - The `Backend` trait (credential API, table lookups, RPC, auth events)
//! - `HostedBackend`, the REST client used in production
//! - `MockBackend`, an in-memory backend for tests and offline demos
//! - Typed wrappers for the remote procedures the portal calls

mod hosted;
mod mock;
pub mod rpc;

pub use hosted::HostedBackend;
pub use mock::MockBackend;

use crate::errors::Result;
use crate::models::{AuthEvent, Profile, RoleAssignment, Session, SignUpRequest, User, UserMetadata};
use crate::storage::{self, keys, LocalStore};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Trait for the hosted backend a client talks to
#[async_trait]
pub trait Backend: Send + Sync {
    /// Current session held by the client, refreshed if expired
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Exchange credentials for a session
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    /// Register a user; `None` when e-mail confirmation is pending
    async fn sign_up(&self, request: &SignUpRequest) -> Result<Option<Session>>;

    /// End the current session
    async fn sign_out(&self) -> Result<()>;

    /// Replace the current user's metadata
    async fn update_user(&self, metadata: &UserMetadata) -> Result<User>;

    /// Subscribe to auth state changes
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Profile row (with organization join) for a user
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    /// Role row from the teacher/student tables for a user
    async fn fetch_role_assignment(&self, user_id: &str) -> Result<Option<RoleAssignment>>;

    /// Call a remote procedure
    async fn rpc(&self, function: &str, params: serde_json::Value) -> Result<serde_json::Value>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;
}

/// Creates one backend client per browser client, given that client's store
pub type BackendFactory = Arc<dyn Fn(Arc<dyn LocalStore>) -> Arc<dyn Backend> + Send + Sync>;

/// Persisted copy of a client's backend session
///
/// Lets a rebuilt client object pick up where the previous one left off,
/// as the platform's browser SDK does with local storage.
#[derive(Clone, Default)]
pub struct SessionCache {
    store: Option<Arc<dyn LocalStore>>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store: Some(store) }
    }

    pub async fn load(&self) -> Option<Session> {
        let store = self.store.as_ref()?;
        storage::get_json(store.as_ref(), keys::AUTH_SESSION).await
    }

    pub async fn save(&self, session: Option<&Session>) {
        let Some(store) = &self.store else {
            return;
        };
        let result = match session {
            Some(session) => storage::set_json(store.as_ref(), keys::AUTH_SESSION, session).await,
            None => store.remove(keys::AUTH_SESSION).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist backend session");
        }
    }
}

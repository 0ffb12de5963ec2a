//! REST client for the hosted backend
//!
//! Speaks the hosted platform's HTTP API: `/auth/v1` for credentials and
//! sessions, `/rest/v1` for table reads and `/rest/v1/rpc` for procedures.
//! The client keeps its own copy of the session, like the platform's
//! browser SDK, mirrors it into the client's store and publishes auth state
//! changes on a broadcast channel.

use super::{Backend, SessionCache};
use crate::config::BackendConfig;
use crate::errors::{AppError, Result};
use crate::models::{AuthEvent, Profile, Role, RoleAssignment, Session, SignUpRequest, User, UserMetadata};
use crate::retry::RetryPolicy;
use crate::storage::LocalStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::RequestBuilder;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

const PROFILE_SELECT: &str = "*,organization:organizations(id,name,code)";

/// Token endpoint response
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs)));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Row shape shared by the teacher and student role tables
#[derive(Deserialize)]
struct RoleRow {
    #[serde(default)]
    school_id: Option<String>,
    #[serde(default)]
    is_supervisor: Option<bool>,
}

/// Hosted backend client
pub struct HostedBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    profile_table: String,
    teacher_table: String,
    student_table: String,
    retry: RetryPolicy,
    session: RwLock<Option<Session>>,
    persisted: SessionCache,
    events: broadcast::Sender<AuthEvent>,
}

impl HostedBackend {
    /// Create a new client with its own connection pool
    pub fn new(config: &BackendConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self::with_client(client, config, retry))
    }

    /// Create a client sharing an existing connection pool
    pub fn with_client(client: reqwest::Client, config: &BackendConfig, retry: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            profile_table: config.profile_table.clone(),
            teacher_table: config.teacher_table.clone(),
            student_table: config.student_table.clone(),
            retry,
            session: RwLock::new(None),
            persisted: SessionCache::default(),
            events,
        }
    }

    /// Keep the session in `store` so a rebuilt client restores it
    pub fn with_session_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.persisted = SessionCache::new(store);
        self
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    /// Bearer token: the user's access token when signed in, else the anon key
    async fn bearer(&self) -> String {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn with_keys(&self, request: RequestBuilder, bearer: &str) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    /// Send a request and decode a JSON body; empty bodies decode as `null`
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(AppError::from_backend_status(status.as_u16(), body));
        }

        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        Ok(serde_json::from_str(body)?)
    }

    fn emit(&self, event: AuthEvent) {
        debug!(event = event.name(), "Publishing auth state change");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn store_session(&self, session: Option<Session>) {
        self.persisted.save(session.as_ref()).await;
        *self.session.write().await = session;
    }

    /// Held session, falling back to the persisted copy
    async fn held_session(&self) -> Option<Session> {
        if let Some(session) = self.session.read().await.clone() {
            return Some(session);
        }

        let restored = self.persisted.load().await?;
        debug!(user_id = %restored.user.id, "Restored persisted session");
        *self.session.write().await = Some(restored.clone());
        Some(restored)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let request = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));

        let tokens: TokenResponse = self.send_json(self.with_keys(request, &self.anon_key)).await?;
        Ok(tokens.into_session())
    }

    /// Single table read
    async fn select_once<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        let bearer = self.bearer().await;
        let request = self.client.get(self.rest_url(table)).query(query);
        self.send_json(self.with_keys(request, &bearer)).await
    }

    /// Table read with the transient-failure retry policy applied
    async fn select<T: DeserializeOwned>(&self, operation: &str, table: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        self.retry.run(operation, || self.select_once(table, query)).await
    }

    async fn role_row(&self, table: &str, user_id: &str, select: &str) -> Result<Option<RoleRow>> {
        let query = [
            ("user_id", format!("eq.{}", user_id)),
            ("select", select.to_string()),
            ("limit", "1".to_string()),
        ];
        let rows: Vec<RoleRow> = self.select("fetch_role_assignment", table, &query).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl Backend for HostedBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        let Some(session) = self.held_session().await else {
            return Ok(None);
        };

        if !session.is_expired() {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            self.store_session(None).await;
            self.emit(AuthEvent::SignedOut);
            return Ok(None);
        };

        match self.refresh(&refresh_token).await {
            Ok(fresh) => {
                self.store_session(Some(fresh.clone())).await;
                self.emit(AuthEvent::TokenRefreshed(fresh.clone()));
                Ok(Some(fresh))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(error = %e, "Session refresh rejected, signing out locally");
                self.store_session(None).await;
                self.emit(AuthEvent::SignedOut);
                Ok(None)
            }
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let request = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));

        let tokens: TokenResponse = self.send_json(self.with_keys(request, &self.anon_key)).await?;
        let session = tokens.into_session();

        self.store_session(Some(session.clone())).await;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<Option<Session>> {
        let body = json!({
            "email": request.email,
            "password": request.password,
            "data": request.metadata(),
        });
        let http = self.client.post(self.auth_url("signup")).json(&body);

        let response: serde_json::Value = self.send_json(self.with_keys(http, &self.anon_key)).await?;
        if response.get("access_token").is_none() {
            debug!(email = %request.email, "Sign-up pending e-mail confirmation");
            return Ok(None);
        }

        let session = serde_json::from_value::<TokenResponse>(response)?.into_session();
        self.store_session(Some(session.clone())).await;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<()> {
        let held = self.held_session().await;

        let result = match held {
            Some(session) => {
                let request = self.client.post(self.auth_url("logout"));
                self.send_json::<serde_json::Value>(self.with_keys(request, &session.access_token))
                    .await
                    .map(|_| ())
            }
            None => Ok(()),
        };

        // Local sign-out happens even when the remote call fails
        self.store_session(None).await;
        self.emit(AuthEvent::SignedOut);
        result
    }

    async fn update_user(&self, metadata: &UserMetadata) -> Result<User> {
        let held = self.held_session().await;
        let Some(mut session) = held else {
            return Err(AppError::Unauthorized {
                message: "No active session".to_string(),
            });
        };

        let request = self
            .client
            .put(self.auth_url("user"))
            .json(&json!({ "data": metadata }));
        let user: User = self.send_json(self.with_keys(request, &session.access_token)).await?;

        session.user = user.clone();
        self.store_session(Some(session.clone())).await;
        self.emit(AuthEvent::UserUpdated(session));
        Ok(user)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let query = [
            ("id", format!("eq.{}", user_id)),
            ("select", PROFILE_SELECT.to_string()),
            ("limit", "1".to_string()),
        ];
        let rows: Vec<Profile> = self.select("fetch_profile", &self.profile_table, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_role_assignment(&self, user_id: &str) -> Result<Option<RoleAssignment>> {
        if let Some(row) = self.role_row(&self.teacher_table, user_id, "school_id,is_supervisor").await? {
            return Ok(Some(RoleAssignment {
                role: Role::Teacher,
                is_supervisor: row.is_supervisor.unwrap_or(false),
                school_id: row.school_id,
            }));
        }

        if let Some(row) = self.role_row(&self.student_table, user_id, "school_id").await? {
            return Ok(Some(RoleAssignment {
                role: Role::Student,
                is_supervisor: false,
                school_id: row.school_id,
            }));
        }

        Ok(None)
    }

    async fn rpc(&self, function: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let bearer = self.bearer().await;
        let request = self
            .client
            .post(self.rest_url(&format!("rpc/{}", function)))
            .json(&params);
        self.send_json(self.with_keys(request, &bearer)).await
    }

    async fn ping(&self) -> Result<()> {
        let request = self.client.get(self.auth_url("health"));
        self.send_json::<serde_json::Value>(self.with_keys(request, &self.anon_key))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_expiry_from_timestamp() {
        let tokens: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_at": 4_102_444_800i64,
            "user": { "id": "u1" }
        }))
        .unwrap();

        let session = tokens.into_session();
        assert_eq!(session.expires_at.unwrap().timestamp(), 4_102_444_800);
        assert!(!session.is_expired());
    }

    #[test]
    fn test_token_response_expiry_from_lifetime() {
        let tokens: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "expires_in": -5,
            "user": { "id": "u1", "user_metadata": { "user_type": "teacher" } }
        }))
        .unwrap();

        let session = tokens.into_session();
        assert!(session.is_expired());
        assert_eq!(session.user.user_metadata.declared_role(), Some(Role::Teacher));
    }

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let config = BackendConfig {
            url: "https://school.example.co/".to_string(),
            ..BackendConfig::default()
        };
        let backend = HostedBackend::with_client(reqwest::Client::new(), &config, RetryPolicy::none());
        assert_eq!(backend.auth_url("token"), "https://school.example.co/auth/v1/token");
        assert_eq!(backend.rest_url("rpc/seed_demo_data"), "https://school.example.co/rest/v1/rpc/seed_demo_data");
    }

    #[tokio::test]
    async fn test_session_restored_from_store() {
        use crate::storage::{keys, MemoryStore};

        let store = Arc::new(MemoryStore::new());
        let session = Session {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
            user: serde_json::from_value(json!({ "id": "u1" })).unwrap(),
        };
        SessionCache::new(store.clone()).save(Some(&session)).await;

        let backend = HostedBackend::with_client(reqwest::Client::new(), &BackendConfig::default(), RetryPolicy::none())
            .with_session_store(store.clone());
        let restored = backend.get_session().await.unwrap().unwrap();
        assert_eq!(restored.user.id, "u1");
        assert_eq!(backend.bearer().await, "a");

        backend.store_session(None).await;
        assert_eq!(store.get(keys::AUTH_SESSION).await.unwrap(), None);
        assert!(backend.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_session_without_sign_in() {
        let backend = HostedBackend::with_client(reqwest::Client::new(), &BackendConfig::default(), RetryPolicy::none());
        assert!(backend.get_session().await.unwrap().is_none());
        assert!(backend.update_user(&UserMetadata::default()).await.is_err());
    }
}

//! Backend-issued session, user identity and auth state notifications

use crate::models::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use validator::Validate;

/// Proof of authentication held client-side.
///
/// Owned by the backend; the client only caches it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(skip_serializing)]
    pub access_token: String,

    #[serde(default, skip_serializing)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    pub user: User,
}

impl Session {
    /// Check if the session is past its expiry
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// User identity attached to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub user_metadata: UserMetadata,
}

/// Free-form metadata the backend stores alongside the user.
///
/// Writers disagree on key names, so deserialization accepts the
/// camelCase and legacy spellings and keeps one canonical field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMetadata")]
pub struct UserMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Declared role label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_supervisor: Option<bool>,

    /// Keys this client does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawMetadata {
    full_name: Option<String>,
    #[serde(rename = "fullName")]
    full_name_camel: Option<String>,
    name: Option<String>,
    user_type: Option<String>,
    #[serde(rename = "userType")]
    user_type_camel: Option<String>,
    role: Option<String>,
    school_code: Option<String>,
    #[serde(rename = "schoolCode")]
    school_code_camel: Option<String>,
    school_name: Option<String>,
    #[serde(rename = "schoolName")]
    school_name_camel: Option<String>,
    school_id: Option<String>,
    #[serde(rename = "schoolId")]
    school_id_camel: Option<String>,
    is_supervisor: Option<bool>,
    #[serde(rename = "isSupervisor")]
    is_supervisor_camel: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawMetadata> for UserMetadata {
    fn from(raw: RawMetadata) -> Self {
        Self {
            full_name: raw.full_name.or(raw.full_name_camel).or(raw.name),
            user_type: raw.user_type.or(raw.user_type_camel).or(raw.role),
            school_code: raw.school_code.or(raw.school_code_camel),
            school_name: raw.school_name.or(raw.school_name_camel),
            school_id: raw.school_id.or(raw.school_id_camel),
            is_supervisor: raw.is_supervisor.or(raw.is_supervisor_camel),
            extra: raw.extra,
        }
    }
}

impl UserMetadata {
    /// Role declared in metadata, if it parses
    pub fn declared_role(&self) -> Option<Role> {
        self.user_type.as_deref().and_then(Role::from_label)
    }

    /// Supervisor flag, either explicit or implied by the role label
    pub fn declares_supervisor(&self) -> bool {
        self.is_supervisor.unwrap_or(false)
            || self.user_type.as_deref().map(Role::label_implies_supervisor).unwrap_or(false)
    }
}

/// Push notification from the backend client
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "signed_in",
            AuthEvent::SignedOut => "signed_out",
            AuthEvent::TokenRefreshed(_) => "token_refreshed",
            AuthEvent::UserUpdated(_) => "user_updated",
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthEvent::SignedIn(s) | AuthEvent::TokenRefreshed(s) | AuthEvent::UserUpdated(s) => Some(s),
            AuthEvent::SignedOut => None,
        }
    }
}

/// Registration form
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignUpRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 6, max = 128))]
    pub password: String,

    #[validate(length(min = 1, max = 200))]
    pub full_name: String,

    pub role: Role,

    #[serde(default)]
    pub school_code: Option<String>,
}

impl SignUpRequest {
    /// Metadata stored with the new user
    pub fn metadata(&self) -> UserMetadata {
        UserMetadata {
            full_name: Some(self.full_name.clone()),
            user_type: Some(self.role.as_str().to_string()),
            school_code: self.school_code.clone(),
            ..UserMetadata::default()
        }
    }
}

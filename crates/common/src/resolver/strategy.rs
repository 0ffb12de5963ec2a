//! Role resolution strategies
//!
//! Each strategy looks at one source of role information and either
//! resolves the role or defers to the next strategy in the list.

use crate::backend::{rpc, Backend};
use crate::errors::{AppError, Result};
use crate::models::{Profile, Role, User};
use async_trait::async_trait;

/// Inputs shared by every strategy in one resolution
pub struct ResolveContext<'a> {
    pub backend: &'a dyn Backend,
    pub user: &'a User,
    /// Profile row, when the lookup succeeded and found one
    pub profile: Option<&'a Profile>,
}

/// Role, supervisor flag and school found by a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleResolution {
    pub role: Role,
    pub is_supervisor: bool,
    pub school_id: Option<String>,
}

/// Result of one strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Resolved(RoleResolution),
    /// Nothing found here; try the next strategy
    Next,
}

/// One named source of role information
#[async_trait]
pub trait RoleStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Outcome>;
}

/// Role column of the profile row
pub struct ProfileTable;

#[async_trait]
impl RoleStrategy for ProfileTable {
    fn name(&self) -> &'static str {
        "profile_table"
    }

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Outcome> {
        let Some(profile) = ctx.profile else {
            return Ok(Outcome::Next);
        };
        Ok(match profile.role() {
            Some(role) => Outcome::Resolved(RoleResolution {
                role,
                is_supervisor: profile.is_supervisor(),
                school_id: profile.school_ref(),
            }),
            None => Outcome::Next,
        })
    }
}

/// Teacher and student role tables
pub struct RoleTable;

#[async_trait]
impl RoleStrategy for RoleTable {
    fn name(&self) -> &'static str {
        "role_table"
    }

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Outcome> {
        Ok(match ctx.backend.fetch_role_assignment(&ctx.user.id).await? {
            Some(assignment) => Outcome::Resolved(RoleResolution {
                role: assignment.role,
                is_supervisor: assignment.is_supervisor,
                school_id: assignment.school_id,
            }),
            None => Outcome::Next,
        })
    }
}

/// Role-lookup procedure; the highest-ranked role wins
pub struct RoleRpc;

#[async_trait]
impl RoleStrategy for RoleRpc {
    fn name(&self) -> &'static str {
        "role_rpc"
    }

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Outcome> {
        let roles = rpc::user_roles(ctx.backend, &ctx.user.id).await?;
        let is_supervisor = roles.iter().any(|r| r.is_supervisor);

        Ok(match roles.into_iter().max_by_key(|r| r.role.precedence()) {
            Some(best) => Outcome::Resolved(RoleResolution {
                role: best.role,
                is_supervisor,
                school_id: best.school_id,
            }),
            None => Outcome::Next,
        })
    }
}

/// Role declared in the session's user metadata
pub struct SessionMetadata;

#[async_trait]
impl RoleStrategy for SessionMetadata {
    fn name(&self) -> &'static str {
        "session_metadata"
    }

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Outcome> {
        let metadata = &ctx.user.user_metadata;
        Ok(match metadata.declared_role() {
            Some(role) => Outcome::Resolved(RoleResolution {
                role,
                is_supervisor: metadata.declares_supervisor(),
                school_id: metadata.school_id.clone().or_else(|| metadata.school_code.clone()),
            }),
            None => Outcome::Next,
        })
    }
}

/// Look up a strategy by its configured name
pub fn by_name(name: &str) -> Result<Box<dyn RoleStrategy>> {
    match name {
        "profile_table" => Ok(Box::new(ProfileTable)),
        "role_table" => Ok(Box::new(RoleTable)),
        "role_rpc" => Ok(Box::new(RoleRpc)),
        "session_metadata" => Ok(Box::new(SessionMetadata)),
        other => Err(AppError::Configuration {
            message: format!("unknown role strategy '{}'", other),
        }),
    }
}

/// Build the ordered strategy list from configuration
pub fn from_names(names: &[String]) -> Result<Vec<Box<dyn RoleStrategy>>> {
    if names.is_empty() {
        return Err(AppError::Configuration {
            message: "at least one role strategy is required".to_string(),
        });
    }
    names.iter().map(|name| by_name(name)).collect()
}

/// Profile table, role table, role procedure, then session metadata
pub fn default_strategies() -> Vec<Box<dyn RoleStrategy>> {
    vec![
        Box::new(ProfileTable),
        Box::new(RoleTable),
        Box::new(RoleRpc),
        Box::new(SessionMetadata),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::models::{RoleAssignment, UserMetadata};
    use serde_json::json;

    fn user(user_type: Option<&str>) -> User {
        User {
            id: "u1".to_string(),
            email: None,
            user_metadata: UserMetadata {
                user_type: user_type.map(String::from),
                school_code: Some("META1".to_string()),
                ..UserMetadata::default()
            },
        }
    }

    #[tokio::test]
    async fn test_profile_without_role_defers() {
        let backend = MockBackend::new();
        let user = user(None);
        let profile = Profile { id: "u1".into(), ..Profile::default() };
        let ctx = ResolveContext { backend: &backend, user: &user, profile: Some(&profile) };

        assert_eq!(ProfileTable.resolve(&ctx).await.unwrap(), Outcome::Next);
    }

    #[tokio::test]
    async fn test_role_table_assignment() {
        let backend = MockBackend::new().with_role_assignment(
            "u1",
            RoleAssignment { role: Role::Teacher, is_supervisor: true, school_id: Some("s-9".into()) },
        );
        let user = user(None);
        let ctx = ResolveContext { backend: &backend, user: &user, profile: None };

        let Outcome::Resolved(resolution) = RoleTable.resolve(&ctx).await.unwrap() else {
            panic!("expected a resolution");
        };
        assert_eq!(resolution.role, Role::Teacher);
        assert!(resolution.is_supervisor);
        assert_eq!(resolution.school_id.as_deref(), Some("s-9"));
    }

    #[tokio::test]
    async fn test_role_rpc_prefers_highest_rank() {
        let backend = MockBackend::new().with_rpc(rpc::GET_USER_ROLES, json!(["student", "school_admin", "teacher"]));
        let user = user(None);
        let ctx = ResolveContext { backend: &backend, user: &user, profile: None };

        let Outcome::Resolved(resolution) = RoleRpc.resolve(&ctx).await.unwrap() else {
            panic!("expected a resolution");
        };
        assert_eq!(resolution.role, Role::School);
    }

    #[tokio::test]
    async fn test_metadata_strategy() {
        let backend = MockBackend::new();
        let user = user(Some("student"));
        let ctx = ResolveContext { backend: &backend, user: &user, profile: None };

        let Outcome::Resolved(resolution) = SessionMetadata.resolve(&ctx).await.unwrap() else {
            panic!("expected a resolution");
        };
        assert_eq!(resolution.role, Role::Student);
        assert_eq!(resolution.school_id.as_deref(), Some("META1"));
    }

    #[test]
    fn test_from_names() {
        let names = vec!["session_metadata".to_string(), "profile_table".to_string()];
        let strategies = from_names(&names).unwrap();
        assert_eq!(strategies[0].name(), "session_metadata");
        assert_eq!(strategies[1].name(), "profile_table");

        assert!(from_names(&["guesswork".to_string()]).is_err());
        assert!(from_names(&[]).is_err());
    }
}

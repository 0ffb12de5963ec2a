//! Demo identity synthesis
//!
//! A demo identity lets a reviewer use the portal under a chosen role without
//! credentials. Identities are fabricated locally and never authenticated
//! against the backend; the same `(role, index)` always yields the same
//! identifiers.

use crate::backend::{rpc, Backend};
use crate::errors::{AppError, Result};
use crate::models::{Organization, Profile, Role, Session, User, UserMetadata};

/// Locally fabricated user/profile/session triple
#[derive(Debug, Clone, PartialEq)]
pub struct DemoIdentity {
    pub role: Role,
    pub index: u32,
    pub school_id: String,
    pub user: User,
    pub profile: Profile,
    pub session: Session,
}

/// `test-<role>-<index>`
pub fn user_id(role: Role, index: u32) -> String {
    format!("test-{}-{}", role.as_str(), index)
}

/// `test-school-<index>`
pub fn school_id(index: u32) -> String {
    format!("test-school-{}", index)
}

/// `TEST<index>`
pub fn school_code(index: u32) -> String {
    format!("TEST{}", index)
}

/// Whether a user id was produced by [`synthesize`]
pub fn is_demo_user_id(id: &str) -> bool {
    Role::DEMO_ROLES
        .iter()
        .any(|role| id.starts_with(&format!("test-{}-", role.as_str())))
}

fn display_name(role: Role, index: u32) -> String {
    let base = match role {
        Role::School => "Demo School Admin",
        Role::Teacher => "Demo Teacher",
        Role::Student => "Demo Student",
        Role::Admin => "Demo Admin",
    };
    if index == 0 {
        base.to_string()
    } else {
        format!("{} {}", base, index + 1)
    }
}

/// Fabricate the demo identity for `role` and `index`
pub fn synthesize(role: Role, index: u32) -> Result<DemoIdentity> {
    if !Role::DEMO_ROLES.contains(&role) {
        return Err(AppError::InvalidDemoRole {
            role: role.as_str().to_string(),
        });
    }

    let id = user_id(role, index);
    let school_id = school_id(index);
    let school_code = school_code(index);
    let full_name = display_name(role, index);
    let school_name = if index == 0 {
        "Demo School".to_string()
    } else {
        format!("Demo School {}", index + 1)
    };

    let user = User {
        id: id.clone(),
        email: Some(format!("{}@demo.campus.test", id)),
        user_metadata: UserMetadata {
            full_name: Some(full_name.clone()),
            user_type: Some(role.as_str().to_string()),
            school_code: Some(school_code.clone()),
            school_name: Some(school_name.clone()),
            school_id: Some(school_id.clone()),
            ..UserMetadata::default()
        },
    };

    let profile = Profile {
        id: id.clone(),
        full_name: Some(full_name),
        user_type: Some(role.as_str().to_string()),
        school_code: Some(school_code.clone()),
        school_name: Some(school_name.clone()),
        school_id: Some(school_id.clone()),
        is_supervisor: Some(false),
        organization: Some(Organization {
            id: school_id.clone(),
            name: Some(school_name),
            code: Some(school_code),
        }),
    };

    let session = Session {
        access_token: format!("demo-{}", id),
        refresh_token: None,
        expires_at: None,
        user: user.clone(),
    };

    Ok(DemoIdentity {
        role,
        index,
        school_id,
        user,
        profile,
        session,
    })
}

/// Seed synthetic history rows for a demo identity
pub async fn seed(backend: &dyn Backend, identity: &DemoIdentity) -> Result<()> {
    rpc::seed_demo_data(backend, &identity.user.id, identity.role, &identity.school_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_deterministic() {
        let first = synthesize(Role::Teacher, 0).unwrap();
        let second = synthesize(Role::Teacher, 0).unwrap();

        assert_eq!(first.user.id, "test-teacher-0");
        assert_eq!(first.user.id, second.user.id);
        assert_eq!(first.profile.id, second.profile.id);
        assert_eq!(first.session.access_token, second.session.access_token);
        assert_eq!(first.school_id, "test-school-0");
        assert_eq!(first.profile.school_code.as_deref(), Some("TEST0"));
    }

    #[test]
    fn test_every_demo_role_has_a_school() {
        for role in Role::DEMO_ROLES {
            let identity = synthesize(role, 2).unwrap();
            assert_eq!(identity.profile.role(), Some(role));
            assert_eq!(identity.profile.school_ref().as_deref(), Some("test-school-2"));
            assert_eq!(identity.user.user_metadata.declared_role(), Some(role));
            assert!(is_demo_user_id(&identity.user.id));
        }
    }

    #[test]
    fn test_indexes_produce_distinct_identities() {
        let a = synthesize(Role::School, 0).unwrap();
        let b = synthesize(Role::School, 1).unwrap();
        assert_ne!(a.user.id, b.user.id);
        assert_ne!(a.school_id, b.school_id);
        assert_eq!(b.profile.full_name.as_deref(), Some("Demo School Admin 2"));
    }

    #[test]
    fn test_admin_is_not_a_demo_role() {
        assert!(matches!(
            synthesize(Role::Admin, 0),
            Err(AppError::InvalidDemoRole { .. })
        ));
        assert!(!is_demo_user_id("user-42"));
    }
}

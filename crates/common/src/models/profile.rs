//! Profile rows and role-table assignments

use crate::models::Role;
use serde::{Deserialize, Serialize};

/// Mutable user record keyed by user id, cached client-side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawProfile")]
pub struct Profile {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Role label as stored in the row
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

    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<Organization>,
}

/// Organization (school) joined onto a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Deserialize)]
struct RawProfile {
    id: String,
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
    organization: Option<Organization>,
    organizations: Option<Organization>,
    school: Option<Organization>,
}

impl From<RawProfile> for Profile {
    fn from(raw: RawProfile) -> Self {
        Self {
            id: raw.id,
            full_name: raw.full_name.or(raw.full_name_camel).or(raw.name),
            user_type: raw.user_type.or(raw.user_type_camel).or(raw.role),
            school_code: raw.school_code.or(raw.school_code_camel),
            school_name: raw.school_name.or(raw.school_name_camel),
            school_id: raw.school_id.or(raw.school_id_camel),
            is_supervisor: raw.is_supervisor.or(raw.is_supervisor_camel),
            organization: raw.organization.or(raw.organizations).or(raw.school),
        }
    }
}

impl Profile {
    /// Role stored on the row, if it parses
    pub fn role(&self) -> Option<Role> {
        self.user_type.as_deref().and_then(Role::from_label)
    }

    /// Supervisor flag, either explicit or implied by the role label
    pub fn is_supervisor(&self) -> bool {
        self.is_supervisor.unwrap_or(false)
            || self.user_type.as_deref().map(Role::label_implies_supervisor).unwrap_or(false)
    }

    /// School identifier from the row, its organization, or its school code
    pub fn school_ref(&self) -> Option<String> {
        self.school_id
            .clone()
            .or_else(|| self.organization.as_ref().map(|o| o.id.clone()))
            .or_else(|| self.school_code.clone())
    }
}

/// Role row found in a teacher/student table or via the role RPC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: Role,

    #[serde(default)]
    pub is_supervisor: bool,

    #[serde(default)]
    pub school_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_with_join() {
        let profile: Profile = serde_json::from_value(json!({
            "id": "u1",
            "full_name": "Grace Hopper",
            "user_type": "school_admin",
            "school_code": "NAVY",
            "organizations": { "id": "org-7", "name": "Navy School", "code": "NAVY" }
        }))
        .unwrap();

        assert_eq!(profile.role(), Some(Role::School));
        assert_eq!(profile.school_ref().as_deref(), Some("org-7"));
        assert_eq!(profile.organization.unwrap().name.as_deref(), Some("Navy School"));
    }

    #[test]
    fn test_school_ref_falls_back_to_code() {
        let profile: Profile = serde_json::from_value(json!({
            "id": "u2",
            "name": "Linus",
            "role": "student",
            "schoolCode": "TEST3"
        }))
        .unwrap();

        assert_eq!(profile.full_name.as_deref(), Some("Linus"));
        assert_eq!(profile.role(), Some(Role::Student));
        assert_eq!(profile.school_ref().as_deref(), Some("TEST3"));
    }

    #[test]
    fn test_unknown_role_label() {
        let profile: Profile = serde_json::from_value(json!({ "id": "u3", "user_type": "parent" })).unwrap();
        assert_eq!(profile.role(), None);
        assert!(!profile.is_supervisor());
    }
}

//! Typed wrappers over the backend's remote procedures

use super::Backend;
use crate::errors::Result;
use crate::models::{Role, RoleAssignment, StudentSummary, TeacherSummary};
use serde::Deserialize;
use serde_json::{json, Value};

pub const GET_USER_ROLES: &str = "get_user_roles";
pub const GET_SCHOOL_TEACHERS: &str = "get_school_teachers";
pub const GET_SCHOOL_STUDENTS: &str = "get_school_students";
pub const GET_USER_SETTINGS: &str = "get_user_settings";
pub const UPDATE_USER_SETTINGS: &str = "update_user_settings";
pub const SEED_DEMO_DATA: &str = "seed_demo_data";

/// The role procedure returns bare labels or rows depending on deployment
#[derive(Deserialize)]
#[serde(untagged)]
enum RoleEntry {
    Label(String),
    Row {
        role: String,
        #[serde(default, alias = "schoolId")]
        school_id: Option<String>,
        #[serde(default, alias = "isSupervisor")]
        is_supervisor: Option<bool>,
    },
}

impl RoleEntry {
    fn into_assignment(self) -> Option<RoleAssignment> {
        let (label, school_id, is_supervisor) = match self {
            RoleEntry::Label(label) => (label, None, None),
            RoleEntry::Row { role, school_id, is_supervisor } => (role, school_id, is_supervisor),
        };
        let role = Role::from_label(&label)?;
        Some(RoleAssignment {
            role,
            is_supervisor: is_supervisor.unwrap_or(false) || Role::label_implies_supervisor(&label),
            school_id,
        })
    }
}

/// Every role the backend grants a user; unknown labels are skipped
pub async fn user_roles(backend: &dyn Backend, user_id: &str) -> Result<Vec<RoleAssignment>> {
    let value = backend.rpc(GET_USER_ROLES, json!({ "p_user_id": user_id })).await?;
    if value.is_null() {
        return Ok(Vec::new());
    }

    let entries: Vec<RoleEntry> = serde_json::from_value(value)?;
    Ok(entries.into_iter().filter_map(RoleEntry::into_assignment).collect())
}

/// Teachers of a school, one attempt
pub async fn school_teachers(backend: &dyn Backend, school_id: &str) -> Result<Vec<TeacherSummary>> {
    let value = backend.rpc(GET_SCHOOL_TEACHERS, json!({ "p_school_id": school_id })).await?;
    rows(value)
}

/// Students of a school, one attempt
pub async fn school_students(backend: &dyn Backend, school_id: &str) -> Result<Vec<StudentSummary>> {
    let value = backend.rpc(GET_SCHOOL_STUDENTS, json!({ "p_school_id": school_id })).await?;
    rows(value)
}

/// Raw settings document for a user
pub async fn user_settings(backend: &dyn Backend, user_id: &str) -> Result<Value> {
    backend.rpc(GET_USER_SETTINGS, json!({ "p_user_id": user_id })).await
}

/// Replace the settings document for a user
pub async fn update_user_settings(backend: &dyn Backend, user_id: &str, settings: &Value) -> Result<()> {
    backend
        .rpc(UPDATE_USER_SETTINGS, json!({ "p_user_id": user_id, "p_settings": settings }))
        .await
        .map(|_| ())
}

/// Ask the backend to create synthetic history rows for a demo identity
pub async fn seed_demo_data(backend: &dyn Backend, user_id: &str, role: Role, school_id: &str) -> Result<()> {
    backend
        .rpc(
            SEED_DEMO_DATA,
            json!({ "p_user_id": user_id, "p_role": role.as_str(), "p_school_id": school_id }),
        )
        .await
        .map(|_| ())
}

fn rows<T: serde::de::DeserializeOwned>(value: Value) -> Result<Vec<T>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(value)?)
}

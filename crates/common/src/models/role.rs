//! Portal roles

use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which dashboard a user sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// School administrator
    #[serde(alias = "school_admin")]
    School,
    Teacher,
    Student,
    /// Platform administrator
    #[serde(alias = "super_admin")]
    Admin,
}

impl Role {
    /// Roles a demo identity can be synthesized for
    pub const DEMO_ROLES: [Role; 3] = [Role::School, Role::Teacher, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::School => "school",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }

    /// Parse any of the role labels found in profile rows and metadata
    pub fn from_label(label: &str) -> Option<Role> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "school" | "school_admin" | "schooladmin" | "organization" | "org_admin" => Some(Role::School),
            "teacher" | "instructor" | "supervisor" => Some(Role::Teacher),
            "student" | "learner" => Some(Role::Student),
            "admin" | "super_admin" | "superadmin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// `supervisor` is stored as a role label but means a supervising teacher
    pub fn label_implies_supervisor(label: &str) -> bool {
        label.trim().eq_ignore_ascii_case("supervisor")
    }

    /// Dashboard a user of this role lands on after sign-in
    pub fn landing_route(&self) -> &'static str {
        match self {
            Role::School => "/school/dashboard",
            Role::Teacher => "/teacher/dashboard",
            Role::Student => "/student/dashboard",
            Role::Admin => "/admin/dashboard",
        }
    }

    /// Rank used when a lookup returns several roles for one user
    pub fn precedence(&self) -> u8 {
        match self {
            Role::Admin => 3,
            Role::School => 2,
            Role::Teacher => 1,
            Role::Student => 0,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_label(s).ok_or_else(|| AppError::InvalidFormat {
            message: format!("unknown role '{}'", s),
        })
    }
}

//! Portal route table
//!
//! Maps request paths onto page definitions and their access requirements.
//! Patterns use `:name` segments for parameters.

use crate::errors::{AppError, Result};
use crate::guard::Requirement;
use crate::models::Role;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Access {
    Public,
    Protected(Requirement),
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteDef {
    pub pattern: String,
    pub name: String,
    pub title: String,
    pub access: Access,
}

impl RouteDef {
    fn new(pattern: &str, name: &str, title: &str, access: Access) -> Self {
        Self {
            pattern: pattern.to_string(),
            name: name.to_string(),
            title: title.to_string(),
            access,
        }
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let pattern: Vec<&str> = segments(&self.pattern).collect();
        let actual: Vec<&str> = segments(path).collect();
        if pattern.len() != actual.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (expected, got) in pattern.iter().zip(&actual) {
            match expected.strip_prefix(':') {
                Some(name) => {
                    params.insert(name.to_string(), got.to_string());
                }
                None if expected == got => {}
                None => return None,
            }
        }
        Some(params)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// A matched route with its path parameters
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub route: &'a RouteDef,
    pub params: HashMap<String, String>,
}

impl RouteMatch<'_> {
    /// Requirement with path-bound constraints filled in
    pub fn requirement(&self) -> Option<Requirement> {
        match &self.route.access {
            Access::Public => None,
            Access::Protected(requirement) => {
                let mut requirement = requirement.clone();
                if let Some(school) = self.params.get("school_id") {
                    requirement.school = Some(school.clone());
                }
                Some(requirement)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<RouteDef>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteDef>) -> Self {
        Self { routes }
    }

    /// The portal's pages
    pub fn default_table() -> Self {
        use Access::{Protected, Public};

        let school = || Protected(Requirement::role(Role::School));
        let teacher = || Protected(Requirement::role(Role::Teacher));
        let student = || Protected(Requirement::role(Role::Student));

        Self::new(vec![
            RouteDef::new("/", "home", "Home", Public),
            RouteDef::new("/about", "about", "About", Public),
            RouteDef::new("/pricing", "pricing", "Pricing", Public),
            RouteDef::new("/contact", "contact", "Contact", Public),
            RouteDef::new("/login", "login", "Sign in", Public),
            RouteDef::new("/signup", "signup", "Create account", Public),
            RouteDef::new("/demo", "demo", "Try a demo account", Public),
            RouteDef::new("/unauthorized", "unauthorized", "Not allowed", Public),
            RouteDef::new("/school/dashboard", "school_dashboard", "School dashboard", school()),
            RouteDef::new("/school/teachers", "school_teachers", "Teachers", school()),
            RouteDef::new("/school/analytics", "school_analytics", "School analytics", school()),
            RouteDef::new("/teacher/dashboard", "teacher_dashboard", "Teacher dashboard", teacher()),
            RouteDef::new("/teacher/students", "teacher_students", "Students", teacher()),
            RouteDef::new("/teacher/analytics", "teacher_analytics", "Class analytics", teacher()),
            RouteDef::new(
                "/teacher/supervision",
                "teacher_supervision",
                "Supervision",
                Protected(Requirement::role(Role::Teacher).supervisor()),
            ),
            RouteDef::new("/student/dashboard", "student_dashboard", "Student dashboard", student()),
            RouteDef::new("/student/chat", "student_chat", "Chat", student()),
            RouteDef::new("/admin/dashboard", "admin_dashboard", "Admin", Protected(Requirement::role(Role::Admin))),
            RouteDef::new("/settings", "settings", "Settings", Protected(Requirement::any_authenticated())),
            RouteDef::new(
                "/schools/:school_id/overview",
                "school_overview",
                "School overview",
                Protected(Requirement::roles(&[Role::School, Role::Teacher])),
            ),
        ])
    }

    pub fn routes(&self) -> &[RouteDef] {
        &self.routes
    }

    /// First route whose pattern matches `path`
    pub fn resolve(&self, path: &str) -> Result<RouteMatch<'_>> {
        self.routes
            .iter()
            .find_map(|route| route.matches(path).map(|params| RouteMatch { route, params }))
            .ok_or_else(|| AppError::NotFound {
                resource_type: "page".to_string(),
                id: path.to_string(),
            })
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::default_table()
    }
}

//! Route guard
//!
//! Decides whether a protected page renders, waits for resolution, or
//! redirects. The guard never fetches anything itself; it only reads the
//! resolver's state.

use crate::config::AuthConfig;
use crate::metrics;
use crate::models::Role;
use crate::resolver::{IdentityHandle, IdentityState};
use serde::Serialize;

/// What a protected page needs from the identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Requirement {
    /// Accepted roles; empty accepts any signed-in user
    pub roles: Vec<Role>,
    pub require_supervisor: bool,
    /// School the identity must belong to
    pub school: Option<String>,
}

impl Requirement {
    pub fn any_authenticated() -> Self {
        Self::default()
    }

    pub fn role(role: Role) -> Self {
        Self { roles: vec![role], ..Self::default() }
    }

    pub fn roles(roles: &[Role]) -> Self {
        Self { roles: roles.to_vec(), ..Self::default() }
    }

    pub fn supervisor(mut self) -> Self {
        self.require_supervisor = true;
        self
    }

    pub fn same_school(mut self, school_id: impl Into<String>) -> Self {
        self.school = Some(school_id.into());
        self
    }
}

/// Guard evaluation of one identity against one requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    Loading,
    Authorized,
    Unauthorized,
    Unauthenticated,
}

/// What the caller should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Resolution still running; show a loading indicator
    Wait,
    Render,
    Redirect(String),
}

impl GuardDecision {
    fn label(&self) -> &'static str {
        match self {
            GuardDecision::Wait => "wait",
            GuardDecision::Render => "render",
            GuardDecision::Redirect(_) => "redirect",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_route: String,
    unauthorized_route: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self {
            login_route: "/login".to_string(),
            unauthorized_route: "/unauthorized".to_string(),
        }
    }
}

impl RouteGuard {
    pub fn new(login_route: impl Into<String>, unauthorized_route: impl Into<String>) -> Self {
        Self {
            login_route: login_route.into(),
            unauthorized_route: unauthorized_route.into(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.login_route.clone(), config.unauthorized_route.clone())
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    /// Classify the state against a requirement
    pub fn state(&self, state: &IdentityState, requirement: &Requirement) -> GuardState {
        if state.loading {
            return GuardState::Loading;
        }
        let identity = &state.identity;
        if !identity.is_authenticated() {
            return GuardState::Unauthenticated;
        }

        // Admin passes any role check
        let role_ok = requirement.roles.is_empty()
            || matches!(identity.role, Some(role) if role == Role::Admin || requirement.roles.contains(&role));
        let supervisor_ok = !requirement.require_supervisor || identity.is_supervisor;
        let school_ok = match &requirement.school {
            None => true,
            Some(school) => {
                identity.role == Some(Role::Admin) || identity.school_id.as_deref() == Some(school.as_str())
            }
        };

        if role_ok && supervisor_ok && school_ok {
            GuardState::Authorized
        } else {
            GuardState::Unauthorized
        }
    }

    /// Decide without waiting
    pub fn evaluate(&self, state: &IdentityState, requirement: &Requirement) -> GuardDecision {
        let decision = match self.state(state, requirement) {
            GuardState::Loading => GuardDecision::Wait,
            GuardState::Authorized => GuardDecision::Render,
            GuardState::Unauthenticated => GuardDecision::Redirect(self.login_route.clone()),
            GuardState::Unauthorized => {
                let target = state
                    .identity
                    .role
                    .map(|role| role.landing_route().to_string())
                    .unwrap_or_else(|| self.unauthorized_route.clone());
                GuardDecision::Redirect(target)
            }
        };
        metrics::record_guard_decision(decision.label());
        decision
    }

    /// Wait for resolution to settle, then decide
    pub async fn check(&self, handle: &mut IdentityHandle, requirement: &Requirement) -> GuardDecision {
        handle.settled().await;
        self.evaluate(&handle.current(), requirement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::resolver::Identity;

    fn state(role: Option<Role>) -> IdentityState {
        IdentityState {
            loading: false,
            identity: Identity {
                user: role.map(|_| User {
                    id: "u1".into(),
                    email: None,
                    user_metadata: Default::default(),
                }),
                role,
                school_id: role.map(|_| "s-1".to_string()),
                ..Identity::default()
            },
        }
    }

    #[test]
    fn test_teacher_route() {
        let guard = RouteGuard::default();
        let requirement = Requirement::role(Role::Teacher);

        assert_eq!(guard.evaluate(&state(Some(Role::Teacher)), &requirement), GuardDecision::Render);
        assert_eq!(
            guard.evaluate(&state(Some(Role::Student)), &requirement),
            GuardDecision::Redirect("/student/dashboard".into())
        );
        assert_eq!(
            guard.evaluate(&state(None), &requirement),
            GuardDecision::Redirect("/login".into())
        );
    }

    #[test]
    fn test_loading_waits() {
        let guard = RouteGuard::default();
        let loading = IdentityState { loading: true, identity: Identity::default() };
        assert_eq!(guard.state(&loading, &Requirement::any_authenticated()), GuardState::Loading);
        assert_eq!(guard.evaluate(&loading, &Requirement::any_authenticated()), GuardDecision::Wait);
    }

    #[test]
    fn test_admin_passes_role_checks() {
        let guard = RouteGuard::default();
        let requirement = Requirement::role(Role::School).same_school("elsewhere");
        assert_eq!(guard.state(&state(Some(Role::Admin)), &requirement), GuardState::Authorized);
    }

    #[test]
    fn test_supervisor_and_school_requirements() {
        let guard = RouteGuard::default();
        let teacher = state(Some(Role::Teacher));

        let supervision = Requirement::role(Role::Teacher).supervisor();
        assert_eq!(guard.state(&teacher, &supervision), GuardState::Unauthorized);

        let mut supervisor = teacher.clone();
        supervisor.identity.is_supervisor = true;
        assert_eq!(guard.state(&supervisor, &supervision), GuardState::Authorized);

        let other_school = Requirement::any_authenticated().same_school("s-2");
        assert_eq!(guard.state(&teacher, &other_school), GuardState::Unauthorized);
    }

    #[test]
    fn test_unauthorized_without_role() {
        let guard = RouteGuard::new("/signin", "/denied");
        let mut roleless = state(Some(Role::Student));
        roleless.identity.role = None;

        assert_eq!(
            guard.evaluate(&roleless, &Requirement::role(Role::Teacher)),
            GuardDecision::Redirect("/denied".into())
        );
        assert_eq!(guard.login_route(), "/signin");
    }

    #[tokio::test]
    async fn test_check_waits_for_resolution() {
        use crate::backend::MockBackend;
        use crate::config::DemoConfig;
        use crate::resolver::{strategy, SessionResolver};
        use crate::storage::MemoryStore;
        use std::sync::Arc;
        use tokio_test::{assert_pending, assert_ready, task};

        let resolver = SessionResolver::new(
            Arc::new(MockBackend::new()),
            Arc::new(MemoryStore::new()),
            strategy::default_strategies(),
            DemoConfig { seed_data: false, ..DemoConfig::default() },
        );
        let guard = RouteGuard::default();
        let requirement = Requirement::role(Role::Teacher);

        let mut waiting = resolver.handle();
        let mut check = task::spawn(guard.check(&mut waiting, &requirement));
        assert_pending!(check.poll());

        resolver.load_session().await;
        assert!(check.is_woken());
        assert_eq!(assert_ready!(check.poll()), GuardDecision::Redirect("/login".into()));
        drop(check);

        resolver.set_test_user(Role::Teacher, 0).await.unwrap();
        let mut handle = resolver.handle();
        assert_eq!(guard.check(&mut handle, &requirement).await, GuardDecision::Render);
    }
}

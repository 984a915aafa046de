use tracing::debug;

use crate::config::RoutesConfig;
use crate::models::Role;
use crate::session::{Phase, SessionState};

/// What to do with an authenticated user who lacks the required role or permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DenialMode {
    /// Send them to the landing page of their role.
    #[default]
    Redirect,
    /// Show an explicit "access denied" view.
    Deny,
}

/// What a protected route asks of the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequirement {
    pub path: String,
    pub required_roles: Vec<Role>,
    pub required_permissions: Vec<String>,
    pub on_denied: DenialMode,
}

impl RouteRequirement {
    /// A route that only needs a signed-in user.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            required_roles: Vec::new(),
            required_permissions: Vec::new(),
            on_denied: DenialMode::Redirect,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.required_roles = roles.into_iter().collect();
        self
    }

    pub fn with_permissions<S: Into<String>>(mut self, permissions: impl IntoIterator<Item = S>) -> Self {
        self.required_permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn deny_on_failure(mut self) -> Self {
        self.on_denied = DenialMode::Deny;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Bootstrap has not finished; render nothing yet.
    Loading,
    RedirectToLogin { login_path: String, from: String },
    Redirect { to: String },
    AccessDenied,
    Render,
}

/// Decides, for one navigation, whether protected content may render.
#[derive(Debug, Clone, Default)]
pub struct RouteGuard {
    routes: RoutesConfig,
}

impl RouteGuard {
    pub fn new(routes: RoutesConfig) -> Self {
        Self { routes }
    }

    pub fn check(&self, state: &SessionState, requirement: &RouteRequirement) -> GuardDecision {
        if state.phase() == Phase::Bootstrapping {
            return GuardDecision::Loading;
        }

        if !state.is_authenticated() {
            debug!("Unauthenticated access to '{}'; redirecting to login.", requirement.path);
            return GuardDecision::RedirectToLogin {
                login_path: self.routes.login_path.clone(),
                from: requirement.path.clone(),
            };
        }

        let roles_ok = requirement.required_roles.is_empty()
            || state.has_any_role(&requirement.required_roles);
        let permissions_ok = requirement.required_permissions.is_empty()
            || state.has_any_permission(requirement.required_permissions.as_slice());

        if roles_ok && permissions_ok {
            return GuardDecision::Render;
        }

        debug!(
            event_name = "guard.denied",
            event_domain = "authz",
            path = requirement.path.as_str(),
            role = state.role().map(Role::as_str),
            "route requirement not met"
        );
        match requirement.on_denied {
            DenialMode::Deny => GuardDecision::AccessDenied,
            DenialMode::Redirect => GuardDecision::Redirect {
                to: self.landing_page(state.role()).to_string(),
            },
        }
    }

    /// Admins land on the admin dashboard; everyone else on the shared default.
    pub fn landing_page(&self, role: Option<&Role>) -> &str {
        match role {
            Some(Role::Admin) => &self.routes.admin_landing,
            _ => &self.routes.default_landing,
        }
    }

    /// Where to go after signing in: back to the page that bounced the user to
    /// the login screen, or else the landing page of their role.
    pub fn post_login_target(&self, from: Option<&str>, role: Option<&Role>) -> String {
        match from {
            Some(path) if !path.is_empty() && path != self.routes.login_path => path.to_string(),
            _ => self.landing_page(role).to_string(),
        }
    }
}

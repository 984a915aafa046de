//! The session state machine.
//!
//! `SessionState` is only ever changed through [`SessionState::apply`], a pure
//! reducer over [`AuthAction`]. The user and token live together in one
//! [`Credentials`] value, so one can never be present without the other.

use crate::authz;
use crate::models::{Role, User};

/// The authenticated user together with the bearer token that proves it.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Persisted credentials have not been checked yet.
    Bootstrapping,
    Ready,
}

/// Every transition the session accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthAction {
    /// Bootstrap verified the stored token.
    Restore(Credentials),
    /// Bootstrap ended without restoring a session.
    BootstrapFinished { error: Option<String> },
    LoginStarted,
    LoginSucceeded(Credentials),
    LoginFailed(String),
    RegisterStarted,
    RegisterFinished,
    RegisterFailed(String),
    ProfileStarted,
    ProfileFailed(String),
    /// Replace the user of an authenticated session, keeping its token.
    UserUpdated(User),
    /// The backend no longer accepts the token.
    SessionExpired(String),
    LoggedOut,
    ClearError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    credentials: Option<Credentials>,
    phase: Phase,
    login_loading: bool,
    register_loading: bool,
    profile_loading: bool,
    error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            credentials: None,
            phase: Phase::Bootstrapping,
            login_loading: false,
            register_loading: false,
            profile_loading: false,
            error: None,
        }
    }
}

impl SessionState {
    /// The unauthenticated shape every process starts in.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unauthenticated and done bootstrapping; the shape logout returns to.
    pub fn signed_out() -> Self {
        Self {
            phase: Phase::Ready,
            ..Self::default()
        }
    }

    pub fn apply(&self, action: AuthAction) -> SessionState {
        let mut next = self.clone();
        match action {
            AuthAction::Restore(credentials) => {
                next.credentials = Some(credentials);
                next.phase = Phase::Ready;
            }
            AuthAction::BootstrapFinished { error } => {
                next.phase = Phase::Ready;
                if error.is_some() {
                    next.error = error;
                }
            }
            AuthAction::LoginStarted => {
                next.login_loading = true;
                next.error = None;
            }
            AuthAction::LoginSucceeded(credentials) => {
                next.credentials = Some(credentials);
                next.phase = Phase::Ready;
                next.login_loading = false;
                next.profile_loading = false;
                next.error = None;
            }
            AuthAction::LoginFailed(message) => {
                next.credentials = None;
                next.login_loading = false;
                next.profile_loading = false;
                next.error = Some(message);
            }
            AuthAction::RegisterStarted => {
                next.register_loading = true;
                next.error = None;
            }
            AuthAction::RegisterFinished => {
                next.register_loading = false;
            }
            AuthAction::RegisterFailed(message) => {
                next.register_loading = false;
                next.error = Some(message);
            }
            AuthAction::ProfileStarted => {
                next.profile_loading = true;
                next.error = None;
            }
            AuthAction::ProfileFailed(message) => {
                next.profile_loading = false;
                next.error = Some(message);
            }
            AuthAction::UserUpdated(user) => {
                if let Some(credentials) = next.credentials.as_mut() {
                    credentials.user = user;
                    next.profile_loading = false;
                }
            }
            AuthAction::SessionExpired(message) => {
                next = SessionState::signed_out();
                next.error = Some(message);
            }
            AuthAction::LoggedOut => {
                next = SessionState::signed_out();
            }
            AuthAction::ClearError => {
                next.error = None;
            }
        }
        next
    }

    pub fn user(&self) -> Option<&User> {
        self.credentials.as_ref().map(|c| &c.user)
    }

    pub fn token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.token.as_str())
    }

    pub fn role(&self) -> Option<&Role> {
        self.user().map(|u| &u.role)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// True only while the initial bootstrap is running.
    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Bootstrapping
    }

    pub fn is_login_loading(&self) -> bool {
        self.login_loading
    }

    pub fn is_register_loading(&self) -> bool {
        self.register_loading
    }

    pub fn is_profile_loading(&self) -> bool {
        self.profile_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_role(&self, role: &Role) -> bool {
        authz::has_role(self.role(), role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        authz::has_any_role(self.role(), roles)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        authz::has_permission(self.role(), permission)
    }

    pub fn has_any_permission<S: AsRef<str>>(&self, permissions: &[S]) -> bool {
        authz::has_any_permission(self.role(), permissions)
    }
}

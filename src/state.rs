//! Shared application state.
//!
//! Built once at startup and handed to every consumer; nothing here is global.

use std::sync::Arc;

use crate::config::ConfigV1;
use crate::guard::{GuardDecision, RouteGuard, RouteRequirement};
use crate::session::SessionService;

#[derive(Clone)]
pub struct AppState {
    /// Configuration loaded at startup.
    pub config: Arc<ConfigV1>,
    /// The one session of this process.
    pub session: Arc<SessionService>,
    pub guard: RouteGuard,
}

impl AppState {
    /// Checks a navigation against the current session snapshot.
    pub fn authorize(&self, requirement: &RouteRequirement) -> GuardDecision {
        self.guard.check(&self.session.snapshot(), requirement)
    }
}

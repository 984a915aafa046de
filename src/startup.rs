//! Application startup.
//!
//! Builds the session service and route guard from configuration and runs the
//! one-time session bootstrap before anything protected is shown.

use std::sync::Arc;

use tracing::info;

use crate::config::ConfigV1;
use crate::error::AuthError;
use crate::guard::RouteGuard;
use crate::session::{BootstrapOutcome, SessionService};
use crate::state::AppState;

/// Builds the application state without touching the network.
pub fn build(config: Arc<ConfigV1>) -> Result<AppState, AuthError> {
    let session = Arc::new(SessionService::from_config(&config)?);
    let guard = RouteGuard::new(config.routes.clone());
    Ok(AppState {
        config,
        session,
        guard,
    })
}

/// Builds the application state and bootstraps the persisted session.
pub async fn run(config: Arc<ConfigV1>) -> Result<(AppState, BootstrapOutcome), AuthError> {
    let state = build(config)?;
    let outcome = state.session.bootstrap().await?;
    info!(
        event_name = "app.started",
        event_domain = "app",
        authenticated = state.session.snapshot().is_authenticated(),
        "campus-auth ready"
    );
    Ok((state, outcome))
}

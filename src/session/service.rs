//! The session service: bootstrap and every auth operation.
//!
//! One `SessionService` is built at startup and shared as
//! `Arc<SessionService>`. Its state is published through a `watch` channel so
//! route guards and screens can read snapshots or wait for changes.
//!
//! Backend calls run without any lock held. Their results are committed under
//! `commit`, which also serializes persisted-store writes with the matching
//! state transition, so the store and the in-memory session change together.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::state::{AuthAction, Credentials, SessionState};
use super::token;
use crate::backend::{Backend, HttpBackend};
use crate::config::{AvatarConfig, BootstrapConfig, ConfigV1};
use crate::error::AuthError;
use crate::models::{LoginCredentials, ProfileForm, RegistrationForm, User};
use crate::store::TokenStore;

pub const LOGIN_FAILED_MESSAGE: &str = "Login failed. Please try again.";
pub const REGISTER_FAILED_MESSAGE: &str = "Registration failed. Please try again.";
pub const PROFILE_FAILED_MESSAGE: &str = "Profile update failed. Please try again.";
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";
pub const UNREACHABLE_MESSAGE: &str = "Unable to verify your session right now. Please sign in again later.";

/// How bootstrap ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    NoStoredSession,
    Restored(User),
    /// The stored token was refused (or had expired); it has been cleared.
    Rejected,
    /// The backend could not be reached twice; stored credentials were kept.
    Unreachable,
    /// A login or logout finished while verification was in flight.
    Superseded,
}

pub struct SessionService {
    backend: Arc<dyn Backend>,
    store: TokenStore,
    avatar: AvatarConfig,
    bootstrap_config: BootstrapConfig,
    state: watch::Sender<SessionState>,
    commit: Mutex<()>,
    bootstrapped: AtomicBool,
    login_seq: AtomicU64,
    register_seq: AtomicU64,
    profile_seq: AtomicU64,
}

impl SessionService {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: TokenStore,
        avatar: AvatarConfig,
        bootstrap_config: BootstrapConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::new());
        Self {
            backend,
            store,
            avatar,
            bootstrap_config,
            state,
            commit: Mutex::new(()),
            bootstrapped: AtomicBool::new(false),
            login_seq: AtomicU64::new(0),
            register_seq: AtomicU64::new(0),
            profile_seq: AtomicU64::new(0),
        }
    }

    /// Builds the HTTP backend and token store described by `config`.
    pub fn from_config(config: &ConfigV1) -> Result<Self, AuthError> {
        info!("Creating session service...");
        let backend = Arc::new(HttpBackend::new(&config.backend)?);
        Ok(Self::new(
            backend,
            TokenStore::from_config(&config.store),
            config.avatar.clone(),
            config.bootstrap.clone(),
        ))
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn avatar(&self) -> &AvatarConfig {
        &self.avatar
    }

    // -- Bootstrap

    /// Verifies persisted credentials once at startup.
    ///
    /// 1) Nothing stored: finish unauthenticated.
    /// 2) Stored JWT visibly expired: clear it without a network call.
    /// 3) Verify against the backend, retrying once on a transient failure.
    /// 4) Success restores the session. A 401/403 or an unreadable profile
    ///    clears the store. Anything else (a second transient failure, a 429)
    ///    keeps the store and finishes unauthenticated.
    pub async fn bootstrap(&self) -> Result<BootstrapOutcome, AuthError> {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            warn!("Session bootstrap requested more than once; ignoring.");
            return Err(AuthError::AlreadyBootstrapped);
        }

        let ticket = self.login_seq.load(Ordering::SeqCst);

        let stored = match self.store.read().await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to read persisted session, discarding it: {}", e);
                self.clear_store("bootstrap").await;
                None
            }
        };

        let Some(stored) = stored else {
            info!(
                event_name = "session.bootstrap.empty",
                event_domain = "session",
                "no persisted session found"
            );
            self.dispatch(AuthAction::BootstrapFinished { error: None });
            return Ok(BootstrapOutcome::NoStoredSession);
        };

        if token::is_expired(&stored.token, Utc::now()) {
            let _guard = self.commit.lock().await;
            if self.login_seq.load(Ordering::SeqCst) != ticket {
                self.dispatch(AuthAction::BootstrapFinished { error: None });
                return Ok(BootstrapOutcome::Superseded);
            }
            info!(
                event_name = "session.bootstrap.expired",
                event_domain = "session",
                user_id = stored.user.id.as_str(),
                "persisted token has expired"
            );
            self.clear_store("bootstrap").await;
            self.dispatch(AuthAction::BootstrapFinished { error: None });
            return Ok(BootstrapOutcome::Rejected);
        }

        let mut result = self.backend.fetch_profile(&stored.token).await;
        if let Err(e) = &result {
            if e.is_transient() {
                warn!(
                    "Token verification failed transiently ({}); retrying in {} ms",
                    e, self.bootstrap_config.retry_delay_ms
                );
                tokio::time::sleep(Duration::from_millis(self.bootstrap_config.retry_delay_ms)).await;
                result = self.backend.fetch_profile(&stored.token).await;
            }
        }

        let _guard = self.commit.lock().await;
        if self.login_seq.load(Ordering::SeqCst) != ticket {
            debug!("Discarding bootstrap verification result; session changed meanwhile.");
            self.dispatch(AuthAction::BootstrapFinished { error: None });
            return Ok(BootstrapOutcome::Superseded);
        }

        match result {
            Ok(user) => {
                let user = user.normalized(&self.avatar);
                if let Err(e) = self.store.write(&stored.token, &user).await {
                    warn!("Failed to refresh persisted user record: {}", e);
                }
                info!(
                    event_name = "session.bootstrap.restored",
                    event_domain = "session",
                    user_id = user.id.as_str(),
                    role = user.role.as_str(),
                    "persisted session verified"
                );
                self.dispatch(AuthAction::Restore(Credentials {
                    token: stored.token,
                    user: user.clone(),
                }));
                Ok(BootstrapOutcome::Restored(user))
            }
            Err(e) if e.is_session_rejection() => {
                info!(
                    event_name = "session.bootstrap.rejected",
                    event_domain = "session",
                    error = %e,
                    "persisted token was rejected"
                );
                self.clear_store("bootstrap").await;
                self.dispatch(AuthAction::BootstrapFinished { error: None });
                Ok(BootstrapOutcome::Rejected)
            }
            Err(e) => {
                warn!(
                    event_name = "session.bootstrap.unreachable",
                    event_domain = "session",
                    status = e.status(),
                    error = %e,
                    "could not verify persisted token; keeping it for the next start"
                );
                self.dispatch(AuthAction::BootstrapFinished {
                    error: Some(UNREACHABLE_MESSAGE.to_string()),
                });
                Ok(BootstrapOutcome::Unreachable)
            }
        }
    }

    // -- Operations

    /// Signs in. On failure the session is cleared, `error` holds a
    /// displayable message, and the error is returned to the caller.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, AuthError> {
        let ticket = self.start(&self.login_seq, AuthAction::LoginStarted).await;
        debug!("Login attempt {} for '{}'", ticket, credentials.email);

        let result = self.backend.login(credentials).await;

        let _guard = self.commit.lock().await;
        if !is_current(&self.login_seq, ticket) {
            debug!("Discarding stale login response {}", ticket);
            return Err(AuthError::Superseded);
        }
        // The session is about to be replaced or cleared; profile calls made
        // for the old one must not land on it.
        self.profile_seq.fetch_add(1, Ordering::SeqCst);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    event_name = "session.login.failed",
                    event_domain = "session",
                    email = credentials.email.as_str(),
                    status = e.status(),
                    error = %e,
                    "login failed"
                );
                self.clear_store("login").await;
                self.dispatch(AuthAction::LoginFailed(e.user_message(LOGIN_FAILED_MESSAGE)));
                return Err(e);
            }
        };

        let user = response.user.normalized(&self.avatar);
        if let Err(e) = self.store.write(&response.token, &user).await {
            error!("Failed to persist session after login: {}", e);
            self.clear_store("login").await;
            self.dispatch(AuthAction::LoginFailed(LOGIN_FAILED_MESSAGE.to_string()));
            return Err(e.into());
        }

        info!(
            event_name = "session.login.succeeded",
            event_domain = "session",
            user_id = user.id.as_str(),
            role = user.role.as_str(),
            "user signed in"
        );
        self.dispatch(AuthAction::LoginSucceeded(Credentials {
            token: response.token,
            user: user.clone(),
        }));
        Ok(user)
    }

    /// Creates an account. Does not sign the new user in.
    pub async fn register(&self, form: &RegistrationForm) -> Result<Value, AuthError> {
        let ticket = self.start(&self.register_seq, AuthAction::RegisterStarted).await;

        let result = self.backend.register(form).await;

        let _guard = self.commit.lock().await;
        if !is_current(&self.register_seq, ticket) {
            debug!("Discarding stale registration response {}", ticket);
            return Err(AuthError::Superseded);
        }

        match result {
            Ok(data) => {
                info!(
                    event_name = "session.register.succeeded",
                    event_domain = "session",
                    email = form.email.as_str(),
                    "account registered"
                );
                self.dispatch(AuthAction::RegisterFinished);
                Ok(data)
            }
            Err(e) => {
                warn!(
                    event_name = "session.register.failed",
                    event_domain = "session",
                    email = form.email.as_str(),
                    error = %e,
                    "registration failed"
                );
                self.dispatch(AuthAction::RegisterFailed(
                    e.user_message(REGISTER_FAILED_MESSAGE),
                ));
                Err(e)
            }
        }
    }

    /// Ends the session locally, then tells the backend. Never fails.
    pub async fn logout(&self) {
        let token = {
            let _guard = self.commit.lock().await;
            // In-flight logins and profile calls must not revive this session.
            self.login_seq.fetch_add(1, Ordering::SeqCst);
            self.profile_seq.fetch_add(1, Ordering::SeqCst);

            let token = self.state.borrow().token().map(str::to_owned);
            self.clear_store("logout").await;
            self.dispatch(AuthAction::LoggedOut);
            token
        };

        match token {
            Some(token) => match self.backend.logout(&token).await {
                Ok(()) => info!(
                    event_name = "session.logout",
                    event_domain = "session",
                    "user signed out"
                ),
                Err(e) => warn!("Backend logout notification failed (ignored): {}", e),
            },
            None => debug!("Logout requested without an active session."),
        }
    }

    /// Replaces the signed-in user after a profile edit, keeping the token.
    /// Local only: persists the record and recomputes the avatar URL.
    pub async fn update_user(&self, user: User) -> Result<User, AuthError> {
        let _guard = self.commit.lock().await;
        self.commit_user(user).await
    }

    /// Sends a profile edit to the backend and adopts the returned user.
    pub async fn update_profile(&self, form: &ProfileForm) -> Result<User, AuthError> {
        let token = self.current_token()?;
        if form.is_empty() {
            return Err(AuthError::InvalidRequest("profile update has no fields".to_string()));
        }
        let ticket = self.start(&self.profile_seq, AuthAction::ProfileStarted).await;

        let result = self.backend.update_profile(&token, form).await;
        self.finish_profile(ticket, &token, result, "update").await
    }

    /// Re-fetches the signed-in user from the backend.
    pub async fn refresh_profile(&self) -> Result<User, AuthError> {
        let token = self.current_token()?;
        let ticket = self.start(&self.profile_seq, AuthAction::ProfileStarted).await;

        let result = self.backend.fetch_profile(&token).await;
        self.finish_profile(ticket, &token, result, "refresh").await
    }

    pub fn clear_error(&self) {
        self.dispatch(AuthAction::ClearError);
    }

    // -- Internals

    async fn finish_profile(
        &self,
        ticket: u64,
        token: &str,
        result: Result<User, AuthError>,
        operation: &str,
    ) -> Result<User, AuthError> {
        let _guard = self.commit.lock().await;
        let same_session = self.state.borrow().token() == Some(token);
        if !is_current(&self.profile_seq, ticket) || !same_session {
            debug!("Discarding stale profile {} response {}", operation, ticket);
            return Err(AuthError::Superseded);
        }

        match result {
            Ok(user) => match self.commit_user(user).await {
                Ok(user) => Ok(user),
                Err(e) => {
                    self.dispatch(AuthAction::ProfileFailed(PROFILE_FAILED_MESSAGE.to_string()));
                    Err(e)
                }
            },
            Err(e) if e.is_unauthorized() => {
                warn!("Profile {} rejected the session token; signing out.", operation);
                self.login_seq.fetch_add(1, Ordering::SeqCst);
                self.clear_store("profile").await;
                self.dispatch(AuthAction::SessionExpired(SESSION_EXPIRED_MESSAGE.to_string()));
                Err(e)
            }
            Err(e) => {
                warn!("Profile {} failed: {}", operation, e);
                self.dispatch(AuthAction::ProfileFailed(e.user_message(PROFILE_FAILED_MESSAGE)));
                Err(e)
            }
        }
    }

    /// Caller must hold `commit`.
    async fn commit_user(&self, user: User) -> Result<User, AuthError> {
        let token = self.current_token()?;
        let user = user.normalized(&self.avatar);
        self.store.write(&token, &user).await?;
        debug!("Updated user record for '{}'", user.id);
        self.dispatch(AuthAction::UserUpdated(user.clone()));
        Ok(user)
    }

    fn current_token(&self) -> Result<String, AuthError> {
        self.state
            .borrow()
            .token()
            .map(str::to_owned)
            .ok_or(AuthError::NotAuthenticated)
    }

    /// Takes a new ticket for an operation category and applies its start action.
    async fn start(&self, seq: &AtomicU64, action: AuthAction) -> u64 {
        let _guard = self.commit.lock().await;
        let ticket = seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.dispatch(action);
        ticket
    }

    fn dispatch(&self, action: AuthAction) {
        self.state.send_modify(|state| {
            *state = state.apply(action);
        });
    }

    async fn clear_store(&self, operation: &str) {
        if let Err(e) = self.store.clear().await {
            error!("Failed to clear persisted session during {}: {}", operation, e);
        }
    }
}

fn is_current(seq: &AtomicU64, ticket: u64) -> bool {
    seq.load(Ordering::SeqCst) == ticket
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LoginResponse;
    use crate::models::Role;
    use crate::store::MemoryStorage;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use tracing_test::traced_test;

    type Scripted<T> = StdMutex<VecDeque<(u64, Result<T, AuthError>)>>;

    /// A backend that replays scripted answers, each after an optional delay.
    #[derive(Default)]
    struct ScriptedBackend {
        logins: Scripted<LoginResponse>,
        profiles: Scripted<User>,
        registrations: Scripted<Value>,
        profile_calls: AtomicUsize,
        logout_calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn login_ok(self, delay_ms: u64, token: &str, user: User) -> Self {
            self.logins.lock().unwrap().push_back((
                delay_ms,
                Ok(LoginResponse {
                    user,
                    token: token.to_string(),
                }),
            ));
            self
        }

        fn login_err(self, err: AuthError) -> Self {
            self.logins.lock().unwrap().push_back((0, Err(err)));
            self
        }

        fn profile(self, delay_ms: u64, result: Result<User, AuthError>) -> Self {
            self.profiles.lock().unwrap().push_back((delay_ms, result));
            self
        }

        fn registration(self, result: Result<Value, AuthError>) -> Self {
            self.registrations.lock().unwrap().push_back((0, result));
            self
        }
    }

    async fn next<T>(queue: &Scripted<T>) -> Result<T, AuthError> {
        let scripted = queue.lock().unwrap().pop_front();
        match scripted {
            Some((delay_ms, result)) => {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                result
            }
            None => Err(AuthError::Network("no scripted response".to_string())),
        }
    }

    #[async_trait::async_trait]
    impl Backend for ScriptedBackend {
        fn get_name(&self) -> &str {
            "scripted"
        }

        async fn login(&self, _: &LoginCredentials) -> Result<LoginResponse, AuthError> {
            next(&self.logins).await
        }

        async fn register(&self, _: &RegistrationForm) -> Result<Value, AuthError> {
            next(&self.registrations).await
        }

        async fn logout(&self, _: &str) -> Result<(), AuthError> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_profile(&self, _: &str) -> Result<User, AuthError> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            next(&self.profiles).await
        }

        async fn update_profile(&self, _: &str, _: &ProfileForm) -> Result<User, AuthError> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            next(&self.profiles).await
        }
    }

    fn avatar() -> AvatarConfig {
        AvatarConfig {
            base_url: "https://api.kufe.edu/images/users".to_string(),
            default_image: "default.png".to_string(),
        }
    }

    fn teacher() -> User {
        User::new("7", "Dr. Hana", "hana@kufe.edu", Role::Teacher)
    }

    fn service(backend: ScriptedBackend) -> (Arc<SessionService>, Arc<ScriptedBackend>, TokenStore) {
        let backend = Arc::new(backend);
        let store = TokenStore::new(Arc::new(MemoryStorage::new()), "token", "user");
        let service = SessionService::new(
            backend.clone(),
            store.clone(),
            avatar(),
            BootstrapConfig { retry_delay_ms: 1 },
        );
        (Arc::new(service), backend, store)
    }

    fn unauthorized() -> AuthError {
        AuthError::Rejected {
            status: 401,
            message: Some("Invalid token".to_string()),
        }
    }

    /// Test that bootstrap with an empty store finishes unauthenticated.
    #[tokio::test]
    async fn test_bootstrap_without_stored_session() {
        let (service, backend, _) = service(ScriptedBackend::default());
        assert!(service.snapshot().is_loading());

        let outcome = service.bootstrap().await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::NoStoredSession);

        let state = service.snapshot();
        assert!(!state.is_loading());
        assert!(!state.is_authenticated());
        assert_eq!(backend.profile_calls.load(Ordering::SeqCst), 0);
    }

    /// Test that a stored token confirmed by the backend restores the session.
    #[tokio::test]
    async fn test_bootstrap_restores_verified_session() {
        let fresh = teacher().with_image("hana.jpg");
        let (service, _, store) = service(ScriptedBackend::default().profile(0, Ok(fresh)));
        store.write("t1", &teacher()).await.unwrap();

        let outcome = service.bootstrap().await.unwrap();
        let user = match outcome {
            BootstrapOutcome::Restored(user) => user,
            other => panic!("expected a restored session, got {:?}", other),
        };
        assert_eq!(
            user.image_url.as_deref(),
            Some("https://api.kufe.edu/images/users/hana.jpg")
        );

        let state = service.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.token(), Some("t1"));
        assert!(state.has_permission("manage_grades"));

        let stored = store.read().await.unwrap().unwrap();
        assert_eq!(stored.user.image.as_deref(), Some("hana.jpg"));
    }

    /// Test that a rejected stored token is removed from the store.
    #[tokio::test]
    async fn test_bootstrap_rejection_clears_store() {
        let (service, _, store) = service(ScriptedBackend::default().profile(0, Err(unauthorized())));
        store.write("stale", &teacher()).await.unwrap();

        let outcome = service.bootstrap().await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Rejected);
        assert!(!service.snapshot().is_authenticated());
        assert_eq!(store.read().await.unwrap(), None);
    }

    /// Test that two transient failures keep the stored credentials for next time.
    #[tokio::test]
    async fn test_bootstrap_unreachable_keeps_store() {
        let (service, backend, store) = service(
            ScriptedBackend::default()
                .profile(0, Err(AuthError::Network("refused".to_string())))
                .profile(0, Err(AuthError::Server { status: 503, message: None })),
        );
        store.write("t1", &teacher()).await.unwrap();

        let outcome = service.bootstrap().await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Unreachable);
        assert_eq!(backend.profile_calls.load(Ordering::SeqCst), 2);

        let state = service.snapshot();
        assert!(!state.is_loading());
        assert!(!state.is_authenticated());
        assert_eq!(state.error(), Some(UNREACHABLE_MESSAGE));
        assert!(store.read().await.unwrap().is_some());
    }

    /// Test that one transient failure is retried before giving up.
    #[tokio::test]
    async fn test_bootstrap_retries_once() {
        let (service, backend, store) = service(
            ScriptedBackend::default()
                .profile(0, Err(AuthError::Network("timeout".to_string())))
                .profile(0, Ok(teacher())),
        );
        store.write("t1", &teacher()).await.unwrap();

        let outcome = service.bootstrap().await.unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Restored(_)));
        assert_eq!(backend.profile_calls.load(Ordering::SeqCst), 2);
    }

    /// Test that bootstrap runs at most once.
    #[tokio::test]
    async fn test_bootstrap_only_once() {
        let (service, _, _) = service(ScriptedBackend::default());
        service.bootstrap().await.unwrap();
        assert!(matches!(
            service.bootstrap().await,
            Err(AuthError::AlreadyBootstrapped)
        ));
    }

    /// Test that a visibly expired JWT is cleared without asking the backend.
    #[tokio::test]
    async fn test_bootstrap_skips_expired_jwt() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let claims = serde_json::json!({ "sub": "7", "exp": Utc::now().timestamp() - 10 });
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"k")).unwrap();

        let (service, backend, store) = service(ScriptedBackend::default());
        store.write(&token, &teacher()).await.unwrap();

        assert_eq!(service.bootstrap().await.unwrap(), BootstrapOutcome::Rejected);
        assert_eq!(backend.profile_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.read().await.unwrap(), None);
    }

    /// Test that a login completing during bootstrap wins over the stale verification.
    #[tokio::test]
    async fn test_login_during_bootstrap_supersedes_it() {
        let old = User::new("1", "Old User", "old@kufe.edu", Role::Student);
        let (service, _, store) = service(
            ScriptedBackend::default()
                .profile(100, Ok(old.clone()))
                .login_ok(0, "t-new", teacher()),
        );
        store.write("t-old", &old).await.unwrap();

        let bootstrapping = tokio::spawn({
            let service = service.clone();
            async move { service.bootstrap().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();

        let outcome = bootstrapping.await.unwrap().unwrap();
        assert_eq!(outcome, BootstrapOutcome::Superseded);

        let state = service.snapshot();
        assert!(!state.is_loading());
        assert_eq!(state.token(), Some("t-new"));
        assert_eq!(store.read().await.unwrap().unwrap().token, "t-new");
    }

    /// Test that a successful login persists the token and the normalized user.
    #[tokio::test]
    async fn test_login_persists_session() {
        let (service, _, store) = service(ScriptedBackend::default().login_ok(0, "t1", teacher()));
        service.bootstrap().await.unwrap();

        let user = service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();
        assert_eq!(user.image.as_deref(), Some("default.png"));

        let state = service.snapshot();
        assert!(state.is_authenticated());
        assert!(!state.is_login_loading());
        assert_eq!(state.role(), Some(&Role::Teacher));

        let stored = store.read().await.unwrap().unwrap();
        assert_eq!(stored.token, "t1");
        assert_eq!(stored.user.id, "7");
    }

    /// Test that sign-in is logged as a structured event without the bearer token.
    #[tokio::test]
    #[traced_test]
    async fn test_login_logs_event_but_not_token() {
        let (service, _, _) = service(ScriptedBackend::default().login_ok(0, "tok-sensitive-123", teacher()));
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();

        assert!(logs_contain("session.login.succeeded"));
        assert!(!logs_contain("tok-sensitive-123"));
    }

    /// Test that a rejected login surfaces the backend message and clears the store.
    #[tokio::test]
    async fn test_login_failure_reports_backend_message() {
        let (service, _, store) = service(ScriptedBackend::default().login_err(AuthError::Rejected {
            status: 401,
            message: Some("Invalid email or password".to_string()),
        }));
        store.write("old", &teacher()).await.unwrap();

        let err = service
            .login(&LoginCredentials::new("hana@kufe.edu", "wrong"))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());

        let state = service.snapshot();
        assert!(!state.is_authenticated());
        assert!(!state.is_login_loading());
        assert_eq!(state.error(), Some("Invalid email or password"));
        assert_eq!(store.read().await.unwrap(), None);
    }

    /// Test that an unreachable backend produces the generic network message.
    #[tokio::test]
    async fn test_login_network_failure_message() {
        let (service, _, _) = service(
            ScriptedBackend::default().login_err(AuthError::Network("refused".to_string())),
        );
        let _ = service.login(&LoginCredentials::new("a@kufe.edu", "x")).await;
        assert_eq!(service.snapshot().error(), Some(crate::error::NETWORK_MESSAGE));
    }

    /// Test that only the latest of two overlapping logins is applied.
    #[tokio::test]
    async fn test_stale_login_is_discarded() {
        let student = User::new("1", "Sara", "sara@kufe.edu", Role::Student);
        let (service, _, store) = service(
            ScriptedBackend::default()
                .login_ok(100, "t-slow", student)
                .login_ok(0, "t-fast", teacher()),
        );

        let slow = tokio::spawn({
            let service = service.clone();
            async move { service.login(&LoginCredentials::new("sara@kufe.edu", "x")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "y"))
            .await
            .unwrap();

        assert!(matches!(slow.await.unwrap(), Err(AuthError::Superseded)));
        assert_eq!(service.snapshot().token(), Some("t-fast"));
        assert_eq!(store.read().await.unwrap().unwrap().token, "t-fast");
    }

    /// Test that logout clears everything and can be repeated.
    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (service, backend, store) = service(ScriptedBackend::default().login_ok(0, "t1", teacher()));
        service.bootstrap().await.unwrap();
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();

        service.logout().await;
        let once = service.snapshot();
        service.logout().await;

        assert_eq!(once, SessionState::signed_out());
        assert_eq!(service.snapshot(), once);
        assert_eq!(store.read().await.unwrap(), None);
        assert_eq!(backend.logout_calls.load(Ordering::SeqCst), 1);
    }

    /// Test that registering does not sign anyone in.
    #[tokio::test]
    async fn test_register_does_not_authenticate() {
        let (service, _, _) = service(
            ScriptedBackend::default().registration(Ok(serde_json::json!({ "id": 12 }))),
        );
        service.bootstrap().await.unwrap();

        let form = RegistrationForm {
            full_name: "New Student".to_string(),
            email: "new@kufe.edu".to_string(),
            password: "pw".to_string(),
            ..Default::default()
        };
        let data = service.register(&form).await.unwrap();
        assert_eq!(data["id"], 12);

        let state = service.snapshot();
        assert!(!state.is_authenticated());
        assert!(!state.is_register_loading());
    }

    /// Test that a failed registration keeps its message until cleared.
    #[tokio::test]
    async fn test_register_failure_and_clear_error() {
        let (service, _, _) = service(ScriptedBackend::default().registration(Err(
            AuthError::Rejected {
                status: 409,
                message: Some("Email already registered".to_string()),
            },
        )));
        assert!(service.register(&RegistrationForm::default()).await.is_err());
        assert_eq!(service.snapshot().error(), Some("Email already registered"));

        service.clear_error();
        assert_eq!(service.snapshot().error(), None);
    }

    /// Test that a profile update keeps the token and refreshes the avatar URL.
    #[tokio::test]
    async fn test_update_profile_replaces_user() {
        let renamed = User::new("7", "Dr. Hana K.", "hana@kufe.edu", Role::Teacher).with_image("new.png");
        let (service, _, store) = service(
            ScriptedBackend::default()
                .login_ok(0, "t1", teacher())
                .profile(0, Ok(renamed)),
        );
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();

        let form = ProfileForm {
            full_name: Some("Dr. Hana K.".to_string()),
            ..Default::default()
        };
        let user = service.update_profile(&form).await.unwrap();
        assert_eq!(
            user.image_url.as_deref(),
            Some("https://api.kufe.edu/images/users/new.png")
        );

        let state = service.snapshot();
        assert_eq!(state.token(), Some("t1"));
        assert_eq!(state.user().map(|u| u.full_name.as_str()), Some("Dr. Hana K."));
        assert!(!state.is_profile_loading());
        assert_eq!(store.read().await.unwrap().unwrap().user.full_name, "Dr. Hana K.");
    }

    /// Test that a local user update rewrites the stored record and avatar URL only.
    #[tokio::test]
    async fn test_update_user_changes_avatar_keeps_token() {
        let (service, _, store) = service(ScriptedBackend::default().login_ok(0, "t1", teacher()));
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();

        let user = service
            .update_user(teacher().with_image("new.jpg"))
            .await
            .unwrap();
        assert_eq!(
            user.image_url.as_deref(),
            Some("https://api.kufe.edu/images/users/new.jpg")
        );

        let stored = store.read().await.unwrap().unwrap();
        assert_eq!(stored.token, "t1");
        assert_eq!(stored.user.image.as_deref(), Some("new.jpg"));
        assert_eq!(service.snapshot().token(), Some("t1"));
    }

    /// Test that a 401 during a profile call ends the session.
    #[tokio::test]
    async fn test_profile_unauthorized_expires_session() {
        let (service, _, store) = service(
            ScriptedBackend::default()
                .login_ok(0, "t1", teacher())
                .profile(0, Err(unauthorized())),
        );
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();

        assert!(service.refresh_profile().await.is_err());
        let state = service.snapshot();
        assert!(!state.is_authenticated());
        assert_eq!(state.error(), Some(SESSION_EXPIRED_MESSAGE));
        assert_eq!(store.read().await.unwrap(), None);
    }

    /// Test that local user updates need an authenticated session.
    #[tokio::test]
    async fn test_update_user_requires_session() {
        let (service, _, _) = service(ScriptedBackend::default());
        service.bootstrap().await.unwrap();
        assert!(matches!(
            service.update_user(teacher()).await,
            Err(AuthError::NotAuthenticated)
        ));
        assert!(matches!(
            service.refresh_profile().await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    /// Test that subscribers observe committed transitions.
    #[tokio::test]
    async fn test_subscribers_see_login() {
        let (service, _, _) = service(ScriptedBackend::default().login_ok(0, "t1", teacher()));
        let mut rx = service.subscribe();
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated());
    }

    /// Test that a profile refresh overlapping a new login cannot restore the previous user.
    #[tokio::test]
    async fn test_profile_refresh_during_login_is_discarded() {
        let student = User::new("1", "Sara", "sara@kufe.edu", Role::Student);
        let (service, _, store) = service(
            ScriptedBackend::default()
                .login_ok(0, "t-teacher", teacher())
                .profile(100, Ok(teacher()))
                .login_ok(0, "t-student", student),
        );
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();

        let refreshing = tokio::spawn({
            let service = service.clone();
            async move { service.refresh_profile().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        service
            .login(&LoginCredentials::new("sara@kufe.edu", "pw"))
            .await
            .unwrap();

        assert!(matches!(refreshing.await.unwrap(), Err(AuthError::Superseded)));

        let state = service.snapshot();
        assert_eq!(state.token(), Some("t-student"));
        assert_eq!(state.user().map(|u| u.id.as_str()), Some("1"));
        assert_eq!(state.role(), Some(&Role::Student));
        assert!(!state.is_profile_loading());

        let stored = store.read().await.unwrap().unwrap();
        assert_eq!(stored.token, "t-student");
        assert_eq!(stored.user.id, "1");
        assert_eq!(stored.user.role, Role::Student);
    }

    /// Test that a rate-limited verification keeps the stored session.
    #[tokio::test]
    async fn test_bootstrap_rate_limited_keeps_store() {
        let (service, backend, store) = service(ScriptedBackend::default().profile(
            0,
            Err(AuthError::Rejected {
                status: 429,
                message: Some("Too many requests".to_string()),
            }),
        ));
        store.write("t1", &teacher()).await.unwrap();

        let outcome = service.bootstrap().await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Unreachable);
        assert_eq!(backend.profile_calls.load(Ordering::SeqCst), 1);

        let state = service.snapshot();
        assert!(!state.is_loading());
        assert!(!state.is_authenticated());
        assert_eq!(state.error(), Some(UNREACHABLE_MESSAGE));
        assert_eq!(store.read().await.unwrap().unwrap().token, "t1");
    }

    /// Test that an empty profile form is refused before reaching the backend.
    #[tokio::test]
    async fn test_update_profile_rejects_empty_form() {
        let (service, backend, _) = service(ScriptedBackend::default().login_ok(0, "t1", teacher()));
        service
            .login(&LoginCredentials::new("hana@kufe.edu", "secret"))
            .await
            .unwrap();

        let result = service.update_profile(&ProfileForm::default()).await;
        assert!(matches!(result, Err(AuthError::InvalidRequest(_))));
        assert_eq!(backend.profile_calls.load(Ordering::SeqCst), 0);
        assert!(!service.snapshot().is_profile_loading());
    }
}

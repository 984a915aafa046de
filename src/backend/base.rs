use serde::Deserialize;
use serde_json::Value;

use crate::error::AuthError;
use crate::models::{LoginCredentials, ProfileForm, RegistrationForm, User};

/// Successful answer to `POST /user/login`.
#[derive(Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
}

/// Answer to `POST /user/register`.
#[derive(Deserialize, Debug, Clone)]
pub struct RegisterResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: Option<String>,
}

/// The REST backend the session layer talks to.
///
/// Implementations translate transport failures into `AuthError::Network`,
/// 4xx into `AuthError::Rejected` and 5xx into `AuthError::Server`.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    fn get_name(&self) -> &str;

    async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResponse, AuthError>;

    /// Returns the `data` payload of a successful registration.
    async fn register(&self, form: &RegistrationForm) -> Result<Value, AuthError>;

    async fn logout(&self, token: &str) -> Result<(), AuthError>;

    /// Fetches the current user; doubles as token verification.
    async fn fetch_profile(&self, token: &str) -> Result<User, AuthError>;

    async fn update_profile(&self, token: &str, form: &ProfileForm) -> Result<User, AuthError>;
}

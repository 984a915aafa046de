use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::base::{Backend, LoginResponse, RegisterResponse};
use crate::config::BackendConfig;
use crate::error::AuthError;
use crate::models::{AvatarUpload, LoginCredentials, ProfileForm, RegistrationForm, User};

/// Profile endpoints answer with the bare user or wrap it in `user`/`data`.
#[derive(Deserialize)]
#[serde(untagged)]
enum UserEnvelope {
    Wrapped { user: User },
    Data { data: User },
    Bare(User),
}

impl From<UserEnvelope> for User {
    fn from(envelope: UserEnvelope) -> Self {
        match envelope {
            UserEnvelope::Wrapped { user } | UserEnvelope::Data { data: user } | UserEnvelope::Bare(user) => user,
        }
    }
}

/// A `Backend` that talks to the dashboard REST API over HTTP.
pub struct HttpBackend {
    pub config: BackendConfig,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, AuthError> {
        info!(
            "Creating HTTP backend for '{}' (timeout {} ms)",
            config.base_url, config.timeout_in_ms
        );
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_in_ms))
            .build()
            .map_err(|e| AuthError::Network(format!("Error building HTTP client: {}", e)))?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    fn get_name(&self) -> &str {
        &self.config.base_url
    }

    async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResponse, AuthError> {
        let url = self.url("/user/login");
        debug!("Sending login request to: {}", url);
        let response = send(self.client.post(&url).json(credentials)).await?;
        decode(response).await
    }

    async fn register(&self, form: &RegistrationForm) -> Result<Value, AuthError> {
        let url = self.url("/user/register");
        debug!("Sending registration request to: {}", url);
        let response = send(self.client.post(&url).multipart(registration_form(form)?)).await?;
        let status = response.status().as_u16();
        let body: RegisterResponse = decode(response).await?;
        if body.success {
            Ok(body.data)
        } else {
            Err(AuthError::Rejected {
                status,
                message: body.message,
            })
        }
    }

    async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let url = self.url("/user/logout");
        debug!("Sending logout notification to: {}", url);
        send(self.client.post(&url).bearer_auth(token)).await?;
        Ok(())
    }

    async fn fetch_profile(&self, token: &str) -> Result<User, AuthError> {
        let url = self.url("/user/profile");
        debug!("Fetching profile from: {}", url);
        let response = send(self.client.get(&url).bearer_auth(token)).await?;
        decode::<UserEnvelope>(response).await.map(User::from)
    }

    async fn update_profile(&self, token: &str, form: &ProfileForm) -> Result<User, AuthError> {
        let url = self.url("/user/profile");
        debug!("Sending profile update to: {}", url);
        let request = self
            .client
            .patch(&url)
            .bearer_auth(token)
            .multipart(profile_form(form)?);
        let response = send(request).await?;
        decode::<UserEnvelope>(response).await.map(User::from)
    }
}

/// Sends the request and maps non-2xx answers onto `AuthError`.
async fn send(request: RequestBuilder) -> Result<Response, AuthError> {
    let response = request
        .send()
        .await
        .map_err(|e| AuthError::Network(format!("Error sending request: {}", e)))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    debug!("Backend answered {} with message {:?}", status, message);
    if status.is_server_error() {
        Err(AuthError::Server {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(AuthError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, AuthError> {
    let body = response
        .text()
        .await
        .map_err(|e| AuthError::Network(format!("Error reading response body: {}", e)))?;
    serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse(format!("Error parsing JSON: {}", e)))
}

/// Pulls `message` (or `error`) out of a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

fn avatar_part(avatar: &AvatarUpload) -> Result<Part, AuthError> {
    Part::bytes(avatar.bytes.clone())
        .file_name(avatar.file_name.clone())
        .mime_str(&avatar.content_type)
        .map_err(|e| AuthError::InvalidRequest(format!("Invalid avatar content type: {}", e)))
}

fn registration_form(form: &RegistrationForm) -> Result<Form, AuthError> {
    let mut multipart = Form::new()
        .text("fullName", form.full_name.clone())
        .text("email", form.email.clone())
        .text("password", form.password.clone());
    if let Some(role) = &form.role {
        multipart = multipart.text("role", role.to_string());
    }
    for (name, value) in &form.extra {
        multipart = multipart.text(name.clone(), value.clone());
    }
    if let Some(avatar) = &form.avatar {
        multipart = multipart.part("image", avatar_part(avatar)?);
    }
    Ok(multipart)
}

fn profile_form(form: &ProfileForm) -> Result<Form, AuthError> {
    let mut multipart = Form::new();
    if let Some(full_name) = &form.full_name {
        multipart = multipart.text("fullName", full_name.clone());
    }
    if let Some(email) = &form.email {
        multipart = multipart.text("email", email.clone());
    }
    if let Some(password) = &form.password {
        multipart = multipart.text("password", password.clone());
    }
    if let Some(avatar) = &form.avatar {
        multipart = multipart.part("image", avatar_part(avatar)?);
    }
    Ok(multipart)
}

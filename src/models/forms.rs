use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::role::Role;

/// Email/password pair submitted to `POST /user/login`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// A file attached to a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Fields sent to `POST /user/register`.
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
    pub avatar: Option<AvatarUpload>,
    /// Any additional form fields (department, phone, ...), sent as text parts.
    pub extra: BTreeMap<String, String>,
}

/// Fields sent to `PATCH /user/profile`. Only the populated ones are submitted.
#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<AvatarUpload>,
}

impl ProfileForm {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.email.is_none()
            && self.password.is_none()
            && self.avatar.is_none()
    }
}

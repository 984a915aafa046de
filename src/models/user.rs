use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::role::Role;
use crate::config::AvatarConfig;

/// The User struct represents the signed-in dashboard user.
///
/// This is also the record persisted next to the bearer token. `image_url` is
/// derived from `image` and the avatar settings and is stored along with it,
/// so a persisted record reads back exactly as written.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
    /// Avatar filename as stored by the backend.
    #[serde(default)]
    pub image: Option<String>,
    /// Display URL derived by [`User::normalized`]; absent until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, full_name: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        User {
            id: id.into(),
            full_name: full_name.into(),
            email: email.into(),
            role,
            image: None,
            image_url: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Fill in the default avatar when the filename is missing, then derive the
    /// display URL by templating the filename into the avatar base path.
    pub fn normalized(mut self, avatar: &AvatarConfig) -> Self {
        let image = match self.image.take() {
            Some(name) if !name.trim().is_empty() => name,
            _ => avatar.default_image.clone(),
        };
        self.image_url = Some(avatar.url_for(&image));
        self.image = Some(image);
        self
    }

    /// True when the user still has the placeholder avatar.
    pub fn has_default_image(&self, avatar: &AvatarConfig) -> bool {
        self.image
            .as_deref()
            .map_or(true, |name| name == avatar.default_image)
    }
}

/// Backends differ on whether ids are strings or numbers; keep them as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

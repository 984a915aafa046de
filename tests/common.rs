#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use campus_auth::config::{load_config_from_str, ConfigV1};
use campus_auth::startup;
use campus_auth::state::AppState;

/// A complete config pointing the backend at `base_url` and the session file at `store_path`.
pub fn test_config(base_url: &str, store_path: &Path) -> ConfigV1 {
    let yaml = format!(
        r#"
version: "1.0.0"
logging:
  level: "debug"
  format: "json"
backend:
  base_url: "{base_url}"
  timeout_in_ms: 2000
store:
  type: "file"
  path: "{path}"
avatar:
  base_url: "https://api.kufe.edu/images/users/"
bootstrap:
  retry_delay_ms: 10
"#,
        base_url = base_url,
        path = store_path.display()
    );
    load_config_from_str(&yaml).expect("Failed to parse test config YAML")
}

/// Builds the app without bootstrapping, like a fresh process would.
pub fn build_app(config: &ConfigV1) -> AppState {
    startup::build(Arc::new(config.clone())).expect("Failed to build app state")
}

pub fn user_json(id: u64, role: &str, image: Option<&str>) -> String {
    serde_json::json!({
        "_id": id,
        "fullName": format!("User {}", id),
        "email": format!("user{}@kufe.edu", id),
        "role": role,
        "image": image,
    })
    .to_string()
}

pub fn login_body(token: &str, user: &str) -> String {
    format!(r#"{{"token": "{}", "user": {}}}"#, token, user)
}

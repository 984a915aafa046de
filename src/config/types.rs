use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use super::store::StoreConfig;

/// Prefix for environment overrides, e.g. `CAMPUS_AUTH_BACKEND__BASE_URL`.
pub const ENV_PREFIX: &str = "CAMPUS_AUTH_";

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct ConfigV1 {
    pub logging: LoggingConfig,
    pub backend: BackendConfig,
    pub store: StoreConfig,
    pub avatar: AvatarConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Load config from a YAML file, with environment variables layered on top.
pub fn load_config(path: &Path) -> Result<ConfigV1, figment::Error> {
    let figment = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));
    extract(figment)
}

/// Load config from an in-memory YAML document.
pub fn load_config_from_str(yaml: &str) -> Result<ConfigV1, figment::Error> {
    extract(Figment::new().merge(Yaml::string(yaml)))
}

fn extract(figment: Figment) -> Result<ConfigV1, figment::Error> {
    match figment.extract::<Config>()? {
        Config::ConfigV1(c) => Ok(c),
    }
}

/// Render the JSON schema for the configuration.
pub fn config_schema() -> String {
    let schema = schema_for!(Config);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// Where the REST backend lives and how long we wait for it.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
}

fn default_timeout_in_ms() -> u64 {
    5000
}

/// Avatar URL templating.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct AvatarConfig {
    /// Base path the avatar filename is appended to.
    pub base_url: String,
    /// Sentinel filename meaning "no custom avatar".
    #[serde(default = "default_image")]
    pub default_image: String,
}

fn default_image() -> String {
    "default.png".to_string()
}

impl AvatarConfig {
    pub fn url_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), file_name)
    }
}

/// Navigation targets used by the route guard.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct RoutesConfig {
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_admin_landing")]
    pub admin_landing: String,
    #[serde(default = "default_landing")]
    pub default_landing: String,
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_admin_landing() -> String {
    "/admin/dashboard".to_string()
}

fn default_landing() -> String {
    "/".to_string()
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
            admin_landing: default_admin_landing(),
            default_landing: default_landing(),
        }
    }
}

/// Session bootstrap tuning.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct BootstrapConfig {
    /// Delay before the single retry after a transient verification failure.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

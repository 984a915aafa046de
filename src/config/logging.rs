use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Settings for `utils::init_logging`.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error.
    pub level: String,
    /// "json" for OpenTelemetry-shaped records, anything else for console output.
    pub format: String,
    /// Reported as `service.name` in JSON records.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_version")]
    pub service_version: String,
}

fn default_service_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

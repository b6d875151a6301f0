//! Widget configuration
//!
//! Settings come from the environment; per-component properties can
//! override the bot endpoint.

use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Component property naming an explicit bot base URL
pub const ENDPOINT_PROPERTY: &str = "knowledgeBotEndpoint";

const DEFAULT_WIDGET_NAME: &str = "knowledge-bot";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing Knowledge Bot endpoint")]
    MissingEndpoint,
}

/// Configuration shared by every conversation hosted in one widget
#[derive(Debug, Clone)]
pub struct WidgetSettings {
    /// Widget instance name, source of the funnel
    pub widget_name: String,
    /// Projection base URL, used when no component endpoint is set
    pub projection: Option<String>,
    /// Per-request timeout; expiry surfaces as a network failure
    pub request_timeout: Duration,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            widget_name: DEFAULT_WIDGET_NAME.to_string(),
            projection: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl WidgetSettings {
    pub fn from_env() -> Self {
        let request_timeout = std::env::var("KNOWLEDGE_BOT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS), Duration::from_secs);

        Self {
            widget_name: std::env::var("KNOWLEDGE_BOT_WIDGET")
                .unwrap_or_else(|_| DEFAULT_WIDGET_NAME.to_string()),
            projection: std::env::var("KNOWLEDGE_BOT_PROJECTION").ok(),
            request_timeout,
        }
    }

    pub fn funnel(&self) -> String {
        funnel(&self.widget_name)
    }
}

/// Resolve the conversations endpoint for a component.
///
/// The component's `knowledgeBotEndpoint` wins over the projection.
pub fn knowledge_bot_endpoint(
    properties: &Map<String, Value>,
    settings: &WidgetSettings,
) -> Result<String, ConfigError> {
    let base = properties
        .get(ENDPOINT_PROPERTY)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| settings.projection.as_deref().filter(|s| !s.is_empty()))
        .ok_or(ConfigError::MissingEndpoint)?;

    Ok(format!("{base}/conversations"))
}

/// Widget name with contact suffixes removed
pub fn funnel(widget_name: &str) -> String {
    widget_name
        .replacen("_contact-method", "", 1)
        .replacen("_contact", "", 1)
}

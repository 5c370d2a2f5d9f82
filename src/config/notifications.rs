use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Where billing and wallet notifications go.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum NotificationsConfig {
    /// Emit each notification as a structured log line.
    #[default]
    Log,

    /// POST each notification as JSON to an HTTP endpoint.
    Webhook(WebhookNotifierConfig),
}

impl NotificationsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            NotificationsConfig::Log => Ok(()),
            NotificationsConfig::Webhook(c) => {
                url::Url::parse(&c.url).map_err(|e| {
                    ConfigError::Validation(format!("notifications.url is invalid: {e}"))
                })?;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookNotifierConfig {
    pub url: String,

    /// Extra headers sent with every request (e.g. an auth token).
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

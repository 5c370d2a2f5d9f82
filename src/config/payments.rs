use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Payment provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum PaymentsConfig {
    /// No provider. Automatic top-ups fail with a payment error and the
    /// webhook endpoint is not mounted.
    #[default]
    None,

    Stripe(StripeConfig),
}

impl PaymentsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            PaymentsConfig::None => Ok(()),
            PaymentsConfig::Stripe(c) => c.validate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StripeConfig {
    /// Secret API key (`sk_...`).
    pub api_key: String,

    /// Signing secret for the webhook endpoint (`whsec_...`). When absent,
    /// webhook payloads are accepted unsigned.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Maximum age of a signed webhook.
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl StripeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::Validation(
                "payments.api_key cannot be empty".into(),
            ));
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Validation(format!("payments.base_url is not a valid URL: {e}"))
        })?;
        Ok(())
    }
}

fn default_webhook_tolerance() -> u64 {
    300
}

fn default_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_timeout() -> u64 {
    30
}

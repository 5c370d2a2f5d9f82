use serde::{Deserialize, Serialize};

use super::{ConfigError, dollars_to_microcents};

/// Daily billing settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BillingConfig {
    /// Attempts at a wallet update before giving up on an organization for
    /// this run. Each attempt re-reads the organization.
    #[serde(default = "default_max_wallet_retries")]
    pub max_wallet_retries: u32,

    /// Balance in dollars below which a low-balance alert is sent.
    #[serde(default = "default_low_balance_threshold")]
    pub low_balance_threshold: f64,

    #[serde(default)]
    pub negative_balance: NegativeBalancePolicy,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            max_wallet_retries: default_max_wallet_retries(),
            low_balance_threshold: default_low_balance_threshold(),
            negative_balance: NegativeBalancePolicy::default(),
        }
    }
}

impl BillingConfig {
    /// Low-balance threshold in microcents.
    pub fn low_balance_threshold(&self) -> i64 {
        dollars_to_microcents(self.low_balance_threshold)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_wallet_retries == 0 {
            return Err(ConfigError::Validation(
                "billing.max_wallet_retries must be at least 1".into(),
            ));
        }
        if !self.low_balance_threshold.is_finite() || self.low_balance_threshold < 0.0 {
            return Err(ConfigError::Validation(
                "billing.low_balance_threshold must be a non-negative amount".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_wallet_retries() -> u32 {
    5
}

fn default_low_balance_threshold() -> f64 {
    10.0
}

/// What to do when a day's cost exceeds the wallet balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeBalancePolicy {
    /// Deduct the full cost; the balance may go negative.
    #[default]
    Allow,
    /// Deduct at most the available balance and record the entry as partial.
    FloorAtZero,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoTopUpConfig {
    /// Master switch; organizations still opt in individually.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// ISO currency code passed to the payment provider.
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for AutoTopUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            currency: default_currency(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Send a consumption-limit warning when a check denies.
    #[serde(default)]
    pub notify_on_violation: bool,
}

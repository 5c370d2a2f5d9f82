//! Token pricing.
//!
//! Prices are configured in dollars per 1,000 tokens and stored as microcents
//! per 1M tokens (1 microcent = $0.000001), so a cost calculation is pure
//! integer arithmetic.
//!
//! ```toml
//! [pricing.models.gpt-4o]
//! request = 0.005
//! response = 0.015
//!
//! [pricing.default]
//! request = 0.001
//! response = 0.002
//! ```
//!
//! Configured models are layered over the built-in table; the `default` tier
//! prices any model not found in either.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, dollars_to_microcents};

/// Dollar prices per 1,000 tokens, as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPrice {
    /// Prompt (request) tokens.
    pub request: f64,
    /// Completion (response) tokens.
    pub response: f64,
}

impl ModelPrice {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        for (side, value) in [("request", self.request), ("response", self.response)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "pricing.{name}.{side} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Per-model overrides, merged over the built-in table.
    #[serde(default)]
    pub models: HashMap<String, ModelPrice>,

    /// Tier for unknown models. Defaults to gpt-3.5-turbo pricing.
    #[serde(default)]
    pub default: Option<ModelPrice>,
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (model, price) in &self.models {
            price.validate(&format!("models.{model}"))?;
        }
        if let Some(price) = &self.default {
            price.validate("default")?;
        }
        Ok(())
    }
}

/// Integer pricing for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelPricing {
    /// Cost per 1M prompt tokens in microcents.
    pub input_per_1m_tokens: i64,
    /// Cost per 1M completion tokens in microcents.
    pub output_per_1m_tokens: i64,
}

impl ModelPricing {
    /// Convert dollars per 1k tokens to microcents per 1M tokens.
    ///
    /// $0.03/1k = $30/1M = 30_000_000 microcents/1M
    pub fn from_dollars_per_1k(price: ModelPrice) -> Self {
        Self {
            input_per_1m_tokens: dollars_to_microcents(price.request * 1000.0),
            output_per_1m_tokens: dollars_to_microcents(price.response * 1000.0),
        }
    }
}

const GPT_35_TURBO: ModelPrice = ModelPrice {
    request: 0.0015,
    response: 0.002,
};

const BUILTIN_PRICES: &[(&str, ModelPrice)] = &[
    (
        "gpt-4",
        ModelPrice {
            request: 0.03,
            response: 0.06,
        },
    ),
    (
        "gpt-4-turbo",
        ModelPrice {
            request: 0.01,
            response: 0.03,
        },
    ),
    (
        "gpt-4-turbo-preview",
        ModelPrice {
            request: 0.01,
            response: 0.03,
        },
    ),
    ("gpt-3.5-turbo", GPT_35_TURBO),
    ("gpt-3.5-turbo-16k", GPT_35_TURBO),
];

/// Resolved price table used by reconciliation.
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
    default: ModelPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

impl PricingTable {
    pub fn from_config(config: &PricingConfig) -> Self {
        let mut models: HashMap<String, ModelPricing> = BUILTIN_PRICES
            .iter()
            .map(|(name, price)| (name.to_string(), ModelPricing::from_dollars_per_1k(*price)))
            .collect();
        for (name, price) in &config.models {
            models.insert(name.clone(), ModelPricing::from_dollars_per_1k(*price));
        }

        Self {
            models,
            default: ModelPricing::from_dollars_per_1k(config.default.unwrap_or(GPT_35_TURBO)),
        }
    }

    /// Pricing for `model`, falling back to the default tier.
    pub fn get(&self, model: &str) -> &ModelPricing {
        self.models.get(model).unwrap_or(&self.default)
    }

    pub fn is_known(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Cost in microcents of a request to `model`.
    ///
    /// Negative token counts count as zero. Uses `i128` intermediates and
    /// saturates at `i64::MAX`.
    pub fn cost(&self, model: &str, prompt_tokens: i64, completion_tokens: i64) -> i64 {
        compute_cost(self.get(model), prompt_tokens, completion_tokens)
    }
}

fn compute_cost(pricing: &ModelPricing, prompt_tokens: i64, completion_tokens: i64) -> i64 {
    let prompt = prompt_tokens.max(0) as i128;
    let completion = completion_tokens.max(0) as i128;

    let total = (prompt * pricing.input_per_1m_tokens as i128
        + completion * pricing.output_per_1m_tokens as i128)
        / 1_000_000;

    saturate_to_i64(total)
}

/// Exact dollar value of a microcent amount, for display.
pub fn microcents_to_dollars(microcents: i64) -> Decimal {
    Decimal::new(microcents, 6)
}

/// Whole cents for payment providers, truncating sub-cent remainders.
pub fn microcents_to_cents(microcents: i64) -> i64 {
    microcents / 10_000
}

/// Microcents from a payment provider's whole-cent amount.
pub fn cents_to_microcents(cents: i64) -> i64 {
    cents.saturating_mul(10_000)
}

fn saturate_to_i64(value: i128) -> i64 {
    if value > i64::MAX as i128 {
        i64::MAX
    } else if value < i64::MIN as i128 {
        i64::MIN
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_from_dollars_per_1k() {
        let pricing = ModelPricing::from_dollars_per_1k(ModelPrice {
            request: 0.03,
            response: 0.06,
        });
        assert_eq!(pricing.input_per_1m_tokens, 30_000_000);
        assert_eq!(pricing.output_per_1m_tokens, 60_000_000);
    }

    #[rstest]
    // 1000 * $0.03/1k + 500 * $0.06/1k = $0.06
    #[case("gpt-4", 1000, 500, 60_000)]
    // 2000 * $0.01/1k + 1000 * $0.03/1k = $0.05
    #[case("gpt-4-turbo", 2000, 1000, 50_000)]
    #[case("gpt-4-turbo-preview", 2000, 1000, 50_000)]
    // 1000 * $0.0015/1k + 1000 * $0.002/1k = $0.0035
    #[case("gpt-3.5-turbo", 1000, 1000, 3_500)]
    #[case("gpt-3.5-turbo-16k", 1000, 1000, 3_500)]
    #[case("some-unknown-model", 1000, 1000, 3_500)]
    #[case("gpt-4", 0, 0, 0)]
    fn test_builtin_cost(
        #[case] model: &str,
        #[case] prompt: i64,
        #[case] completion: i64,
        #[case] expected: i64,
    ) {
        let table = PricingTable::default();
        assert_eq!(table.cost(model, prompt, completion), expected);
    }

    #[test]
    fn test_negative_tokens_clamped() {
        let table = PricingTable::default();
        assert_eq!(table.cost("gpt-4", -500, 1000), 60_000);
        assert_eq!(table.cost("gpt-4", -1, -1), 0);
    }

    #[test]
    fn test_overflow_saturates() {
        let table = PricingTable::default();
        assert_eq!(table.cost("gpt-4", i64::MAX, i64::MAX), i64::MAX);
    }

    #[test]
    fn test_config_overrides_and_default_tier() {
        let config: PricingConfig = toml::from_str(
            r#"
            [models.gpt-4]
            request = 0.001
            response = 0.001

            [models.claude-3-opus]
            request = 0.015
            response = 0.075

            [default]
            request = 0.0
            response = 0.0
        "#,
        )
        .unwrap();
        config.validate().unwrap();

        let table = PricingTable::from_config(&config);
        // overrides replace builtins, the rest stay
        assert_eq!(table.cost("gpt-4", 1000, 1000), 2_000);
        assert_eq!(table.cost("gpt-3.5-turbo", 1000, 1000), 3_500);
        // 1000 * $0.015/1k + 1000 * $0.075/1k = $0.09
        assert_eq!(table.cost("claude-3-opus", 1000, 1000), 90_000);
        assert!(table.is_known("claude-3-opus"));
        assert_eq!(table.cost("mystery", 1000, 1000), 0);
    }

    #[test]
    fn test_negative_price_rejected() {
        let config: PricingConfig = toml::from_str(
            r#"
            [models.bad]
            request = -0.01
            response = 0.01
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(microcents_to_dollars(60_000).to_string(), "0.060000");
        assert_eq!(microcents_to_dollars(-2_500_000).to_string(), "-2.500000");
        assert_eq!(microcents_to_cents(25_000_000), 2_500);
        assert_eq!(microcents_to_cents(9_999), 0);
        assert_eq!(cents_to_microcents(2_500), 25_000_000);
    }
}

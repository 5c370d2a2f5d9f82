//! Payment provider integration.
//!
//! Auto-top-up charges a stored payment method through a [`PaymentGateway`];
//! the provider later confirms or fails the payment through a signed
//! webhook handled in [`webhook`].

mod stripe;
pub mod webhook;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub use self::stripe::StripeGateway;
use crate::config::PaymentsConfig;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Organization has no payment method on file")]
    NoPaymentMethod,

    #[error("No payment provider configured")]
    NotConfigured,

    #[error("Payment declined ({code}): {message}")]
    Declined { code: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Payment provider returned {status}: {message}")]
    Provider { status: u16, message: String },
}

pub type PaymentResult<T> = Result<T, PaymentError>;

/// An off-session charge against a stored payment method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub customer_id: Option<String>,
    pub payment_method_id: String,
    pub description: String,
    /// Replays with the same key return the original charge.
    pub idempotency_key: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeResult {
    /// Provider's id for the payment (e.g. `pi_...`).
    pub payment_reference: String,
    pub status: String,
    pub amount_cents: i64,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge and confirm in one call. Anything short of a succeeded payment
    /// is an error.
    async fn charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResult>;
}

/// Build the configured gateway, if any.
pub fn from_config(
    config: &PaymentsConfig,
    http: reqwest::Client,
) -> Option<Arc<dyn PaymentGateway>> {
    match config {
        PaymentsConfig::None => None,
        PaymentsConfig::Stripe(cfg) => Some(Arc::new(StripeGateway::new(
            http,
            cfg.base_url.clone(),
            cfg.api_key.clone(),
            Duration::from_secs(cfg.timeout_secs),
        ))),
    }
}

//! Payment provider webhooks.
//!
//! Stripe signs each delivery with `Stripe-Signature: t=<unix>,v1=<hex>`
//! where the signature is HMAC-SHA256 of `<t>.<raw body>` under the endpoint
//! secret. Deliveries are at-least-once, so every effect here is idempotent.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::StripeConfig,
    db::{DbError, DbPool},
    models::TopUpSource,
    observability::metrics,
    pricing::cents_to_microcents,
    services::{CreditSource, WalletCredit, WalletError, WalletService},
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Missing {SIGNATURE_HEADER} header")]
    MissingSignature,

    #[error("Webhook signature does not match")]
    InvalidSignature,

    #[error("Webhook timestamp outside tolerance")]
    Expired,

    #[error("Malformed webhook payload: {0}")]
    Malformed(String),

    #[error("Payment {0} has no organizationId in metadata")]
    MissingOrganization(String),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl WebhookError {
    /// Client errors are not retried by the provider; server errors are.
    pub fn is_client_error(&self) -> bool {
        match self {
            WebhookError::MissingSignature
            | WebhookError::InvalidSignature
            | WebhookError::Expired
            | WebhookError::Malformed(_)
            | WebhookError::MissingOrganization(_) => true,
            WebhookError::Wallet(WalletError::OrganizationNotFound(_))
            | WebhookError::Wallet(WalletError::InvalidAmount(_))
            | WebhookError::Wallet(WalletError::TransactionNotFound(_)) => true,
            WebhookError::Wallet(_) | WebhookError::Db(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited { transaction_id: Uuid },
    AlreadyApplied,
    MarkedFailed { found: bool },
    Ignored { event_type: String },
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: PaymentIntentObject,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentIntentObject {
    #[serde(default)]
    id: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    amount_received: Option<i64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    last_payment_error: Option<PaymentErrorObject>,
}

#[derive(Debug, Deserialize)]
struct PaymentErrorObject {
    #[serde(default)]
    message: Option<String>,
}

/// Check a `Stripe-Signature` header against the raw body.
///
/// Any `v1` entry may match; providers send several while rotating secrets.
pub fn verify_signature(
    header: &str,
    body: &[u8],
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(WebhookError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(WebhookError::InvalidSignature);
    }

    let age = now.timestamp().abs_diff(timestamp);
    if age > tolerance.as_secs() {
        return Err(WebhookError::Expired);
    }

    let expected = hex::encode(sign(secret, timestamp, body)?);
    let matched = signatures
        .iter()
        .any(|sig| bool::from(sig.as_bytes().ct_eq(expected.as_bytes())));
    if matched {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

fn sign(secret: &str, timestamp: i64, body: &[u8]) -> Result<Vec<u8>, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub struct PaymentWebhookHandler {
    db: Arc<DbPool>,
    wallet: Arc<WalletService>,
    clock: Arc<dyn Clock>,
    secret: Option<String>,
    tolerance: Duration,
}

impl PaymentWebhookHandler {
    pub fn new(
        db: Arc<DbPool>,
        wallet: Arc<WalletService>,
        clock: Arc<dyn Clock>,
        config: &StripeConfig,
    ) -> Self {
        Self {
            db,
            wallet,
            clock,
            secret: config.webhook_secret.clone(),
            tolerance: Duration::from_secs(config.webhook_tolerance_secs),
        }
    }

    /// Verify (when a secret is configured) and apply one delivery.
    pub async fn handle(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, WebhookError> {
        if let Some(secret) = &self.secret {
            let header = signature.ok_or(WebhookError::MissingSignature)?;
            verify_signature(header, body, secret, self.tolerance, self.clock.now())?;
        }

        let event: Event =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Payment webhook received");

        match event.event_type.as_str() {
            "payment_intent.succeeded" => self.payment_succeeded(event.data.object).await,
            "payment_intent.payment_failed" => self.payment_failed(event.data.object).await,
            _ => Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            }),
        }
    }

    async fn payment_succeeded(
        &self,
        intent: PaymentIntentObject,
    ) -> Result<WebhookOutcome, WebhookError> {
        if intent.id.is_empty() {
            return Err(WebhookError::Malformed("payment intent has no id".into()));
        }
        let org_id = intent
            .metadata
            .get("organizationId")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WebhookError::MissingOrganization(intent.id.clone()))?;
        let amount = cents_to_microcents(intent.amount_received.unwrap_or(intent.amount));

        let source = match transaction_id(&intent) {
            Some(id) => CreditSource::PendingTransaction {
                id,
                payment_reference: Some(intent.id.clone()),
            },
            None => CreditSource::Payment {
                source: TopUpSource::Webhook,
                payment_reference: intent.id.clone(),
            },
        };

        match self.wallet.credit(org_id, amount, source).await? {
            WalletCredit::Applied { transaction_id, .. } => {
                metrics::record_top_up("webhook", "credited");
                tracing::info!(
                    org_id = %org_id,
                    payment_intent = %intent.id,
                    amount = amount,
                    "Wallet credited from payment webhook"
                );
                Ok(WebhookOutcome::Credited { transaction_id })
            }
            WalletCredit::AlreadyApplied => {
                metrics::record_top_up("webhook", "already_applied");
                Ok(WebhookOutcome::AlreadyApplied)
            }
        }
    }

    async fn payment_failed(
        &self,
        intent: PaymentIntentObject,
    ) -> Result<WebhookOutcome, WebhookError> {
        let reason = intent
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "payment failed".to_string());
        let top_ups = self.db.top_ups();
        let now = self.clock.now();

        let found = match transaction_id(&intent) {
            Some(id) => top_ups.mark_failed(id, &reason, now).await?,
            None => {
                top_ups
                    .mark_failed_by_reference(&intent.id, &reason, now)
                    .await?
            }
        };
        metrics::record_top_up("webhook", "failed");
        tracing::warn!(
            payment_intent = %intent.id,
            found = found,
            reason = %reason,
            "Payment failed"
        );
        Ok(WebhookOutcome::MarkedFailed { found })
    }
}

fn transaction_id(intent: &PaymentIntentObject) -> Option<Uuid> {
    intent
        .metadata
        .get("transactionId")
        .and_then(|id| Uuid::parse_str(id).ok())
}

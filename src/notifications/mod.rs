//! Outbound notifications about billing and wallet events.
//!
//! The ledger does not format or send email itself. It hands structured
//! notifications to a [`Notifier`], which either logs them or forwards them
//! to a webhook that owns delivery.

mod log;
mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub use self::log::LogNotifier;
pub use self::webhook::WebhookNotifier;
use crate::{
    config::NotificationsConfig,
    models::BillingBreakdown,
    pricing::microcents_to_dollars,
    services::LimitKind,
};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification endpoint returned {status}")]
    Status { status: u16 },
}

pub type NotificationResult<T> = Result<T, NotificationError>;

/// Daily billing settled for an organization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingSummary {
    pub org_id: String,
    pub org_name: String,
    pub email: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_tokens: i64,
    pub total_cost: i64,
    pub amount_deducted: i64,
    pub balance_after: i64,
    pub breakdown: BillingBreakdown,
}

/// Wallet balance crossed below the alert threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowBalanceAlert {
    pub org_id: String,
    pub org_name: String,
    pub email: Option<String>,
    pub balance: i64,
    pub threshold: i64,
}

/// Wallet replenished by an automatic top-up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoTopUpNotice {
    pub org_id: String,
    pub org_name: String,
    pub email: Option<String>,
    pub transaction_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
}

/// A consumption limit check denied a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitWarning {
    pub org_id: String,
    pub org_name: String,
    pub email: Option<String>,
    pub user_id: String,
    pub kind: LimitKind,
    pub current: i64,
    pub limit: i64,
}

/// Every notification the ledger emits. Amounts are microcents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    BillingSummary(BillingSummary),
    LowBalance(LowBalanceAlert),
    AutoTopUp(AutoTopUpNotice),
    ConsumptionLimitWarning(LimitWarning),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::BillingSummary(_) => "billing_summary",
            Notification::LowBalance(_) => "low_balance",
            Notification::AutoTopUp(_) => "auto_top_up",
            Notification::ConsumptionLimitWarning(_) => "consumption_limit_warning",
        }
    }

    pub fn org_id(&self) -> &str {
        match self {
            Notification::BillingSummary(n) => &n.org_id,
            Notification::LowBalance(n) => &n.org_id,
            Notification::AutoTopUp(n) => &n.org_id,
            Notification::ConsumptionLimitWarning(n) => &n.org_id,
        }
    }

    pub fn recipient(&self) -> Option<&str> {
        match self {
            Notification::BillingSummary(n) => Some(&n.email),
            Notification::LowBalance(n) => n.email.as_deref(),
            Notification::AutoTopUp(n) => n.email.as_deref(),
            Notification::ConsumptionLimitWarning(n) => n.email.as_deref(),
        }
    }

    /// One-line human summary.
    pub fn message(&self) -> String {
        match self {
            Notification::BillingSummary(n) => format!(
                "{}: {} tokens billed for {}, {} deducted, balance {}",
                n.org_name,
                format_tokens(n.total_tokens),
                n.period_start.format("%Y-%m-%d"),
                format_dollars(n.amount_deducted),
                format_dollars(n.balance_after),
            ),
            Notification::LowBalance(n) => format!(
                "{}: wallet balance {} is below {}",
                n.org_name,
                format_dollars(n.balance),
                format_dollars(n.threshold),
            ),
            Notification::AutoTopUp(n) => format!(
                "{}: wallet topped up with {}, balance {}",
                n.org_name,
                format_dollars(n.amount),
                format_dollars(n.balance_after),
            ),
            Notification::ConsumptionLimitWarning(n) => format!(
                "{}: {} limit reached for user {} ({} of {} tokens)",
                n.org_name,
                n.kind,
                n.user_id,
                format_tokens(n.current),
                format_tokens(n.limit),
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> NotificationResult<()>;

    async fn billing_summary(&self, summary: BillingSummary) -> NotificationResult<()> {
        self.notify(Notification::BillingSummary(summary)).await
    }

    async fn low_balance(&self, alert: LowBalanceAlert) -> NotificationResult<()> {
        self.notify(Notification::LowBalance(alert)).await
    }

    async fn auto_top_up(&self, notice: AutoTopUpNotice) -> NotificationResult<()> {
        self.notify(Notification::AutoTopUp(notice)).await
    }

    async fn consumption_limit_warning(&self, warning: LimitWarning) -> NotificationResult<()> {
        self.notify(Notification::ConsumptionLimitWarning(warning))
            .await
    }
}

pub fn from_config(config: &NotificationsConfig, http: reqwest::Client) -> Arc<dyn Notifier> {
    match config {
        NotificationsConfig::Log => Arc::new(LogNotifier),
        NotificationsConfig::Webhook(c) => Arc::new(WebhookNotifier::new(http, c)),
    }
}

/// Render a token count as `950`, `12.5K` or `3.2M`.
pub fn format_tokens(tokens: i64) -> String {
    let abs = tokens.unsigned_abs();
    if abs >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if abs >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

/// Render microcents as dollars with two decimals.
pub fn format_dollars(microcents: i64) -> String {
    let dollars = microcents_to_dollars(microcents).round_dp(2);
    if dollars.is_sign_negative() && !dollars.is_zero() {
        format!("-${:.2}", dollars.abs())
    } else {
        format!("${:.2}", dollars.abs())
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, "0")]
    #[case(999, "999")]
    #[case(1_000, "1.0K")]
    #[case(12_345, "12.3K")]
    #[case(1_500_000, "1.5M")]
    #[case(-2_000, "-2.0K")]
    fn test_format_tokens(#[case] tokens: i64, #[case] expected: &str) {
        assert_eq!(format_tokens(tokens), expected);
    }

    #[rstest]
    #[case(0, "$0.00")]
    #[case(12_345_678, "$12.35")]
    #[case(-2_500_000, "-$2.50")]
    #[case(4_000, "$0.00")]
    fn test_format_dollars(#[case] microcents: i64, #[case] expected: &str) {
        assert_eq!(format_dollars(microcents), expected);
    }

    #[test]
    fn test_notification_serializes_with_type_tag() {
        let notification = Notification::LowBalance(LowBalanceAlert {
            org_id: "acme".into(),
            org_name: "Acme".into(),
            email: Some("billing@acme.example".into()),
            balance: 5_000_000,
            threshold: 10_000_000,
        });
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "low_balance");
        assert_eq!(json["balance"], 5_000_000);
        assert_eq!(
            notification.message(),
            "Acme: wallet balance $5.00 is below $10.00"
        );
    }

    #[test]
    fn test_limit_warning_message() {
        let notification = Notification::ConsumptionLimitWarning(LimitWarning {
            org_id: "acme".into(),
            org_name: "Acme".into(),
            email: None,
            user_id: "u-1".into(),
            kind: LimitKind::Daily,
            current: 98_000,
            limit: 100_000,
        });
        assert_eq!(
            notification.message(),
            "Acme: daily limit reached for user u-1 (98.0K of 100.0K tokens)"
        );
        assert_eq!(notification.recipient(), None);
    }
}

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    /// The full cost was deducted.
    Completed,
    /// Less than the full cost was deducted (balance floored at zero).
    Partial,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Completed => "completed",
            BillingStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(BillingStatus::Completed),
            "partial" => Ok(BillingStatus::Partial),
            other => Err(format!("unknown billing status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCost {
    pub tokens: i64,
    pub cost: i64,
}

impl TokenCost {
    pub fn add(&mut self, tokens: i64, cost: i64) {
        self.tokens = self.tokens.saturating_add(tokens);
        self.cost = self.cost.saturating_add(cost);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingBreakdown {
    pub by_assistant: BTreeMap<String, TokenCost>,
    pub by_user: BTreeMap<String, TokenCost>,
}

/// One settled billing period for one organization. Never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingHistoryEntry {
    pub id: Uuid,
    pub org_id: String,
    pub billing_date: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_tokens: i64,
    pub total_cost: i64,
    pub amount_deducted: i64,
    pub breakdown: BillingBreakdown,
    pub wallet_balance_before: i64,
    pub wallet_balance_after: i64,
    pub status: BillingStatus,
    pub created_at: DateTime<Utc>,
}

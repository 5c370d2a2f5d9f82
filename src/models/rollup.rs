use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::TokenCost;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUsage {
    pub tokens: i64,
    pub cost: i64,
    pub requests: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupBreakdown {
    pub by_assistant: BTreeMap<String, TokenCost>,
    pub by_user: BTreeMap<String, TokenCost>,
    /// Only filled for monthly rollups.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_project: BTreeMap<String, ProjectUsage>,
}

/// Consumption for one organization on one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRollup {
    pub org_id: String,
    pub date: NaiveDate,
    pub total_tokens: i64,
    pub total_cost: i64,
    pub request_count: i64,
    pub breakdown: RollupBreakdown,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Consumption for one organization in one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRollup {
    pub org_id: String,
    /// `YYYY-MM`
    pub month: String,
    pub total_tokens: i64,
    pub total_cost: i64,
    pub request_count: i64,
    pub breakdown: RollupBreakdown,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl OrganizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationStatus::Active => "active",
            OrganizationStatus::Inactive => "inactive",
            OrganizationStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for OrganizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganizationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(OrganizationStatus::Active),
            "inactive" => Ok(OrganizationStatus::Inactive),
            "suspended" => Ok(OrganizationStatus::Suspended),
            other => Err(format!("unknown organization status: {other}")),
        }
    }
}

/// A tenant and its prepaid wallet.
///
/// Amounts are in microcents. `version` increases by one with every wallet
/// mutation and is the compare-and-swap token for those mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// External tenant key.
    pub org_id: String,
    pub name: String,
    pub contact_email: Option<String>,
    pub billing_email: Option<String>,
    pub wallet_balance: i64,
    pub credit_limit: i64,
    pub auto_top_up: AutoTopUpSettings,
    pub consumption_limits: ConsumptionLimits,
    pub status: OrganizationStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTopUpSettings {
    pub enabled: bool,
    /// Top up when the balance falls below this (microcents).
    pub threshold: i64,
    /// Amount charged per top-up (microcents).
    pub amount: i64,
    pub payment_method_id: Option<String>,
    /// Payment-provider customer that owns the payment method.
    pub customer_id: Option<String>,
}

/// Token limits; 0 means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionLimits {
    pub monthly: i64,
    pub daily: i64,
    pub per_user: i64,
}

/// Input for creating an organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub org_id: String,
    pub name: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub billing_email: Option<String>,
    #[serde(default)]
    pub wallet_balance: i64,
    #[serde(default)]
    pub credit_limit: i64,
    #[serde(default)]
    pub auto_top_up: AutoTopUpSettings,
    #[serde(default)]
    pub consumption_limits: ConsumptionLimits,
}

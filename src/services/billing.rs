//! Daily settlement of usage cost against organization wallets.
//!
//! A run bills the UTC day before `as_of`. Each organization is settled in
//! its own database transaction that compares the wallet version, writes the
//! new balance and inserts a billing-history entry unique on
//! (org, period). Re-running a period therefore finds the entry and skips,
//! and a concurrent top-up forces a fresh read instead of being overwritten.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::{SideEffect, wallet::conflict_backoff};
use crate::{
    clock::{self, Clock},
    config::{BillingConfig, NegativeBalancePolicy},
    db::{DbError, DbPool, SettleOutcome, TimeRange},
    models::{BillingBreakdown, BillingHistoryEntry, BillingStatus, Organization, UsageGroup},
    notifications::{BillingSummary, LowBalanceAlert, Notifier},
    observability::metrics,
};

/// Breakdown key for usage with no assistant type.
const UNKNOWN_ASSISTANT: &str = "unknown";

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    #[error("Wallet of {org_id} changed concurrently on all {attempts} attempts")]
    Conflict { org_id: String, attempts: u32 },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// One organization's usage over a billing period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgUsage {
    pub total_tokens: i64,
    pub total_cost: i64,
    pub breakdown: BillingBreakdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgBillingOutcome {
    Billed {
        entry_id: Uuid,
        amount_deducted: i64,
        balance_before: i64,
        balance_after: i64,
        summary: SideEffect,
        low_balance: SideEffect,
    },
    AlreadyBilled,
    Failed(String),
}

impl OrgBillingOutcome {
    fn label(&self) -> &'static str {
        match self {
            OrgBillingOutcome::Billed { .. } => "billed",
            OrgBillingOutcome::AlreadyBilled => "already_billed",
            OrgBillingOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingRunResult {
    pub period: TimeRange,
    pub organizations: BTreeMap<String, OrgBillingOutcome>,
}

impl BillingRunResult {
    pub fn billed(&self) -> usize {
        self.count(|o| matches!(o, OrgBillingOutcome::Billed { .. }))
    }

    pub fn already_billed(&self) -> usize {
        self.count(|o| matches!(o, OrgBillingOutcome::AlreadyBilled))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, OrgBillingOutcome::Failed(_)))
    }

    pub fn total_deducted(&self) -> i64 {
        self.organizations
            .values()
            .filter_map(|o| match o {
                OrgBillingOutcome::Billed {
                    amount_deducted, ..
                } => Some(*amount_deducted),
                _ => None,
            })
            .fold(0i64, i64::saturating_add)
    }

    fn count(&self, f: impl Fn(&OrgBillingOutcome) -> bool) -> usize {
        self.organizations.values().filter(|o| f(o)).count()
    }
}

pub struct BillingService {
    db: Arc<DbPool>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    low_balance_threshold: i64,
    negative_balance: NegativeBalancePolicy,
}

impl BillingService {
    pub fn new(
        db: Arc<DbPool>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: &BillingConfig,
    ) -> Self {
        Self {
            db,
            notifier,
            clock,
            max_attempts: config.max_wallet_retries.max(1),
            low_balance_threshold: config.low_balance_threshold(),
            negative_balance: config.negative_balance,
        }
    }

    /// Bill every organization for the UTC day before `as_of`.
    ///
    /// Only the usage query can fail the run; per-organization failures are
    /// recorded in the result.
    #[tracing::instrument(name = "billing.run", skip(self), fields(as_of = %as_of))]
    pub async fn run_daily_billing(&self, as_of: DateTime<Utc>) -> Result<BillingRunResult, DbError> {
        let period = billing_period(as_of);
        let groups = self.db.usage().usage_groups(period, true).await?;
        let usage = aggregate_by_org(&groups);

        tracing::info!(
            period_start = %period.start,
            period_end = %period.end,
            organizations = usage.len(),
            "Starting daily billing"
        );

        let mut organizations = BTreeMap::new();
        for (org_id, org_usage) in usage {
            if org_usage.total_tokens == 0 && org_usage.total_cost == 0 {
                continue;
            }

            let outcome = match self.bill_org(&org_id, &org_usage, period, as_of).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(org_id = %org_id, error = %e, "Failed to bill organization");
                    OrgBillingOutcome::Failed(e.to_string())
                }
            };
            metrics::record_billing_settlement(outcome.label());
            organizations.insert(org_id, outcome);
        }

        let result = BillingRunResult {
            period,
            organizations,
        };
        tracing::info!(
            billed = result.billed(),
            already_billed = result.already_billed(),
            failed = result.failed(),
            total_deducted = result.total_deducted(),
            "Daily billing complete"
        );
        Ok(result)
    }

    async fn bill_org(
        &self,
        org_id: &str,
        usage: &OrgUsage,
        period: TimeRange,
        as_of: DateTime<Utc>,
    ) -> Result<OrgBillingOutcome, BillingError> {
        let billing = self.db.billing();
        let organizations = self.db.organizations();

        for attempt in 1..=self.max_attempts {
            if billing.exists_for_period(org_id, period).await? {
                tracing::info!(org_id = %org_id, "Period already billed, skipping");
                return Ok(OrgBillingOutcome::AlreadyBilled);
            }

            let org = organizations
                .get(org_id)
                .await?
                .ok_or_else(|| BillingError::OrganizationNotFound(org_id.to_string()))?;

            let before = org.wallet_balance;
            let deduction = match self.negative_balance {
                NegativeBalancePolicy::Allow => usage.total_cost,
                NegativeBalancePolicy::FloorAtZero => usage.total_cost.min(before.max(0)),
            };
            let after = before.saturating_sub(deduction);
            let status = if deduction < usage.total_cost {
                BillingStatus::Partial
            } else {
                BillingStatus::Completed
            };

            let entry = BillingHistoryEntry {
                id: Uuid::new_v4(),
                org_id: org_id.to_string(),
                billing_date: as_of,
                period_start: period.start,
                period_end: period.end,
                total_tokens: usage.total_tokens,
                total_cost: usage.total_cost,
                amount_deducted: deduction,
                breakdown: usage.breakdown.clone(),
                wallet_balance_before: before,
                wallet_balance_after: after,
                status,
                created_at: self.clock.now(),
            };

            match billing.settle(&entry, org.version).await? {
                SettleOutcome::Applied => {
                    tracing::info!(
                        org_id = %org_id,
                        total_tokens = usage.total_tokens,
                        total_cost = usage.total_cost,
                        amount_deducted = deduction,
                        balance_before = before,
                        balance_after = after,
                        status = %status,
                        "Organization billed"
                    );
                    let (summary, low_balance) = self.notify(&org, &entry).await;
                    return Ok(OrgBillingOutcome::Billed {
                        entry_id: entry.id,
                        amount_deducted: deduction,
                        balance_before: before,
                        balance_after: after,
                        summary,
                        low_balance,
                    });
                }
                SettleOutcome::AlreadyBilled => {
                    tracing::info!(org_id = %org_id, "Period billed concurrently, skipping");
                    return Ok(OrgBillingOutcome::AlreadyBilled);
                }
                SettleOutcome::VersionConflict => {
                    metrics::record_wallet_conflict("billing");
                    tracing::debug!(org_id = %org_id, attempt = attempt, "Wallet version conflict on deduction");
                    if attempt < self.max_attempts {
                        tokio::time::sleep(conflict_backoff(attempt)).await;
                    }
                }
            }
        }

        Err(BillingError::Conflict {
            org_id: org_id.to_string(),
            attempts: self.max_attempts,
        })
    }

    async fn notify(
        &self,
        org: &Organization,
        entry: &BillingHistoryEntry,
    ) -> (SideEffect, SideEffect) {
        let summary = match &org.billing_email {
            Some(email) => {
                let result = self
                    .notifier
                    .billing_summary(BillingSummary {
                        org_id: org.org_id.clone(),
                        org_name: org.name.clone(),
                        email: email.clone(),
                        period_start: entry.period_start,
                        period_end: entry.period_end,
                        total_tokens: entry.total_tokens,
                        total_cost: entry.total_cost,
                        amount_deducted: entry.amount_deducted,
                        balance_after: entry.wallet_balance_after,
                        breakdown: entry.breakdown.clone(),
                    })
                    .await;
                log_failure(&org.org_id, "billing_summary", &result);
                SideEffect::from_result(result)
            }
            None => SideEffect::Skipped,
        };

        let threshold = self.low_balance_threshold;
        let low_balance =
            if entry.wallet_balance_after < threshold && threshold <= entry.wallet_balance_before {
                let result = self
                    .notifier
                    .low_balance(LowBalanceAlert {
                        org_id: org.org_id.clone(),
                        org_name: org.name.clone(),
                        email: org.billing_email.clone(),
                        balance: entry.wallet_balance_after,
                        threshold,
                    })
                    .await;
                log_failure(&org.org_id, "low_balance", &result);
                SideEffect::from_result(result)
            } else {
                SideEffect::Skipped
            };

        (summary, low_balance)
    }
}

fn log_failure<E: std::fmt::Display>(org_id: &str, kind: &str, result: &Result<(), E>) {
    if let Err(e) = result {
        tracing::warn!(org_id = %org_id, kind = kind, error = %e, "Notification failed");
    }
}

/// `[00:00 UTC of the day before as_of, 00:00 UTC of as_of)`.
pub fn billing_period(as_of: DateTime<Utc>) -> TimeRange {
    let end = clock::start_of_day(as_of);
    TimeRange::new(end - Duration::days(1), end)
}

/// Fold usage groups into per-organization totals.
pub fn aggregate_by_org(groups: &[UsageGroup]) -> BTreeMap<String, OrgUsage> {
    let mut orgs: BTreeMap<String, OrgUsage> = BTreeMap::new();
    for group in groups {
        let usage = orgs.entry(group.org_id.clone()).or_default();
        usage.total_tokens = usage.total_tokens.saturating_add(group.total_tokens);
        usage.total_cost = usage.total_cost.saturating_add(group.cost_microcents);

        let assistant = if group.assistant_type.is_empty() {
            UNKNOWN_ASSISTANT
        } else {
            group.assistant_type.as_str()
        };
        usage
            .breakdown
            .by_assistant
            .entry(assistant.to_string())
            .or_default()
            .add(group.total_tokens, group.cost_microcents);

        if !group.user_id.is_empty() {
            usage
                .breakdown
                .by_user
                .entry(group.user_id.clone())
                .or_default()
                .add(group.total_tokens, group.cost_microcents);
        }
    }
    orgs
}

use async_trait::async_trait;

use super::TimeRange;
use crate::{db::error::DbResult, models::BillingHistoryEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Balance updated and history entry written.
    Applied,
    /// The organization's version moved since it was read; nothing written.
    VersionConflict,
    /// An entry for the same organization and period already exists;
    /// nothing written.
    AlreadyBilled,
}

#[async_trait]
pub trait BillingRepo: Send + Sync {
    async fn exists_for_period(&self, org_id: &str, period: TimeRange) -> DbResult<bool>;

    /// Atomically set the organization's balance to
    /// `entry.wallet_balance_after` (only if its version still equals
    /// `expected_version`) and insert `entry`.
    async fn settle(
        &self,
        entry: &BillingHistoryEntry,
        expected_version: i64,
    ) -> DbResult<SettleOutcome>;

    /// Most recent entries first.
    async fn list_for_org(&self, org_id: &str, limit: i64) -> DbResult<Vec<BillingHistoryEntry>>;
}

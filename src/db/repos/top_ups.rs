use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{TopUpSource, TopUpTransaction},
};

/// Input for a pending top-up created before charging.
#[derive(Debug, Clone)]
pub struct NewTopUp {
    pub org_id: String,
    pub amount: i64,
    pub source: TopUpSource,
    pub created_at: DateTime<Utc>,
}

/// Which transaction a wallet credit settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditTarget {
    /// Complete a transaction created earlier (e.g. by auto-top-up).
    Existing {
        id: Uuid,
        payment_reference: Option<String>,
    },
    /// Record a new succeeded transaction, or complete the pending one with
    /// the same payment reference.
    New {
        source: TopUpSource,
        payment_reference: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied { transaction_id: Uuid },
    VersionConflict,
    /// The transaction or payment reference was already credited.
    AlreadyApplied,
}

#[async_trait]
pub trait TopUpRepo: Send + Sync {
    async fn create_pending(&self, input: NewTopUp) -> DbResult<TopUpTransaction>;

    async fn get(&self, id: Uuid) -> DbResult<Option<TopUpTransaction>>;

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<TopUpTransaction>>;

    /// Mark a pending transaction failed. Returns `false` if it was not pending.
    async fn mark_failed(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> DbResult<bool>;

    /// Mark the pending transaction with this payment reference failed.
    async fn mark_failed_by_reference(
        &self,
        reference: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// In one transaction: settle `target` as succeeded, then add `amount` to
    /// the organization's balance if its version still equals
    /// `expected_version`.
    async fn apply_credit(
        &self,
        org_id: &str,
        amount: i64,
        target: &CreditTarget,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> DbResult<CreditOutcome>;
}

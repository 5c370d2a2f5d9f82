//! Wallet credits with optimistic concurrency.
//!
//! Every balance mutation compares the organization's `version` and bumps it,
//! so two writers racing on the same wallet cannot both win. The loser re-reads
//! and tries again after a short jittered pause.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::{CreditOutcome, CreditTarget, DbError, DbPool},
    models::TopUpSource,
    observability::metrics,
};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    #[error("Credit amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Top-up transaction {0} not found for this organization")]
    TransactionNotFound(Uuid),

    #[error("Wallet of {org_id} changed concurrently on all {attempts} attempts")]
    Conflict { org_id: String, attempts: u32 },

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type WalletResult<T> = Result<T, WalletError>;

/// What a credit pays for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditSource {
    /// Completes a pending top-up transaction created before charging.
    PendingTransaction {
        id: Uuid,
        payment_reference: Option<String>,
    },
    /// A payment confirmed by the provider with no pending transaction of
    /// ours. Idempotent on the payment reference.
    Payment {
        source: TopUpSource,
        payment_reference: String,
    },
}

impl CreditSource {
    fn into_target(self) -> CreditTarget {
        match self {
            CreditSource::PendingTransaction {
                id,
                payment_reference,
            } => CreditTarget::Existing {
                id,
                payment_reference,
            },
            CreditSource::Payment {
                source,
                payment_reference,
            } => CreditTarget::New {
                source,
                payment_reference: Some(payment_reference),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletCredit {
    Applied {
        transaction_id: Uuid,
        balance_before: i64,
        balance_after: i64,
    },
    /// The transaction or payment was credited before; nothing changed.
    AlreadyApplied,
}

pub struct WalletService {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl WalletService {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            db,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Add `amount` microcents to the wallet and mark the top-up succeeded,
    /// in one transaction.
    #[tracing::instrument(name = "wallet.credit", skip(self, source), fields(org_id = %org_id, amount = amount))]
    pub async fn credit(
        &self,
        org_id: &str,
        amount: i64,
        source: CreditSource,
    ) -> WalletResult<WalletCredit> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount(amount));
        }

        let target = source.into_target();
        let organizations = self.db.organizations();
        let top_ups = self.db.top_ups();

        for attempt in 1..=self.max_attempts {
            let org = organizations
                .get(org_id)
                .await?
                .ok_or_else(|| WalletError::OrganizationNotFound(org_id.to_string()))?;

            let outcome = top_ups
                .apply_credit(org_id, amount, &target, org.version, self.clock.now())
                .await
                .map_err(|e| match (&target, e) {
                    (CreditTarget::Existing { id, .. }, DbError::NotFound) => {
                        WalletError::TransactionNotFound(*id)
                    }
                    (_, e) => WalletError::Db(e),
                })?;

            match outcome {
                CreditOutcome::Applied { transaction_id } => {
                    let balance_after = org.wallet_balance.saturating_add(amount);
                    tracing::info!(
                        transaction_id = %transaction_id,
                        balance_before = org.wallet_balance,
                        balance_after = balance_after,
                        "Wallet credited"
                    );
                    return Ok(WalletCredit::Applied {
                        transaction_id,
                        balance_before: org.wallet_balance,
                        balance_after,
                    });
                }
                CreditOutcome::AlreadyApplied => {
                    tracing::info!("Top-up already credited, skipping");
                    return Ok(WalletCredit::AlreadyApplied);
                }
                CreditOutcome::VersionConflict => {
                    metrics::record_wallet_conflict("credit");
                    tracing::debug!(attempt = attempt, "Wallet version conflict on credit");
                    if attempt < self.max_attempts {
                        tokio::time::sleep(conflict_backoff(attempt)).await;
                    }
                }
            }
        }

        Err(WalletError::Conflict {
            org_id: org_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}

/// Pause before retrying a lost version check: up to 10ms doubling per
/// attempt, capped at 200ms, with full jitter.
pub(crate) fn conflict_backoff(attempt: u32) -> Duration {
    let cap_ms = 10u64
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(5))
        .min(200);
    Duration::from_millis(rand::thread_rng().gen_range(0..=cap_ms))
}

//! Automatic wallet replenishment.
//!
//! A pending transaction is written before the charge so its id can serve as
//! the provider idempotency key. A crash between charge and credit leaves
//! the transaction pending; the provider's `payment_intent.succeeded`
//! webhook carries the id and completes it. Organizations with a pending
//! auto-top-up younger than [`PENDING_HOLD`] are skipped so a charge that
//! has not been credited yet is never repeated.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{
    SideEffect,
    wallet::{CreditSource, WalletCredit, WalletService},
};
use crate::{
    clock::Clock,
    config::AutoTopUpConfig,
    db::{DbPool, DbResult, NewTopUp},
    models::{Organization, TopUpSource},
    notifications::{AutoTopUpNotice, Notifier},
    observability::metrics,
    payments::{ChargeRequest, PaymentError, PaymentGateway},
    pricing::{cents_to_microcents, microcents_to_cents},
};

/// How long a pending auto-top-up blocks another charge for the same
/// organization. Older pending rows are treated as abandoned.
pub const PENDING_HOLD: Duration = Duration::hours(24);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopUpOutcome {
    Credited {
        transaction_id: Uuid,
        amount: i64,
        balance_after: i64,
        notification: SideEffect,
    },
    /// The transaction was completed by someone else (usually the webhook).
    AlreadyApplied { transaction_id: Uuid },
    Failed {
        transaction_id: Option<Uuid>,
        reason: String,
    },
}

impl TopUpOutcome {
    fn label(&self) -> &'static str {
        match self {
            TopUpOutcome::Credited { .. } => "credited",
            TopUpOutcome::AlreadyApplied { .. } => "already_applied",
            TopUpOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopUpRunResult {
    pub organizations: BTreeMap<String, TopUpOutcome>,
}

impl TopUpRunResult {
    pub fn credited(&self) -> usize {
        self.organizations
            .values()
            .filter(|o| matches!(o, TopUpOutcome::Credited { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.organizations
            .values()
            .filter(|o| matches!(o, TopUpOutcome::Failed { .. }))
            .count()
    }
}

pub struct AutoTopUpService {
    db: Arc<DbPool>,
    wallet: Arc<WalletService>,
    payments: Option<Arc<dyn PaymentGateway>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    enabled: bool,
    currency: String,
}

impl AutoTopUpService {
    pub fn new(
        db: Arc<DbPool>,
        wallet: Arc<WalletService>,
        payments: Option<Arc<dyn PaymentGateway>>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: &AutoTopUpConfig,
    ) -> Self {
        Self {
            db,
            wallet,
            payments,
            notifier,
            clock,
            enabled: config.enabled,
            currency: config.currency.clone(),
        }
    }

    /// Charge and credit every opted-in organization below its threshold.
    #[tracing::instrument(name = "auto_top_up.run", skip(self), fields(as_of = %as_of))]
    pub async fn check_and_process(&self, as_of: DateTime<Utc>) -> DbResult<TopUpRunResult> {
        let mut result = TopUpRunResult::default();
        if !self.enabled {
            tracing::debug!("Auto-top-up disabled");
            return Ok(result);
        }

        let candidates = self
            .db
            .organizations()
            .list_auto_top_up_candidates(as_of - PENDING_HOLD)
            .await?;
        tracing::info!(candidates = candidates.len(), "Checking auto-top-up");

        for org in candidates {
            let outcome = self.process(&org).await;
            metrics::record_top_up("auto_top_up", outcome.label());
            if let TopUpOutcome::Failed {
                transaction_id,
                reason,
            } = &outcome
            {
                tracing::warn!(
                    org_id = %org.org_id,
                    transaction_id = ?transaction_id,
                    reason = %reason,
                    "Auto-top-up failed"
                );
            }
            result.organizations.insert(org.org_id.clone(), outcome);
        }

        tracing::info!(
            credited = result.credited(),
            failed = result.failed(),
            "Auto-top-up complete"
        );
        Ok(result)
    }

    async fn process(&self, org: &Organization) -> TopUpOutcome {
        let settings = &org.auto_top_up;
        let amount_cents = microcents_to_cents(settings.amount);
        if amount_cents <= 0 {
            return failed(None, format!("invalid top-up amount {}", settings.amount));
        }
        let Some(payment_method_id) = settings.payment_method_id.clone() else {
            return failed(None, PaymentError::NoPaymentMethod.to_string());
        };
        let Some(gateway) = &self.payments else {
            return failed(None, PaymentError::NotConfigured.to_string());
        };

        // The stored amount is whatever actually gets charged
        let amount = cents_to_microcents(amount_cents);
        let pending = match self
            .db
            .top_ups()
            .create_pending(NewTopUp {
                org_id: org.org_id.clone(),
                amount,
                source: TopUpSource::AutoTopUp,
                created_at: self.clock.now(),
            })
            .await
        {
            Ok(tx) => tx,
            Err(e) => return failed(None, e.to_string()),
        };

        let request = ChargeRequest {
            amount_cents,
            currency: self.currency.clone(),
            customer_id: settings.customer_id.clone(),
            payment_method_id,
            description: format!("Automatic wallet top-up for {}", org.org_id),
            idempotency_key: format!("auto-top-up:{}", pending.id),
            metadata: BTreeMap::from([
                ("organizationId".to_string(), org.org_id.clone()),
                ("type".to_string(), "auto_top_up".to_string()),
                ("transactionId".to_string(), pending.id.to_string()),
            ]),
        };

        let charge = match gateway.charge(request).await {
            Ok(charge) => charge,
            Err(e) => {
                let reason = e.to_string();
                let now = self.clock.now();
                if let Err(db_err) = self.db.top_ups().mark_failed(pending.id, &reason, now).await {
                    tracing::error!(
                        transaction_id = %pending.id,
                        error = %db_err,
                        "Failed to mark top-up failed"
                    );
                }
                return failed(Some(pending.id), reason);
            }
        };

        let credited_amount = cents_to_microcents(charge.amount_cents);
        let credit = self
            .wallet
            .credit(
                &org.org_id,
                credited_amount,
                CreditSource::PendingTransaction {
                    id: pending.id,
                    payment_reference: Some(charge.payment_reference.clone()),
                },
            )
            .await;

        match credit {
            Ok(WalletCredit::Applied { balance_after, .. }) => {
                tracing::info!(
                    org_id = %org.org_id,
                    transaction_id = %pending.id,
                    payment_reference = %charge.payment_reference,
                    amount = credited_amount,
                    balance_after = balance_after,
                    "Auto-top-up credited"
                );
                let notification = SideEffect::from_result(
                    self.notifier
                        .auto_top_up(AutoTopUpNotice {
                            org_id: org.org_id.clone(),
                            org_name: org.name.clone(),
                            email: org.billing_email.clone(),
                            transaction_id: pending.id,
                            amount: credited_amount,
                            balance_after,
                        })
                        .await,
                );
                if let SideEffect::Failed(reason) = &notification {
                    tracing::warn!(org_id = %org.org_id, error = %reason, "Top-up notification failed");
                }
                TopUpOutcome::Credited {
                    transaction_id: pending.id,
                    amount: credited_amount,
                    balance_after,
                    notification,
                }
            }
            Ok(WalletCredit::AlreadyApplied) => TopUpOutcome::AlreadyApplied {
                transaction_id: pending.id,
            },
            // The charge went through; the webhook will complete the
            // transaction, so it stays pending rather than being marked failed.
            Err(e) => failed(Some(pending.id), format!("charged but not credited: {e}")),
        }
    }
}

fn failed(transaction_id: Option<Uuid>, reason: String) -> TopUpOutcome {
    TopUpOutcome::Failed {
        transaction_id,
        reason,
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        db::tests::{
            fixtures::{org_input, ts},
            harness::sqlite_db,
        },
        models::{AutoTopUpSettings, CreateOrganization, TopUpStatus},
        notifications::testing::RecordingNotifier,
        payments::testing::FakeGateway,
    };

    struct Fixture {
        db: Arc<DbPool>,
        gateway: Arc<FakeGateway>,
        notifier: Arc<RecordingNotifier>,
        service: AutoTopUpService,
    }

    async fn fixture(gateway: Option<FakeGateway>) -> Fixture {
        let db = Arc::new(sqlite_db().await);
        let clock = Arc::new(ManualClock::new(ts(2025, 3, 1, 6, 0)));
        let wallet = Arc::new(WalletService::new(db.clone(), clock.clone(), 5));
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = gateway.map(Arc::new);
        let payments = gateway
            .clone()
            .map(|g| g as Arc<dyn PaymentGateway>);
        let service = AutoTopUpService::new(
            db.clone(),
            wallet,
            payments,
            notifier.clone(),
            clock,
            &AutoTopUpConfig::default(),
        );
        Fixture {
            db,
            gateway: gateway.unwrap_or_default(),
            notifier,
            service,
        }
    }

    async fn create_org(db: &DbPool, org_id: &str, balance: i64, payment_method: Option<&str>) {
        db.organizations()
            .create(CreateOrganization {
                auto_top_up: AutoTopUpSettings {
                    enabled: true,
                    threshold: 10_000_000,
                    amount: 50_000_000,
                    payment_method_id: payment_method.map(String::from),
                    customer_id: Some("cus_1".into()),
                },
                ..org_input(org_id, balance)
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tops_up_below_threshold() {
        let f = fixture(Some(FakeGateway::default())).await;
        create_org(&f.db, "low", 2_000_000, Some("pm_1")).await;
        create_org(&f.db, "healthy", 80_000_000, Some("pm_2")).await;

        let result = f.service.check_and_process(ts(2025, 3, 1, 6, 0)).await.unwrap();
        assert_eq!(result.organizations.len(), 1);
        let TopUpOutcome::Credited {
            transaction_id,
            amount,
            balance_after,
            notification,
        } = result.organizations["low"].clone()
        else {
            panic!("expected credit, got {:?}", result.organizations["low"]);
        };
        assert_eq!(amount, 50_000_000);
        assert_eq!(balance_after, 52_000_000);
        assert_eq!(notification, SideEffect::Applied);

        let charges = f.gateway.charges.lock();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].amount_cents, 5000);
        assert_eq!(charges[0].idempotency_key, format!("auto-top-up:{transaction_id}"));
        assert_eq!(charges[0].metadata["organizationId"], "low");
        assert_eq!(charges[0].metadata["type"], "auto_top_up");
        drop(charges);

        let tx = f.db.top_ups().get(transaction_id).await.unwrap().unwrap();
        assert_eq!(tx.status, TopUpStatus::Succeeded);
        assert_eq!(tx.payment_reference.as_deref(), Some("pi_1"));
        assert_eq!(tx.created_at, ts(2025, 3, 1, 6, 0));
        assert_eq!(f.notifier.kinds(), vec!["auto_top_up"]);

        // Above threshold now, so a second pass charges nothing
        let again = f.service.check_and_process(ts(2025, 3, 1, 12, 0)).await.unwrap();
        assert!(again.organizations.is_empty());
    }

    #[tokio::test]
    async fn test_missing_payment_method_skips_without_charge() {
        let f = fixture(Some(FakeGateway::default())).await;
        create_org(&f.db, "acme", 0, None).await;

        let result = f.service.check_and_process(ts(2025, 3, 1, 6, 0)).await.unwrap();
        assert!(matches!(
            result.organizations["acme"],
            TopUpOutcome::Failed {
                transaction_id: None,
                ..
            }
        ));
        assert!(f.gateway.charges.lock().is_empty());
    }

    #[tokio::test]
    async fn test_decline_marks_transaction_failed() {
        let f = fixture(Some(FakeGateway::declining())).await;
        create_org(&f.db, "acme", 0, Some("pm_1")).await;

        let result = f.service.check_and_process(ts(2025, 3, 1, 6, 0)).await.unwrap();
        let TopUpOutcome::Failed {
            transaction_id: Some(id),
            reason,
        } = result.organizations["acme"].clone()
        else {
            panic!("expected failure");
        };
        assert!(reason.contains("card_declined"));

        let tx = f.db.top_ups().get(id).await.unwrap().unwrap();
        assert_eq!(tx.status, TopUpStatus::Failed);
        assert_eq!(tx.completed_at, Some(ts(2025, 3, 1, 6, 0)));
        let org = f.db.organizations().get("acme").await.unwrap().unwrap();
        assert_eq!(org.wallet_balance, 0);
        assert!(f.notifier.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_decline_does_not_stop_other_organizations() {
        let f = fixture(Some(FakeGateway::declining_method("pm_bad"))).await;
        create_org(&f.db, "declined", 0, Some("pm_bad")).await;
        create_org(&f.db, "paid", 1_000_000, Some("pm_good")).await;

        let result = f.service.check_and_process(ts(2025, 3, 1, 6, 0)).await.unwrap();
        assert_eq!(result.organizations.len(), 2);
        assert_eq!(result.credited(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(f.gateway.charges.lock().len(), 2);

        let TopUpOutcome::Failed {
            transaction_id: Some(failed_id),
            ..
        } = result.organizations["declined"].clone()
        else {
            panic!("expected failure, got {:?}", result.organizations["declined"]);
        };
        let tx = f.db.top_ups().get(failed_id).await.unwrap().unwrap();
        assert_eq!(tx.status, TopUpStatus::Failed);
        let declined = f.db.organizations().get("declined").await.unwrap().unwrap();
        assert_eq!(declined.wallet_balance, 0);

        assert!(matches!(
            result.organizations["paid"],
            TopUpOutcome::Credited {
                balance_after: 51_000_000,
                ..
            }
        ));
        let paid = f.db.organizations().get("paid").await.unwrap().unwrap();
        assert_eq!(paid.wallet_balance, 51_000_000);
        assert_eq!(f.notifier.kinds(), vec!["auto_top_up"]);
    }

    #[tokio::test]
    async fn test_pending_top_up_blocks_another_charge() {
        let f = fixture(Some(FakeGateway::default())).await;
        create_org(&f.db, "acme", 0, Some("pm_1")).await;
        // A charge from an earlier run that was never credited
        let pending = f
            .db
            .top_ups()
            .create_pending(NewTopUp {
                org_id: "acme".into(),
                amount: 50_000_000,
                source: TopUpSource::AutoTopUp,
                created_at: ts(2025, 3, 1, 5, 0),
            })
            .await
            .unwrap();

        let result = f.service.check_and_process(ts(2025, 3, 1, 6, 0)).await.unwrap();
        assert!(result.organizations.is_empty());
        assert!(f.gateway.charges.lock().is_empty());

        // Once the hold lapses the pending row is treated as abandoned
        let later = pending.created_at + PENDING_HOLD + Duration::minutes(1);
        let result = f.service.check_and_process(later).await.unwrap();
        assert_eq!(result.credited(), 1);
        assert_eq!(f.gateway.charges.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_no_gateway_configured() {
        let f = fixture(None).await;
        create_org(&f.db, "acme", 0, Some("pm_1")).await;

        let result = f.service.check_and_process(ts(2025, 3, 1, 6, 0)).await.unwrap();
        assert_eq!(result.failed(), 1);
    }
}

//! Shared tests for TopUpRepo implementations

use uuid::Uuid;

use super::fixtures::{org_input, ts};
use crate::{
    db::{
        DbError, DbPool,
        repos::{CreditOutcome, CreditTarget, NewTopUp},
    },
    models::{TopUpSource, TopUpStatus},
};

async fn seed(db: &DbPool) {
    db.organizations()
        .create(org_input("acme", 1_000_000))
        .await
        .expect("create org");
}

pub async fn test_complete_existing_once(db: &DbPool) {
    seed(db).await;
    let top_ups = db.top_ups();
    let pending = top_ups
        .create_pending(NewTopUp {
            org_id: "acme".into(),
            amount: 20_000_000,
            source: TopUpSource::AutoTopUp,
            created_at: ts(2025, 3, 1, 5, 0),
        })
        .await
        .expect("create pending");
    assert_eq!(pending.status, TopUpStatus::Pending);

    let target = CreditTarget::Existing {
        id: pending.id,
        payment_reference: Some("pi_1".into()),
    };
    let now = ts(2025, 3, 1, 6, 0);

    let outcome = top_ups
        .apply_credit("acme", 20_000_000, &target, 0, now)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CreditOutcome::Applied {
            transaction_id: pending.id
        }
    );

    // A replay of the same completion is a no-op
    let again = top_ups
        .apply_credit("acme", 20_000_000, &target, 1, now)
        .await
        .unwrap();
    assert_eq!(again, CreditOutcome::AlreadyApplied);

    let org = db.organizations().get("acme").await.unwrap().unwrap();
    assert_eq!(org.wallet_balance, 21_000_000);
    assert_eq!(org.version, 1);

    let tx = top_ups.get(pending.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TopUpStatus::Succeeded);
    assert_eq!(tx.payment_reference.as_deref(), Some("pi_1"));
    assert_eq!(tx.completed_at, Some(now));

    let by_ref = top_ups.find_by_reference("pi_1").await.unwrap().unwrap();
    assert_eq!(by_ref.id, pending.id);
}

pub async fn test_new_credit_idempotent_on_reference(db: &DbPool) {
    seed(db).await;
    let top_ups = db.top_ups();
    let target = CreditTarget::New {
        source: TopUpSource::Webhook,
        payment_reference: Some("pi_web".into()),
    };
    let now = ts(2025, 3, 1, 6, 0);

    let first = top_ups
        .apply_credit("acme", 5_000_000, &target, 0, now)
        .await
        .unwrap();
    assert!(matches!(first, CreditOutcome::Applied { .. }));

    let second = top_ups
        .apply_credit("acme", 5_000_000, &target, 1, now)
        .await
        .unwrap();
    assert_eq!(second, CreditOutcome::AlreadyApplied);

    let org = db.organizations().get("acme").await.unwrap().unwrap();
    assert_eq!(org.wallet_balance, 6_000_000);

    let tx = top_ups.find_by_reference("pi_web").await.unwrap().unwrap();
    assert_eq!(tx.source, TopUpSource::Webhook);
    assert_eq!(tx.status, TopUpStatus::Succeeded);
}

pub async fn test_credit_version_conflict_rolls_back(db: &DbPool) {
    seed(db).await;
    let top_ups = db.top_ups();
    let pending = top_ups
        .create_pending(NewTopUp {
            org_id: "acme".into(),
            amount: 20_000_000,
            source: TopUpSource::AutoTopUp,
            created_at: ts(2025, 3, 1, 5, 0),
        })
        .await
        .unwrap();

    let target = CreditTarget::Existing {
        id: pending.id,
        payment_reference: None,
    };
    let outcome = top_ups
        .apply_credit("acme", 20_000_000, &target, 42, ts(2025, 3, 1, 6, 0))
        .await
        .unwrap();
    assert_eq!(outcome, CreditOutcome::VersionConflict);

    // Transaction stays pending so a retry can complete it
    let tx = top_ups.get(pending.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TopUpStatus::Pending);
    let org = db.organizations().get("acme").await.unwrap().unwrap();
    assert_eq!(org.wallet_balance, 1_000_000);
}

pub async fn test_credit_unknown_transaction(db: &DbPool) {
    seed(db).await;
    let result = db
        .top_ups()
        .apply_credit(
            "acme",
            1,
            &CreditTarget::Existing {
                id: Uuid::new_v4(),
                payment_reference: None,
            },
            0,
            ts(2025, 3, 1, 6, 0),
        )
        .await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

pub async fn test_mark_failed(db: &DbPool) {
    seed(db).await;
    let top_ups = db.top_ups();
    let pending = top_ups
        .create_pending(NewTopUp {
            org_id: "acme".into(),
            amount: 1_000,
            source: TopUpSource::AutoTopUp,
            created_at: ts(2025, 3, 1, 5, 0),
        })
        .await
        .unwrap();
    let failed_at = ts(2025, 3, 1, 6, 30);

    assert!(top_ups
        .mark_failed(pending.id, "card_declined", failed_at)
        .await.unwrap());
    // Only pending transactions can fail
    assert!(!top_ups
        .mark_failed(pending.id, "again", failed_at)
        .await.unwrap());

    let tx = top_ups.get(pending.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TopUpStatus::Failed);
    assert_eq!(tx.failure_reason.as_deref(), Some("card_declined"));
    assert_eq!(tx.created_at, ts(2025, 3, 1, 5, 0));
    assert_eq!(tx.completed_at, Some(failed_at));

    assert!(
        !top_ups
            .mark_failed_by_reference("pi_unknown", "declined", failed_at)
            .await
            .unwrap()
    );
}

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use crate::db::tests::harness::sqlite_db;

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let db = sqlite_db().await;
                super::$name(&db).await;
            }
        };
    }

    sqlite_test!(test_complete_existing_once);
    sqlite_test!(test_new_credit_idempotent_on_reference);
    sqlite_test!(test_credit_version_conflict_rolls_back);
    sqlite_test!(test_credit_unknown_transaction);
    sqlite_test!(test_mark_failed);
}

#[cfg(feature = "database-postgres")]
mod postgres_tests {
    use crate::db::tests::harness::postgres::postgres_db;

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let db = postgres_db().await;
                super::$name(&db).await;
            }
        };
    }

    postgres_test!(test_complete_existing_once);
    postgres_test!(test_new_credit_idempotent_on_reference);
    postgres_test!(test_credit_version_conflict_rolls_back);
    postgres_test!(test_credit_unknown_transaction);
    postgres_test!(test_mark_failed);
}

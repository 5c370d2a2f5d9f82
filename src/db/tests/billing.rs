//! Shared tests for BillingRepo implementations

use std::collections::BTreeMap;

use uuid::Uuid;

use super::fixtures::{org_input, ts};
use crate::{
    db::{DbPool, repos::{SettleOutcome, TimeRange}},
    models::{BillingBreakdown, BillingHistoryEntry, BillingStatus, TokenCost},
};

fn entry(org_id: &str, period: TimeRange, before: i64, cost: i64) -> BillingHistoryEntry {
    let mut by_user = BTreeMap::new();
    by_user.insert(
        "u-1".to_string(),
        TokenCost {
            tokens: 1_000,
            cost,
        },
    );
    BillingHistoryEntry {
        id: Uuid::new_v4(),
        org_id: org_id.to_string(),
        billing_date: period.end,
        period_start: period.start,
        period_end: period.end,
        total_tokens: 1_000,
        total_cost: cost,
        amount_deducted: cost,
        breakdown: BillingBreakdown {
            by_assistant: BTreeMap::new(),
            by_user,
        },
        wallet_balance_before: before,
        wallet_balance_after: before - cost,
        status: BillingStatus::Completed,
        created_at: period.end,
    }
}

fn march_first() -> TimeRange {
    TimeRange::new(ts(2025, 3, 1, 0, 0), ts(2025, 3, 2, 0, 0))
}

pub async fn test_settle_applies(db: &DbPool) {
    db.organizations()
        .create(org_input("acme", 10_000_000))
        .await
        .expect("create org");

    let billing = db.billing();
    let period = march_first();
    assert!(!billing.exists_for_period("acme", period).await.unwrap());

    let e = entry("acme", period, 10_000_000, 60_000);
    assert_eq!(billing.settle(&e, 0).await.unwrap(), SettleOutcome::Applied);

    let org = db.organizations().get("acme").await.unwrap().unwrap();
    assert_eq!(org.wallet_balance, 9_940_000);
    assert_eq!(org.version, 1);
    assert!(billing.exists_for_period("acme", period).await.unwrap());

    let history = billing.list_for_org("acme", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, e.id);
    assert_eq!(history[0].breakdown, e.breakdown);
    assert_eq!(history[0].status, BillingStatus::Completed);
}

pub async fn test_settle_version_conflict(db: &DbPool) {
    db.organizations()
        .create(org_input("acme", 10_000_000))
        .await
        .expect("create org");

    let billing = db.billing();
    let e = entry("acme", march_first(), 10_000_000, 60_000);
    assert_eq!(
        billing.settle(&e, 7).await.unwrap(),
        SettleOutcome::VersionConflict
    );

    // Nothing written
    let org = db.organizations().get("acme").await.unwrap().unwrap();
    assert_eq!(org.wallet_balance, 10_000_000);
    assert_eq!(org.version, 0);
    assert!(!billing.exists_for_period("acme", march_first()).await.unwrap());
}

pub async fn test_settle_twice_rolls_back(db: &DbPool) {
    db.organizations()
        .create(org_input("acme", 10_000_000))
        .await
        .expect("create org");

    let billing = db.billing();
    let first = entry("acme", march_first(), 10_000_000, 60_000);
    billing.settle(&first, 0).await.unwrap();

    let second = entry("acme", march_first(), 9_940_000, 60_000);
    assert_eq!(
        billing.settle(&second, 1).await.unwrap(),
        SettleOutcome::AlreadyBilled
    );

    // The balance update of the second attempt was rolled back
    let org = db.organizations().get("acme").await.unwrap().unwrap();
    assert_eq!(org.wallet_balance, 9_940_000);
    assert_eq!(org.version, 1);
    assert_eq!(billing.list_for_org("acme", 10).await.unwrap().len(), 1);
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

    sqlite_test!(test_settle_applies);
    sqlite_test!(test_settle_version_conflict);
    sqlite_test!(test_settle_twice_rolls_back);
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

    postgres_test!(test_settle_applies);
    postgres_test!(test_settle_version_conflict);
    postgres_test!(test_settle_twice_rolls_back);
}

//! Shared tests for OrganizationRepo implementations

use super::fixtures::{org_input, ts};
use crate::{
    db::{DbError, DbPool, NewTopUp},
    models::{AutoTopUpSettings, ConsumptionLimits, OrganizationStatus, TopUpSource},
};

pub async fn test_create_and_get(db: &DbPool) {
    let repo = db.organizations();
    let mut input = org_input("acme", 5_000_000);
    input.consumption_limits = ConsumptionLimits {
        monthly: 1_000_000,
        daily: 50_000,
        per_user: 0,
    };
    input.auto_top_up = AutoTopUpSettings {
        enabled: true,
        threshold: 10_000_000,
        amount: 50_000_000,
        payment_method_id: Some("pm_123".into()),
        customer_id: Some("cus_123".into()),
    };

    let created = repo.create(input).await.expect("create");
    assert_eq!(created.version, 0);
    assert_eq!(created.status, OrganizationStatus::Active);

    let fetched = repo.get("acme").await.expect("get").expect("exists");
    assert_eq!(fetched.wallet_balance, 5_000_000);
    assert_eq!(fetched.consumption_limits.daily, 50_000);
    assert_eq!(fetched.auto_top_up.payment_method_id.as_deref(), Some("pm_123"));
    assert_eq!(fetched.auto_top_up.customer_id.as_deref(), Some("cus_123"));
    assert_eq!(fetched.billing_email.as_deref(), Some("billing@acme.example"));
    assert_eq!(fetched.version, 0);
}

pub async fn test_create_duplicate_fails(db: &DbPool) {
    let repo = db.organizations();
    repo.create(org_input("dup", 0)).await.expect("first");
    let result = repo.create(org_input("dup", 0)).await;
    assert!(matches!(result, Err(DbError::Conflict(_))));
}

pub async fn test_get_not_found(db: &DbPool) {
    let result = db.organizations().get("nobody").await.expect("query");
    assert!(result.is_none());
}

pub async fn test_auto_top_up_candidates(db: &DbPool) {
    let repo = db.organizations();
    let settings = |enabled| AutoTopUpSettings {
        enabled,
        threshold: 10_000_000,
        amount: 20_000_000,
        payment_method_id: Some("pm_1".into()),
        customer_id: None,
    };

    let mut low = org_input("low", 2_000_000);
    low.auto_top_up = settings(true);
    let mut high = org_input("high", 50_000_000);
    high.auto_top_up = settings(true);
    let mut disabled = org_input("disabled", 0);
    disabled.auto_top_up = settings(false);
    let mut negative = org_input("negative", -5_000_000);
    negative.auto_top_up = settings(true);

    let mut stale = org_input("stale", 0);
    stale.auto_top_up = settings(true);
    let mut in_flight = org_input("in_flight", 0);
    in_flight.auto_top_up = settings(true);

    for input in [low, high, disabled, negative, stale, in_flight] {
        repo.create(input).await.expect("create");
    }

    // Pending auto-top-ups: one older than the cutoff, one inside it
    let top_ups = db.top_ups();
    for (org_id, created_at) in [
        ("stale", ts(2025, 2, 27, 6, 0)),
        ("in_flight", ts(2025, 3, 1, 5, 0)),
    ] {
        top_ups
            .create_pending(NewTopUp {
                org_id: org_id.into(),
                amount: 20_000_000,
                source: TopUpSource::AutoTopUp,
                created_at,
            })
            .await
            .expect("pending");
    }
    // Checkout top-ups never block
    top_ups
        .create_pending(NewTopUp {
            org_id: "low".into(),
            amount: 20_000_000,
            source: TopUpSource::Checkout,
            created_at: ts(2025, 3, 1, 5, 0),
        })
        .await
        .expect("pending");

    let mut ids: Vec<String> = repo
        .list_auto_top_up_candidates(ts(2025, 2, 28, 6, 0))
        .await
        .expect("list")
        .into_iter()
        .map(|o| o.org_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["low", "negative", "stale"]);
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

    sqlite_test!(test_create_and_get);
    sqlite_test!(test_create_duplicate_fails);
    sqlite_test!(test_get_not_found);
    sqlite_test!(test_auto_top_up_candidates);
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

    postgres_test!(test_create_and_get);
    postgres_test!(test_create_duplicate_fails);
    postgres_test!(test_get_not_found);
    postgres_test!(test_auto_top_up_candidates);
}

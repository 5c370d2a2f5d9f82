//! Shared tests for RollupRepo implementations

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::fixtures::ts;
use crate::{
    db::DbPool,
    models::{DailyRollup, MonthlyRollup, ProjectUsage, RollupBreakdown, TokenCost},
};

fn daily(tokens: i64, at: chrono::DateTime<chrono::Utc>) -> DailyRollup {
    let mut by_assistant = BTreeMap::new();
    by_assistant.insert("chat".to_string(), TokenCost { tokens, cost: 10 });
    DailyRollup {
        org_id: "acme".into(),
        date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        total_tokens: tokens,
        total_cost: 10,
        request_count: 1,
        breakdown: RollupBreakdown {
            by_assistant,
            ..Default::default()
        },
        created_at: at,
        updated_at: at,
    }
}

pub async fn test_daily_upsert_replaces(db: &DbPool) {
    let repo = db.rollups();
    let first_run = ts(2025, 3, 2, 1, 0);
    let second_run = ts(2025, 3, 3, 1, 0);

    repo.upsert_daily(&daily(100, first_run)).await.unwrap();
    repo.upsert_daily(&daily(250, second_run)).await.unwrap();

    let stored = repo
        .get_daily("acme", NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
        .await
        .unwrap()
        .expect("rollup");
    assert_eq!(stored.total_tokens, 250);
    assert_eq!(stored.breakdown.by_assistant["chat"].tokens, 250);
    assert_eq!(stored.created_at, first_run);
    assert_eq!(stored.updated_at, second_run);

    assert!(
        repo.get_daily("acme", NaiveDate::from_ymd_opt(2025, 3, 2).unwrap())
            .await
            .unwrap()
            .is_none()
    );
}

pub async fn test_monthly_upsert(db: &DbPool) {
    let repo = db.rollups();
    let at = ts(2025, 4, 1, 2, 0);
    let mut by_project = BTreeMap::new();
    by_project.insert(
        "doc-1".to_string(),
        ProjectUsage {
            tokens: 900,
            cost: 90,
            requests: 3,
        },
    );
    let rollup = MonthlyRollup {
        org_id: "acme".into(),
        month: "2025-03".into(),
        total_tokens: 900,
        total_cost: 90,
        request_count: 3,
        breakdown: RollupBreakdown {
            by_project,
            ..Default::default()
        },
        created_at: at,
        updated_at: at,
    };

    repo.upsert_monthly(&rollup).await.unwrap();
    let stored = repo
        .get_monthly("acme", "2025-03")
        .await
        .unwrap()
        .expect("rollup");
    assert_eq!(stored, rollup);
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

    sqlite_test!(test_daily_upsert_replaces);
    sqlite_test!(test_monthly_upsert);
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

    postgres_test!(test_daily_upsert_replaces);
    postgres_test!(test_monthly_upsert);
}

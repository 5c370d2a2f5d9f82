//! Shared tests for PendingRequestRepo implementations

use super::fixtures::ts;
use crate::{db::DbPool, models::PendingRequest};

fn pending(id: &str, expires_at: chrono::DateTime<chrono::Utc>) -> PendingRequest {
    PendingRequest {
        request_id: id.to_string(),
        org_id: "acme".to_string(),
        payload: format!(r#"{{"requestId":"{id}"}}"#),
        expires_at,
    }
}

pub async fn test_list_expired(db: &DbPool) {
    let repo = db.pending_requests();
    repo.upsert(&pending("late", ts(2025, 3, 1, 12, 0))).await.unwrap();
    repo.upsert(&pending("early", ts(2025, 3, 1, 10, 0))).await.unwrap();
    repo.upsert(&pending("future", ts(2025, 3, 1, 13, 0))).await.unwrap();

    let expired = repo.list_expired(ts(2025, 3, 1, 12, 0), 10).await.unwrap();
    let ids: Vec<&str> = expired.iter().map(|p| p.request_id.as_str()).collect();
    assert_eq!(ids, vec!["early", "late"]);

    let limited = repo.list_expired(ts(2025, 3, 1, 12, 0), 1).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].request_id, "early");
}

pub async fn test_upsert_replaces_and_delete(db: &DbPool) {
    let repo = db.pending_requests();
    repo.upsert(&pending("r1", ts(2025, 3, 1, 10, 0))).await.unwrap();
    // Redelivered request restarts the expiry
    repo.upsert(&pending("r1", ts(2025, 3, 1, 11, 0))).await.unwrap();

    assert!(repo.list_expired(ts(2025, 3, 1, 10, 30), 10).await.unwrap().is_empty());
    assert_eq!(repo.list_expired(ts(2025, 3, 1, 11, 0), 10).await.unwrap().len(), 1);

    repo.delete("r1").await.unwrap();
    repo.delete("r1").await.unwrap();
    assert!(repo.list_expired(ts(2025, 3, 2, 0, 0), 10).await.unwrap().is_empty());
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

    sqlite_test!(test_list_expired);
    sqlite_test!(test_upsert_replaces_and_delete);
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

    postgres_test!(test_list_expired);
    postgres_test!(test_upsert_replaces_and_delete);
}

use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;

use super::IngestResult;
use crate::{
    cache::{Cache, CacheKeys},
    clock::Clock,
    config::IngestConfig,
    db::DbPool,
    models::{PendingRequest, RequestEvent, ResponseEvent},
    services::{ReconcileOutcome, ReconciliationService},
};

/// Pairs request and response events by request id.
///
/// The request payload waits in the cache under `request:<id>` until the
/// response arrives or the entry expires. A response with no cached request
/// is still reconciled, as a response-only record.
pub struct UsageMatcher {
    cache: Arc<dyn Cache>,
    db: Arc<DbPool>,
    reconciliation: Arc<ReconciliationService>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    /// Extra lifetime of the durable pending row; `None` when the sweep is off.
    sweep_grace: Option<Duration>,
}

impl UsageMatcher {
    pub fn new(
        cache: Arc<dyn Cache>,
        db: Arc<DbPool>,
        reconciliation: Arc<ReconciliationService>,
        clock: Arc<dyn Clock>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            cache,
            db,
            reconciliation,
            clock,
            ttl: Duration::from_secs(config.match_ttl_secs),
            sweep_grace: config
                .sweep
                .enabled
                .then(|| Duration::from_secs(config.sweep.grace_secs)),
        }
    }

    /// Remember a request event until its response shows up.
    ///
    /// A repeated request id overwrites the earlier payload and restarts the
    /// TTL.
    pub async fn handle_request(&self, payload: &str) -> IngestResult<()> {
        let event: RequestEvent = serde_json::from_str(payload)?;
        let key = CacheKeys::pending_request(&event.request_id);
        self.cache.set_bytes(&key, payload.as_bytes(), self.ttl).await?;

        if let Some(grace) = self.sweep_grace {
            let lifetime = ChronoDuration::from_std(self.ttl + grace)
                .unwrap_or_else(|_| ChronoDuration::seconds(i64::from(u32::MAX)));
            self.db
                .pending_requests()
                .upsert(&PendingRequest {
                    request_id: event.request_id.clone(),
                    org_id: event.organization_id.clone(),
                    payload: payload.to_string(),
                    expires_at: self.clock.now() + lifetime,
                })
                .await?;
        }

        tracing::debug!(
            request_id = %event.request_id,
            org_id = %event.organization_id,
            "Request event cached"
        );
        Ok(())
    }

    /// Reconcile a response event with its cached request, if any.
    pub async fn handle_response(&self, payload: &str) -> IngestResult<ReconcileOutcome> {
        let response: ResponseEvent = serde_json::from_str(payload)?;
        let key = CacheKeys::pending_request(&response.request_id);

        let request = match self.cache.get_bytes(&key).await? {
            Some(bytes) => match serde_json::from_slice::<RequestEvent>(&bytes) {
                Ok(request) => Some(request),
                Err(e) => {
                    tracing::warn!(
                        request_id = %response.request_id,
                        error = %e,
                        "Cached request is unreadable, reconciling response alone"
                    );
                    None
                }
            },
            None => None,
        };

        if request.is_none() {
            tracing::debug!(request_id = %response.request_id, "No cached request for response");
        }

        let outcome = self
            .reconciliation
            .reconcile(request.as_ref(), Some(&response))
            .await?;

        if let Err(e) = self.cache.delete(&key).await {
            tracing::warn!(request_id = %response.request_id, error = %e, "Failed to delete cached request");
        }
        if self.sweep_grace.is_some()
            && let Err(e) = self.db.pending_requests().delete(&response.request_id).await
        {
            tracing::warn!(request_id = %response.request_id, error = %e, "Failed to delete pending request");
        }

        Ok(outcome)
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryCache,
        clock::ManualClock,
        config::{MemoryCacheConfig, SweepConfig},
        ingest::IngestError,
        models::UsageStatus,
        pricing::PricingTable,
        services::{
            RealtimeCounters, SideEffect,
            reconciliation::tests::{at, request_event, response_event, usage},
        },
        db::tests::harness::sqlite_db,
    };

    struct Fixture {
        cache: Arc<dyn Cache>,
        db: Arc<DbPool>,
        clock: ManualClock,
        realtime: Arc<RealtimeCounters>,
        matcher: UsageMatcher,
    }

    async fn fixture(sweep: bool) -> Fixture {
        let clock = ManualClock::new(at(10, 0, 0));
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::with_clock(
            &MemoryCacheConfig::default(),
            shared_clock.clone(),
        ));
        let db = Arc::new(sqlite_db().await);
        let realtime = Arc::new(RealtimeCounters::new(cache.clone(), shared_clock.clone()));
        let reconciliation = Arc::new(ReconciliationService::new(
            db.clone(),
            Arc::new(PricingTable::default()),
            realtime.clone(),
            shared_clock.clone(),
        ));
        let config = IngestConfig {
            sweep: SweepConfig {
                enabled: sweep,
                ..Default::default()
            },
            ..Default::default()
        };
        let matcher = UsageMatcher::new(cache.clone(), db.clone(), reconciliation, shared_clock, &config);
        Fixture {
            cache,
            db,
            clock,
            realtime,
            matcher,
        }
    }

    fn json<T: serde::Serialize>(value: &T) -> String {
        serde_json::to_string(value).unwrap()
    }

    #[tokio::test]
    async fn test_request_then_response_is_complete() {
        let f = fixture(false).await;
        f.matcher
            .handle_request(&json(&request_event("R1")))
            .await
            .unwrap();
        let outcome = f
            .matcher
            .handle_response(&json(&response_event("R1", usage(1000, 500, 1500))))
            .await
            .unwrap();

        assert!(outcome.inserted);
        assert_eq!(outcome.record.status, UsageStatus::Complete);
        assert_eq!(outcome.record.total_tokens, 1500);
        assert_eq!(outcome.counters, SideEffect::Applied);
        assert_eq!(f.realtime.org_tokens_today("O1").await.unwrap(), 1500);
        // The cache entry is gone once matched
        assert!(
            f.cache
                .get_bytes(&CacheKeys::pending_request("R1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_response_without_request_is_response_only() {
        let f = fixture(false).await;
        let outcome = f
            .matcher
            .handle_response(&json(&response_event("R2", None)))
            .await
            .unwrap();
        assert_eq!(outcome.record.status, UsageStatus::ResponseOnly);
        assert_eq!(outcome.counters, SideEffect::Skipped);
        assert_eq!(f.realtime.org_tokens_today("O1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_request_yields_response_only() {
        let f = fixture(false).await;
        f.matcher
            .handle_request(&json(&request_event("R3")))
            .await
            .unwrap();
        f.clock.advance(ChronoDuration::seconds(3601));
        let outcome = f
            .matcher
            .handle_response(&json(&response_event("R3", None)))
            .await
            .unwrap();
        assert_eq!(outcome.record.status, UsageStatus::ResponseOnly);
    }

    #[tokio::test]
    async fn test_duplicate_response_counts_once() {
        let f = fixture(false).await;
        f.matcher
            .handle_request(&json(&request_event("R4")))
            .await
            .unwrap();
        let response = json(&response_event("R4", usage(100, 50, 150)));
        let first = f.matcher.handle_response(&response).await.unwrap();
        let second = f.matcher.handle_response(&response).await.unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(f.realtime.user_tokens_today("U1").await.unwrap(), 150);
        assert_eq!(
            f.db.usage().get("R4").await.unwrap().unwrap().status,
            UsageStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_unreadable_cached_request_is_a_miss() {
        let f = fixture(false).await;
        f.cache
            .set_bytes(
                &CacheKeys::pending_request("R5"),
                b"not json",
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let outcome = f
            .matcher
            .handle_response(&json(&response_event("R5", None)))
            .await
            .unwrap();
        assert_eq!(outcome.record.status, UsageStatus::ResponseOnly);
    }

    #[tokio::test]
    async fn test_decode_error_is_acknowledged() {
        let f = fixture(false).await;
        let err = f.matcher.handle_request("{ nope").await.unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));
        assert!(err.should_ack());
        let err = f.matcher.handle_response("[]").await.unwrap_err();
        assert!(err.should_ack());
    }

    #[tokio::test]
    async fn test_sweep_enabled_tracks_pending_rows() {
        let f = fixture(true).await;
        f.matcher
            .handle_request(&json(&request_event("R6")))
            .await
            .unwrap();

        // match TTL 3600 + grace 300
        let expired = f
            .db
            .pending_requests()
            .list_expired(at(11, 5, 0), 10)
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].expires_at, at(11, 5, 0));

        f.matcher
            .handle_response(&json(&response_event("R6", None)))
            .await
            .unwrap();
        let expired = f
            .db
            .pending_requests()
            .list_expired(at(12, 0, 0), 10)
            .await
            .unwrap();
        assert!(expired.is_empty());
    }
}

//! Usage metering, reconciliation and wallet billing for LLM gateways.
//!
//! Request and response events arrive on two streams and are paired into
//! usage records. Scheduled jobs settle each day's usage against prepaid
//! organization wallets, maintain consumption rollups and recharge wallets
//! that fall below their auto-top-up threshold.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod notifications;
pub mod observability;
pub mod payments;
pub mod pricing;
pub mod routes;
pub mod services;
pub mod streams;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    cache::Cache,
    clock::Clock,
    config::{LedgerConfig, PaymentsConfig},
    db::DbPool,
    payments::webhook::PaymentWebhookHandler,
    services::Services,
};

/// Shared state of the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LedgerConfig>,
    pub db: Arc<DbPool>,
    pub cache: Arc<dyn Cache>,
    /// Present when a payment provider is configured.
    pub webhook: Option<Arc<PaymentWebhookHandler>>,
}

impl AppState {
    pub fn new(
        config: Arc<LedgerConfig>,
        db: Arc<DbPool>,
        cache: Arc<dyn Cache>,
        services: &Services,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let webhook = match &config.payments {
            PaymentsConfig::None => None,
            PaymentsConfig::Stripe(stripe) => Some(Arc::new(PaymentWebhookHandler::new(
                db.clone(),
                services.wallet.clone(),
                clock,
                stripe,
            ))),
        };

        Self {
            config,
            db,
            cache,
            webhook,
        }
    }
}

pub fn build_app(config: &LedgerConfig, state: AppState) -> Router {
    let mut app: Router<AppState> = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .route("/health/ready", get(routes::health::readiness));

    if config.observability.metrics.enabled {
        app = app.route(
            &config.observability.metrics.path,
            get(routes::health::metrics),
        );
    }

    if state.webhook.is_some() {
        app = app.route("/webhooks/payments", post(routes::webhooks::payment_webhook));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}

#[cfg(all(test, feature = "database-sqlite"))]
pub(crate) mod tests {
    use super::*;
    use crate::{
        cache::MemoryCache,
        clock::SystemClock,
        config::MemoryCacheConfig,
        db::tests::harness::sqlite_db,
        notifications::testing::RecordingNotifier,
    };

    /// State over an in-memory database and cache, on the system clock.
    pub(crate) async fn test_state(config: &LedgerConfig) -> AppState {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let db = Arc::new(sqlite_db().await);
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::with_clock(
            &MemoryCacheConfig::default(),
            clock.clone(),
        ));
        let services = Services::new(
            config,
            db.clone(),
            cache.clone(),
            clock.clone(),
            Arc::new(RecordingNotifier::default()),
            None,
        );
        AppState::new(Arc::new(config.clone()), db, cache, &services, clock)
    }
}

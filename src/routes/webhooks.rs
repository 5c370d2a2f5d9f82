//! Payment provider webhook endpoint.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, StatusCode};
use serde_json::json;

use crate::{
    AppState,
    payments::webhook::{SIGNATURE_HEADER, WebhookError},
};

/// Receive a payment event.
///
/// Client errors (bad signature, malformed payload, unknown organization)
/// answer 400 so the provider stops retrying. Anything else answers 500 and
/// the provider redelivers; the credit is idempotent on the payment reference.
#[tracing::instrument(name = "webhooks.payments", skip_all)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(handler) = &state.webhook else {
        return error_response(StatusCode::NOT_FOUND, "not_configured", "Payments are not configured");
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match handler.handle(signature, &body).await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "Payment webhook handled");
            (StatusCode::OK, Json(json!({ "received": true }))).into_response()
        }
        Err(e) if e.is_client_error() => {
            tracing::warn!(error = %e, "Rejected payment webhook");
            error_response(StatusCode::BAD_REQUEST, error_code(&e), &e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to process payment webhook");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Failed to process webhook",
            )
        }
    }
}

fn error_code(error: &WebhookError) -> &'static str {
    match error {
        WebhookError::MissingSignature | WebhookError::InvalidSignature | WebhookError::Expired => {
            "invalid_signature"
        }
        WebhookError::Malformed(_) => "malformed_payload",
        _ => "invalid_request",
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": code, "message": message } })),
    )
        .into_response()
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use axum::{Router, body::Body};
    use chrono::Utc;
    use http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        build_app,
        config::{LedgerConfig, PaymentsConfig, StripeConfig},
        db::{DbPool, tests::fixtures::org_input},
        payments::webhook::tests::{signature_header, succeeded_event, succeeded_event_for},
        tests::test_state,
    };

    const SECRET: &str = "whsec_test";

    fn stripe_config() -> LedgerConfig {
        LedgerConfig {
            payments: PaymentsConfig::Stripe(StripeConfig {
                api_key: "sk_test".into(),
                webhook_secret: Some(SECRET.into()),
                webhook_tolerance_secs: 300,
                base_url: "https://api.stripe.com".into(),
                timeout_secs: 30,
            }),
            ..Default::default()
        }
    }

    async fn app(config: LedgerConfig) -> (std::sync::Arc<DbPool>, Router) {
        let state = test_state(&config).await;
        let db = state.db.clone();
        db.organizations()
            .create(org_input("acme", 0))
            .await
            .unwrap();
        (db, build_app(&config, state))
    }

    async fn post(app: &Router, signature: Option<String>, body: Vec<u8>) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/webhooks/payments")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_signed_event_credits_wallet() {
        let (db, app) = app(stripe_config()).await;
        let body = succeeded_event("pi_7", Some("acme"), 1000);
        let signature = signature_header(SECRET, Utc::now(), &body);

        let (status, json) = post(&app, Some(signature.clone()), body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["received"], true);

        // Provider retry of the same event
        let (status, _) = post(&app, Some(signature), body).await;
        assert_eq!(status, StatusCode::OK);

        let org = db.organizations().get("acme").await.unwrap().unwrap();
        assert_eq!(org.wallet_balance, 10_000_000);
    }

    #[tokio::test]
    async fn test_bad_signature_is_bad_request() {
        let (db, app) = app(stripe_config()).await;
        let body = succeeded_event("pi_8", Some("acme"), 1000);
        let signature = signature_header("whsec_other", Utc::now(), &body);

        let (status, json) = post(&app, Some(signature), body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_signature");

        let (status, _) = post(&app, None, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let org = db.organizations().get("acme").await.unwrap().unwrap();
        assert_eq!(org.wallet_balance, 0);
    }

    #[tokio::test]
    async fn test_unknown_organization_is_bad_request() {
        let (_, app) = app(stripe_config()).await;
        let body = succeeded_event("pi_9", Some("ghost"), 1000);
        let signature = signature_header(SECRET, Utc::now(), &body);

        let (status, _) = post(&app, Some(signature), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_bad_request() {
        let (db, app) = app(stripe_config()).await;
        let body = succeeded_event_for("pi_10", Some("acme"), Some(uuid::Uuid::new_v4()), 1000);
        let signature = signature_header(SECRET, Utc::now(), &body);

        let (status, json) = post(&app, Some(signature), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");

        let org = db.organizations().get("acme").await.unwrap().unwrap();
        assert_eq!(org.wallet_balance, 0);
    }

    #[tokio::test]
    async fn test_route_absent_without_payments() {
        let (_, app) = app(LedgerConfig::default()).await;
        let (status, _) = post(&app, None, b"{}".to_vec()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

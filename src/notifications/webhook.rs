use std::time::Duration;

use async_trait::async_trait;

use super::{Notification, NotificationError, NotificationResult, Notifier};
use crate::{config::WebhookNotifierConfig, observability::metrics};

/// POSTs each notification as JSON to a configured endpoint.
///
/// The body is the tagged [`Notification`] plus a rendered `message` field.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, config: &WebhookNotifierConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) -> NotificationResult<()> {
        let mut body = serde_json::to_value(&notification).unwrap_or_default();
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "message".to_string(),
                serde_json::Value::String(notification.message()),
            );
        }

        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let result = match request.send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(NotificationError::Status {
                status: response.status().as_u16(),
            }),
            Err(e) => Err(NotificationError::Http(e)),
        };

        metrics::record_notification(notification.kind(), result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(
                kind = notification.kind(),
                org_id = notification.org_id(),
                url = %self.url,
                error = %e,
                "Failed to deliver notification"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;
    use crate::notifications::AutoTopUpNotice;

    fn notifier(server: &MockServer) -> WebhookNotifier {
        WebhookNotifier::new(
            reqwest::Client::new(),
            &WebhookNotifierConfig {
                url: format!("{}/hooks/ledger", server.uri()),
                headers: HashMap::from([("x-ledger-token".to_string(), "s3cret".to_string())]),
                timeout_secs: 5,
            },
        )
    }

    fn top_up_notice() -> AutoTopUpNotice {
        AutoTopUpNotice {
            org_id: "acme".into(),
            org_name: "Acme".into(),
            email: Some("billing@acme.example".into()),
            transaction_id: uuid::Uuid::nil(),
            amount: 50_000_000,
            balance_after: 53_000_000,
        }
    }

    #[tokio::test]
    async fn test_posts_tagged_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/ledger"))
            .and(header("x-ledger-token", "s3cret"))
            .and(body_partial_json(serde_json::json!({
                "type": "auto_top_up",
                "org_id": "acme",
                "amount": 50_000_000,
                "message": "Acme: wallet topped up with $50.00, balance $53.00"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server).auto_top_up(top_up_notice()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = notifier(&server)
            .auto_top_up(top_up_notice())
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Status { status: 500 }));
    }
}

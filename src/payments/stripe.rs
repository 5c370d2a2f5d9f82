use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{ChargeRequest, ChargeResult, PaymentError, PaymentGateway, PaymentResult};

/// Stripe PaymentIntents over the REST API.
pub struct StripeGateway {
    http: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    amount: i64,
    #[serde(default)]
    last_payment_error: Option<StripeError>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl StripeError {
    fn into_declined(self) -> PaymentError {
        PaymentError::Declined {
            code: self
                .decline_code
                .or(self.code)
                .unwrap_or_else(|| "declined".to_string()),
            message: self.message.unwrap_or_default(),
        }
    }
}

impl StripeGateway {
    pub fn new(http: Client, base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    fn form(request: &ChargeRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("amount".to_string(), request.amount_cents.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("payment_method".to_string(), request.payment_method_id.clone()),
            ("confirm".to_string(), "true".to_string()),
            ("off_session".to_string(), "true".to_string()),
            ("description".to_string(), request.description.clone()),
        ];
        if let Some(customer) = &request.customer_id {
            form.push(("customer".to_string(), customer.clone()));
        }
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }
        form
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[tracing::instrument(
        name = "stripe.charge",
        skip(self, request),
        fields(amount_cents = request.amount_cents, idempotency_key = %request.idempotency_key)
    )]
    async fn charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResult> {
        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .timeout(self.timeout)
            .form(&Self::form(&request))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let intent: PaymentIntent = response.json().await?;
            if intent.status != "succeeded" {
                tracing::warn!(
                    payment_intent = %intent.id,
                    status = %intent.status,
                    "Payment intent did not succeed"
                );
                return Err(match intent.last_payment_error {
                    Some(e) => e.into_declined(),
                    None => PaymentError::Declined {
                        code: intent.status,
                        message: "payment requires further action".to_string(),
                    },
                });
            }
            return Ok(ChargeResult {
                payment_reference: intent.id,
                status: intent.status,
                amount_cents: intent.amount,
            });
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            // 402 and card errors are declines; anything else is the provider failing
            Ok(ErrorBody { error })
                if status.as_u16() == 402 || error.kind.as_deref() == Some("card_error") =>
            {
                Err(error.into_declined())
            }
            Ok(ErrorBody { error }) => Err(PaymentError::Provider {
                status: status.as_u16(),
                message: error.message.unwrap_or(body),
            }),
            Err(_) => Err(PaymentError::Provider {
                status: status.as_u16(),
                message: body,
            }),
        }
    }
}

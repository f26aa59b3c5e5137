use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::flow::{CheckoutBackend, CheckoutError};
use crate::services::orders::{CreateOrderRequest, OrderResponse};
use crate::services::payments::{CreatePaymentIntentRequest, PaymentIntentResponse};

/// [`CheckoutBackend`] over this service's HTTP API
#[derive(Debug, Clone)]
pub struct HttpCheckoutBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpCheckoutBackend {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CheckoutError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CheckoutError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn post<T, R>(&self, path: &str, body: &T) -> Result<R, CheckoutError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| CheckoutError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| CheckoutError::Transport(format!("invalid response body: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        Err(CheckoutError::Api {
            status: status.as_u16(),
            message: error_message(&text),
        })
    }
}

/// Pulls the human-readable message out of either error body shape the API
/// returns, falling back to the raw text.
fn error_message(body: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return body.to_string(),
    };

    value
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| value.pointer("/error/message").and_then(|m| m.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl CheckoutBackend for HttpCheckoutBackend {
    async fn create_payment_intent(
        &self,
        amount: f64,
    ) -> Result<PaymentIntentResponse, CheckoutError> {
        self.post(
            "/api/payment/create-payment-intent",
            &CreatePaymentIntentRequest {
                amount: Some(amount),
            },
        )
        .await
    }

    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, CheckoutError> {
        self.post("/api/orders", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_reads_both_body_shapes() {
        assert_eq!(
            error_message(r#"{"error":"Bad Request","message":"No order items"}"#),
            "No order items"
        );
        assert_eq!(
            error_message(r#"{"error":{"code":"AUTH_MISSING_TOKEN","message":"Not authorized, no token"}}"#),
            "Not authorized, no token"
        );
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }
}

//! Stripe-compatible payment processor client.
//!
//! Only the two calls the storefront needs are implemented: creating a
//! payment intent for an amount in minor units, and retrieving an intent to
//! check its settlement status. Requests are form-encoded and authenticated
//! with the secret key as the basic-auth user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::config::PaymentsConfig;
use crate::errors::ServiceError;

/// Processor-side payment intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Identifier (pi_...)
    pub id: String,
    /// Secret the client uses to confirm the card payment
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Amount in minor units
    pub amount: i64,
    /// Lowercase ISO currency code
    pub currency: String,
    /// requires_payment_method, requires_confirmation, requires_action,
    /// processing, requires_capture, canceled or succeeded
    pub status: String,
    /// Key-value tags set at creation; `user_id` names the paying account
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }

    /// Account the intent was created for
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get("user_id").map(String::as_str)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("payment processor rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("payment processor unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected payment processor response: {0}")]
    InvalidResponse(String),

    #[error("payment processor is not configured")]
    NotConfigured,
}

impl From<ProcessorError> for ServiceError {
    fn from(err: ProcessorError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

/// The seam between the storefront and the payment processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Reserves a charge of `amount_minor` in `currency`.
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<PaymentIntent, ProcessorError>;

    /// Fetches the current state of an intent.
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProcessorError>;
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// reqwest-based processor client
#[derive(Debug, Clone)]
pub struct StripePaymentProcessor {
    client: reqwest::Client,
    api_base: String,
    api_version: String,
    secret_key: String,
}

impl StripePaymentProcessor {
    pub fn new(config: &PaymentsConfig) -> Result<Self, ProcessorError> {
        let secret_key = config
            .stripe_secret_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProcessorError::NotConfigured)?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ProcessorError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
            api_version: config.stripe_api_version.clone(),
            secret_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn read_intent(response: reqwest::Response) -> Result<PaymentIntent, ProcessorError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<PaymentIntent>()
                .await
                .map_err(|e| ProcessorError::InvalidResponse(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<StripeErrorBody>(&text)
            .ok()
            .and_then(|body| body.error.message.or(body.error.kind))
            .unwrap_or(text);
        error!(status = %status, error = %message, "Payment processor API error");

        Err(ProcessorError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PaymentProcessor for StripePaymentProcessor {
    #[instrument(skip(self, metadata))]
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<PaymentIntent, ProcessorError> {
        let mut params: Vec<(String, String)> = vec![
            ("amount".to_string(), amount_minor.to_string()),
            ("currency".to_string(), currency.to_lowercase()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in metadata {
            params.push((format!("metadata[{}]", key), value));
        }

        let response = self
            .client
            .post(self.url("payment_intents"))
            .basic_auth(&self.secret_key, Some(""))
            .header("Stripe-Version", &self.api_version)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProcessorError::Unreachable(e.to_string()))?;

        let intent = Self::read_intent(response).await?;
        info!(
            payment_intent_id = %intent.id,
            status = %intent.status,
            "Payment intent created"
        );
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProcessorError> {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(ProcessorError::Rejected {
                status: 400,
                message: "malformed payment intent id".to_string(),
            });
        }

        let response = self
            .client
            .get(self.url(&format!("payment_intents/{}", id)))
            .basic_auth(&self.secret_key, Some(""))
            .header("Stripe-Version", &self.api_version)
            .send()
            .await
            .map_err(|e| ProcessorError::Unreachable(e.to_string()))?;

        Self::read_intent(response).await
    }
}

/// Stand-in used when no secret key is configured; every call fails with
/// [`ProcessorError::NotConfigured`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPaymentProcessor;

#[async_trait]
impl PaymentProcessor for DisabledPaymentProcessor {
    async fn create_payment_intent(
        &self,
        _amount_minor: i64,
        _currency: &str,
        _metadata: BTreeMap<String, String>,
    ) -> Result<PaymentIntent, ProcessorError> {
        Err(ProcessorError::NotConfigured)
    }

    async fn retrieve_payment_intent(&self, _id: &str) -> Result<PaymentIntent, ProcessorError> {
        Err(ProcessorError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secret_key_is_not_configured() {
        let config = PaymentsConfig::default();
        assert_eq!(
            StripePaymentProcessor::new(&config).unwrap_err(),
            ProcessorError::NotConfigured
        );

        let blank = PaymentsConfig {
            stripe_secret_key: Some("  ".into()),
            ..PaymentsConfig::default()
        };
        assert!(StripePaymentProcessor::new(&blank).is_err());
    }

    #[test]
    fn processor_errors_map_to_bad_gateway() {
        let err: ServiceError = ProcessorError::Unreachable("timed out".into()).into();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn intent_parses_processor_payload() {
        let intent: PaymentIntent = serde_json::from_value(serde_json::json!({
            "id": "pi_123",
            "object": "payment_intent",
            "amount": 19900,
            "currency": "inr",
            "status": "succeeded",
            "client_secret": "pi_123_secret_abc"
        }))
        .unwrap();

        assert!(intent.is_succeeded());
        assert_eq!(intent.client_secret.as_deref(), Some("pi_123_secret_abc"));
        assert_eq!(intent.user_id(), None);

        let tagged: PaymentIntent = serde_json::from_value(serde_json::json!({
            "id": "pi_456",
            "amount": 4999,
            "currency": "inr",
            "status": "succeeded",
            "metadata": {"user_id": "7d1f"}
        }))
        .unwrap();
        assert_eq!(tagged.user_id(), Some("7d1f"));
    }

    #[tokio::test]
    async fn malformed_intent_id_is_rejected_locally() {
        let config = PaymentsConfig {
            stripe_secret_key: Some("sk_test_local".into()),
            stripe_api_base: "http://127.0.0.1:9".into(),
            ..PaymentsConfig::default()
        };
        let processor = StripePaymentProcessor::new(&config).unwrap();

        let err = processor
            .retrieve_payment_intent("pi_1/../../charges")
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Rejected { status: 400, .. }));
    }
}

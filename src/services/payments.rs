use metrics::counter;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::config::PaymentsConfig;
use crate::errors::ServiceError;
use crate::services::stripe::PaymentProcessor;

/// Converts a currency amount to integer minor units, rounding to two decimal
/// places with midpoint-away-from-zero. `None` if it does not fit in `i64`.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.checked_mul(Decimal::ONE_HUNDRED)?.to_i64()
}

/// Validates a client-supplied amount and converts it to minor units.
pub fn amount_to_minor_units(amount: f64) -> Result<i64, ServiceError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ServiceError::ValidationError(
            "Amount must be a positive number".to_string(),
        ));
    }

    let decimal = Decimal::from_f64(amount).ok_or_else(|| {
        ServiceError::ValidationError("Amount is out of range".to_string())
    })?;
    let minor = to_minor_units(decimal)
        .ok_or_else(|| ServiceError::ValidationError("Amount is out of range".to_string()))?;

    if minor <= 0 {
        return Err(ServiceError::ValidationError(
            "Amount must be at least 0.01".to_string(),
        ));
    }
    Ok(minor)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentIntentRequest {
    /// Cart total in major currency units, e.g. 49.99
    #[serde(default)]
    #[schema(example = 49.99)]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
}

/// Reserves charges with the payment processor on behalf of signed-in users.
pub struct PaymentService {
    processor: Arc<dyn PaymentProcessor>,
    config: PaymentsConfig,
}

impl PaymentService {
    pub fn new(processor: Arc<dyn PaymentProcessor>, config: PaymentsConfig) -> Self {
        Self { processor, config }
    }

    /// Asks the processor for a new intent. Every call creates a new intent;
    /// nothing is stored locally.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn create_payment_intent(
        &self,
        user: &AuthUser,
        amount: f64,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        let amount_minor = amount_to_minor_units(amount)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), user.user_id.to_string());

        let intent = self
            .processor
            .create_payment_intent(amount_minor, &self.config.currency, metadata)
            .await
            .map_err(|e| {
                warn!(error = %e, amount_minor, "Payment intent creation failed");
                counter!("storefront.payment_intents.failed", 1);
                ServiceError::from(e)
            })?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            ServiceError::ExternalServiceError(
                "payment processor returned an intent without a client secret".to_string(),
            )
        })?;

        counter!("storefront.payment_intents.created", 1);
        info!(payment_intent_id = %intent.id, amount_minor, "Payment intent created");

        Ok(PaymentIntentResponse {
            client_secret,
            payment_intent_id: intent.id,
        })
    }
}

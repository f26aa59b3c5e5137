use axum::extract::{Json, State};

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payments::{CreatePaymentIntentRequest, PaymentIntentResponse};

/// Reserve a charge with the payment processor
#[utoipa::path(
    post,
    path = "/api/payment/create-payment-intent",
    summary = "Create payment intent",
    description = "Ask the payment processor for a new intent for the given amount. Every call creates a new intent.",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 200, description = "Intent created", body = PaymentIntentResponse),
        (status = 400, description = "Amount missing or not positive", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "Payment processor failure", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreatePaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>, ServiceError> {
    let amount = payload
        .amount
        .ok_or_else(|| ServiceError::ValidationError("Amount is required".to_string()))?;
    let response = state
        .services
        .payments
        .create_payment_intent(&user, amount)
        .await?;
    Ok(Json(response))
}

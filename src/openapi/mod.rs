use axum::Json;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Order & Payment API

Turns a checked-out cart into a paid, recorded order.

1. `POST /api/payment/create-payment-intent` reserves a charge with the payment processor
2. The client confirms the card payment with the returned client secret
3. `POST /api/orders` records the paid order, optionally keyed by `paymentIntentId`

## Authentication

Every `/api` endpoint requires a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

Listing all orders additionally requires an admin account.

## Error Handling

```json
{
  "error": "Bad Request",
  "message": "No order items",
  "request_id": "5f0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    tags(
        (name = "Orders", description = "Order recording and listing"),
        (name = "Payments", description = "Payment intent creation")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_my_orders,
        crate::handlers::orders::get_orders,
        crate::handlers::payments::create_payment_intent,
    ),
    components(
        schemas(
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderItemInput,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::UserSummary,
            crate::services::payments::CreatePaymentIntentRequest,
            crate::services::payments::PaymentIntentResponse,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Registers the `Bearer` scheme referenced by the secured paths
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// `GET /api-docs/openapi.json`
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

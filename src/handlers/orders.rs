use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};

use crate::auth::{AdminUser, AuthUser};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::orders::{CreateOrderRequest, OrderResponse};

/// Record a paid order for the caller
#[utoipa::path(
    post,
    path = "/api/orders",
    summary = "Create order",
    description = "Record a paid order owned by the authenticated caller. Resubmitting the same paymentIntentId returns the existing order.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 200, description = "Order already recorded for this payment intent", body = OrderResponse),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Payment could not be verified", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment intent recorded for another account", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state.services.orders.create_order(&user, payload).await?;
    let status = if created.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(created.order)))
}

/// List the caller's own orders
#[utoipa::path(
    get,
    path = "/api/orders/myorders",
    summary = "List my orders",
    description = "All orders owned by the authenticated caller, oldest first",
    responses(
        (status = 200, description = "Orders retrieved", body = [OrderResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<OrderResponse>>, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders_for_user(user.user_id)
        .await?;
    Ok(Json(orders))
}

/// List every order (admin)
#[utoipa::path(
    get,
    path = "/api/orders",
    summary = "List all orders",
    description = "Every order with its owner expanded to id, name and email. Admin only.",
    responses(
        (status = 200, description = "Orders retrieved", body = [OrderResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not an admin"),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_orders(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<Vec<OrderResponse>>, ServiceError> {
    tracing::debug!(admin_id = %admin.user_id, "Listing all orders");
    let orders = state.services.orders.list_all_orders().await?;
    Ok(Json(orders))
}

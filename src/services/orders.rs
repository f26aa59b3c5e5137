use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::auth::AuthUser;
use crate::config::PaymentsConfig;
use crate::entities::user;
use crate::errors::ServiceError;
use crate::repositories::{NewOrder, NewOrderItem, OrderRecord, OrderRepository, UserRepository};
use crate::services::payments::to_minor_units;
use crate::services::stripe::PaymentProcessor;

/// Money columns are `decimal(12, 2)`: two decimal places, below 10^10.
const MONEY_SCALE: u32 = 2;
const MONEY_LIMIT: Decimal = dec!(10000000000);

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

fn validate_money(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("must not be negative".into());
        return Err(err);
    }
    if round_money(*value) >= MONEY_LIMIT {
        let mut err = ValidationError::new("out_of_range");
        err.message = Some("must be less than 10000000000".into());
        return Err(err);
    }
    Ok(())
}

fn out_of_range() -> ServiceError {
    ServiceError::ValidationError("order total is out of range".to_string())
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}

/// One purchased plan as submitted by the client
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemInput {
    #[validate(custom = "validate_not_blank")]
    pub name: String,
    #[validate(custom = "validate_money")]
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    #[schema(value_type = f64, example = 199.0)]
    pub price: Decimal,
    /// Identifier of the purchased plan
    #[validate(custom = "validate_not_blank")]
    pub product: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Body of `POST /api/orders`. Ownership and paid state are never taken from
/// the body; fields such as `user` or `isPaid` are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_items: Option<Vec<OrderItemInput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "rust_decimal::serde::float_option::serialize"
    )]
    #[schema(value_type = Option<f64>)]
    pub items_price: Option<Decimal>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "rust_decimal::serde::float_option::serialize"
    )]
    #[schema(value_type = Option<f64>)]
    pub tax_price: Option<Decimal>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "rust_decimal::serde::float_option::serialize"
    )]
    #[schema(value_type = Option<f64>)]
    pub total_price: Option<Decimal>,
    /// Processor intent this order settles; makes the call idempotent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub name: String,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub product: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<user::Model> for UserSummary {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
        }
    }
}

/// Owner as rendered in an order: the bare id on the caller's own listing,
/// expanded for admins, `null` if the account no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderOwner {
    Expanded(UserSummary),
    Id(Uuid),
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    #[schema(value_type = Object)]
    pub user: OrderOwner,
    pub order_items: Vec<OrderItemResponse>,
    pub payment_method: String,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    #[schema(value_type = f64)]
    pub items_price: Decimal,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    #[schema(value_type = f64)]
    pub tax_price: Decimal,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    #[schema(value_type = f64)]
    pub total_price: Decimal,
    pub is_paid: bool,
    pub paid_at: DateTime<Utc>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn from_record(record: OrderRecord, owner: OrderOwner) -> Self {
        let OrderRecord { order, items } = record;
        Self {
            id: order.id,
            user: owner,
            order_items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    name: item.name,
                    price: item.price,
                    product: item.product_ref,
                    image: item.image,
                })
                .collect(),
            payment_method: order.payment_method,
            items_price: order.items_price,
            tax_price: order.tax_price,
            total_price: order.total_price,
            is_paid: order.is_paid,
            paid_at: order.paid_at,
            is_delivered: order.is_delivered,
            delivered_at: order.delivered_at,
            payment_intent_id: order.payment_intent_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }

    fn owned(record: OrderRecord) -> Self {
        let owner = OrderOwner::Id(record.order.user_id);
        Self::from_record(record, owner)
    }
}

/// Result of a create call; `replayed` is true when an existing order for the
/// same payment intent was returned instead of inserting a new one.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: OrderResponse,
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pricing {
    items_price: Decimal,
    tax_price: Decimal,
    total_price: Decimal,
}

/// Records and lists orders.
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    users: Arc<dyn UserRepository>,
    processor: Arc<dyn PaymentProcessor>,
    config: PaymentsConfig,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        users: Arc<dyn UserRepository>,
        processor: Arc<dyn PaymentProcessor>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            orders,
            users,
            processor,
            config,
        }
    }

    /// Records a paid order owned by `user`.
    #[instrument(skip(self, user, request), fields(user_id = %user.user_id))]
    pub async fn create_order(
        &self,
        user: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<CreatedOrder, ServiceError> {
        let items = prepare_items(request.order_items)?;
        let payment_intent_id = normalize_intent_id(request.payment_intent_id)?;

        let mut pricing = Pricing {
            items_price: money("itemsPrice", request.items_price)?,
            tax_price: money("taxPrice", request.tax_price)?,
            total_price: money("totalPrice", request.total_price)?,
        };

        if let Some(intent_id) = payment_intent_id.as_deref() {
            if let Some(existing) = self.orders.find_by_payment_intent(intent_id).await? {
                return self.replay(user, existing);
            }
        }

        if self.config.verify_intents {
            let intent_id = payment_intent_id.as_deref().ok_or_else(|| {
                ServiceError::ValidationError("paymentIntentId is required".to_string())
            })?;
            let items_price = items
                .iter()
                .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.price))
                .filter(|sum| *sum < MONEY_LIMIT)
                .ok_or_else(out_of_range)?;
            let total_price = items_price
                .checked_add(pricing.tax_price)
                .filter(|total| *total < MONEY_LIMIT)
                .ok_or_else(out_of_range)?;
            pricing = Pricing {
                items_price,
                tax_price: pricing.tax_price,
                total_price,
            };
            self.verify_payment(user, intent_id, pricing.total_price).await?;
        } else {
            debug!(
                total_price = %pricing.total_price,
                "Recording order with client-supplied pricing; payment not verified with processor"
            );
        }

        let new_order = NewOrder {
            user_id: user.user_id,
            items,
            payment_method: request
                .payment_method
                .filter(|method| !method.trim().is_empty())
                .unwrap_or_else(|| self.config.default_payment_method.clone()),
            items_price: pricing.items_price,
            tax_price: pricing.tax_price,
            total_price: pricing.total_price,
            paid_at: Utc::now(),
            payment_intent_id: payment_intent_id.clone(),
        };

        match self.orders.insert(new_order).await {
            Ok(record) => {
                counter!("storefront.orders.created", 1);
                info!(
                    order_id = %record.order.id,
                    total_price = %record.order.total_price,
                    items = record.items.len(),
                    "Order recorded"
                );
                Ok(CreatedOrder {
                    order: OrderResponse::owned(record),
                    replayed: false,
                })
            }
            // Lost a race against a concurrent request for the same intent
            Err(ServiceError::Conflict(message)) => {
                let Some(intent_id) = payment_intent_id.as_deref() else {
                    return Err(ServiceError::Conflict(message));
                };
                match self.orders.find_by_payment_intent(intent_id).await? {
                    Some(existing) => self.replay(user, existing),
                    None => Err(ServiceError::Conflict(
                        "payment intent already recorded".to_string(),
                    )),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Orders owned by `user_id`, oldest first.
    #[instrument(skip(self))]
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        let records = self.orders.find_by_user(user_id).await?;
        debug!(count = records.len(), "Listed own orders");
        Ok(records.into_iter().map(OrderResponse::owned).collect())
    }

    /// Every order with its owner expanded to `{id, name, email}`.
    #[instrument(skip(self))]
    pub async fn list_all_orders(&self) -> Result<Vec<OrderResponse>, ServiceError> {
        let records = self.orders.find_all().await?;

        let mut owner_ids: Vec<Uuid> = records.iter().map(|r| r.order.user_id).collect();
        owner_ids.sort_unstable();
        owner_ids.dedup();

        let owners: HashMap<Uuid, UserSummary> = self
            .users
            .find_by_ids(&owner_ids)
            .await?
            .into_iter()
            .map(|model| (model.id, UserSummary::from(model)))
            .collect();

        debug!(count = records.len(), "Listed all orders");
        Ok(records
            .into_iter()
            .map(|record| {
                let owner = owners
                    .get(&record.order.user_id)
                    .cloned()
                    .map(OrderOwner::Expanded)
                    .unwrap_or(OrderOwner::Missing);
                OrderResponse::from_record(record, owner)
            })
            .collect())
    }

    fn replay(&self, user: &AuthUser, existing: OrderRecord) -> Result<CreatedOrder, ServiceError> {
        if existing.order.user_id != user.user_id {
            warn!(
                order_id = %existing.order.id,
                "Payment intent already recorded for another account"
            );
            return Err(ServiceError::Conflict(
                "payment intent already recorded for another account".to_string(),
            ));
        }

        counter!("storefront.orders.replayed", 1);
        info!(order_id = %existing.order.id, "Returning existing order for payment intent");
        Ok(CreatedOrder {
            order: OrderResponse::owned(existing),
            replayed: true,
        })
    }

    async fn verify_payment(
        &self,
        user: &AuthUser,
        intent_id: &str,
        total: Decimal,
    ) -> Result<(), ServiceError> {
        let intent = self.processor.retrieve_payment_intent(intent_id).await?;

        if intent.user_id() != Some(user.user_id.to_string().as_str()) {
            warn!(
                payment_intent_id = %intent.id,
                "Payment intent was created for another account"
            );
            return Err(ServiceError::PaymentVerificationFailed(format!(
                "payment intent {} does not belong to this account",
                intent.id
            )));
        }

        if !intent.is_succeeded() {
            return Err(ServiceError::PaymentVerificationFailed(format!(
                "payment intent {} has status {}",
                intent.id, intent.status
            )));
        }

        let expected = to_minor_units(total).ok_or_else(|| {
            ServiceError::ValidationError("totalPrice is out of range".to_string())
        })?;
        if intent.amount != expected {
            warn!(
                payment_intent_id = %intent.id,
                charged = intent.amount,
                expected,
                "Payment amount does not match order total"
            );
            return Err(ServiceError::PaymentVerificationFailed(
                "charged amount does not match order total".to_string(),
            ));
        }

        if !intent.currency.eq_ignore_ascii_case(&self.config.currency) {
            return Err(ServiceError::PaymentVerificationFailed(format!(
                "payment intent currency {} does not match {}",
                intent.currency, self.config.currency
            )));
        }

        Ok(())
    }
}

fn prepare_items(items: Option<Vec<OrderItemInput>>) -> Result<Vec<NewOrderItem>, ServiceError> {
    let items = items.unwrap_or_default();
    if items.is_empty() {
        return Err(ServiceError::ValidationError("No order items".to_string()));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            item.validate().map_err(|e| {
                ServiceError::ValidationError(format!("orderItems[{}]: {}", index, e))
            })?;
            Ok(NewOrderItem {
                name: item.name.trim().to_string(),
                price: round_money(item.price),
                product_ref: item.product.trim().to_string(),
                image: item.image.filter(|image| !image.trim().is_empty()),
            })
        })
        .collect()
}

fn money(field: &str, value: Option<Decimal>) -> Result<Decimal, ServiceError> {
    let value = value.unwrap_or(Decimal::ZERO);
    validate_money(&value).map_err(|err| {
        let reason = err.message.unwrap_or_else(|| err.code.clone());
        ServiceError::ValidationError(format!("{} {}", field, reason))
    })?;
    Ok(round_money(value))
}

fn normalize_intent_id(value: Option<String>) -> Result<Option<String>, ServiceError> {
    match value {
        None => Ok(None),
        Some(id) if id.trim().is_empty() => Err(ServiceError::ValidationError(
            "paymentIntentId must not be blank".to_string(),
        )),
        Some(id) => Ok(Some(id.trim().to_string())),
    }
}

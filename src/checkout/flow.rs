use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::cart::Cart;
use crate::services::orders::{CreateOrderRequest, OrderResponse};
use crate::services::payments::PaymentIntentResponse;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("cart total cannot be charged: {0}")]
    InvalidAmount(String),

    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Server calls needed by a checkout attempt
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckoutBackend: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount: f64,
    ) -> Result<PaymentIntentResponse, CheckoutError>;

    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, CheckoutError>;
}

/// Result of asking the processor to confirm a card payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardOutcome {
    Succeeded,
    Declined(String),
}

/// Confirms a card payment against an intent's client secret
#[async_trait]
pub trait CardConfirmer: Send + Sync {
    async fn confirm_card_payment(&self, client_secret: &str) -> Result<CardOutcome, CheckoutError>;
}

/// Drives checkout attempts against a backend.
pub struct CheckoutFlow<B> {
    backend: B,
}

impl<B: CheckoutBackend> CheckoutFlow<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Requests an intent for the cart total and snapshots the cart into the
    /// order that will be recorded if the payment goes through.
    #[instrument(skip(self, cart), fields(items = cart.len()))]
    pub async fn begin(&self, cart: &Cart) -> Result<PendingCheckout<'_, B>, CheckoutError> {
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let mut order = cart
            .to_order_request(None)
            .ok_or_else(|| CheckoutError::InvalidAmount("total overflows".to_string()))?;
        let total = order.total_price.unwrap_or_default();
        let amount = total
            .to_f64()
            .filter(|amount| *amount > 0.0)
            .ok_or_else(|| CheckoutError::InvalidAmount(total.to_string()))?;

        let intent = self.backend.create_payment_intent(amount).await?;
        info!(payment_intent_id = %intent.payment_intent_id, "Checkout started");
        order.payment_intent_id = Some(intent.payment_intent_id.clone());

        Ok(PendingCheckout {
            backend: &self.backend,
            client_secret: intent.client_secret,
            order,
            payment_intent_id: intent.payment_intent_id,
        })
    }
}

/// A checkout attempt awaiting card confirmation. Confirming consumes it, so
/// an attempt records at most one order.
pub struct PendingCheckout<'a, B> {
    backend: &'a B,
    client_secret: String,
    payment_intent_id: String,
    order: CreateOrderRequest,
}

impl<'a, B: CheckoutBackend> PendingCheckout<'a, B> {
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn payment_intent_id(&self) -> &str {
        &self.payment_intent_id
    }

    /// Confirms the card payment and, only if it succeeded, records the order.
    #[instrument(skip(self, confirmer), fields(payment_intent_id = %self.payment_intent_id))]
    pub async fn confirm<C>(self, confirmer: &C) -> Result<OrderResponse, CheckoutError>
    where
        C: CardConfirmer + ?Sized,
    {
        match confirmer.confirm_card_payment(&self.client_secret).await? {
            CardOutcome::Succeeded => {
                let order = self.backend.create_order(self.order).await?;
                info!(order_id = %order.id, "Checkout completed");
                Ok(order)
            }
            CardOutcome::Declined(message) => {
                warn!(reason = %message, "Card payment declined");
                Err(CheckoutError::PaymentDeclined(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::cart::CartItem;
    use crate::services::orders::OrderOwner;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct FixedConfirmer(CardOutcome);

    #[async_trait]
    impl CardConfirmer for FixedConfirmer {
        async fn confirm_card_payment(
            &self,
            client_secret: &str,
        ) -> Result<CardOutcome, CheckoutError> {
            assert_eq!(client_secret, "pi_1_secret");
            Ok(self.0.clone())
        }
    }

    fn cart() -> Cart {
        let mut cart = Cart::new();
        cart.add(CartItem {
            id: "pro".into(),
            name: "Pro".into(),
            price: dec!(199.00),
            period: "Monthly".into(),
        });
        cart
    }

    fn recorded(request: &CreateOrderRequest) -> OrderResponse {
        let now = Utc::now();
        let total = request.total_price.unwrap_or(Decimal::ZERO);
        OrderResponse {
            id: Uuid::new_v4(),
            user: OrderOwner::Id(Uuid::new_v4()),
            order_items: Vec::new(),
            payment_method: "Card".into(),
            items_price: total,
            tax_price: Decimal::ZERO,
            total_price: total,
            is_paid: true,
            paid_at: now,
            is_delivered: false,
            delivered_at: None,
            payment_intent_id: request.payment_intent_id.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn backend_expecting_orders(times: usize) -> MockCheckoutBackend {
        let mut backend = MockCheckoutBackend::new();
        backend
            .expect_create_payment_intent()
            .withf(|amount| (*amount - 199.0).abs() < f64::EPSILON)
            .times(1)
            .returning(|_| {
                Ok(PaymentIntentResponse {
                    client_secret: "pi_1_secret".into(),
                    payment_intent_id: "pi_1".into(),
                })
            });
        backend
            .expect_create_order()
            .withf(|req| req.payment_intent_id.as_deref() == Some("pi_1"))
            .times(times)
            .returning(|req| Ok(recorded(&req)));
        backend
    }

    #[tokio::test]
    async fn successful_payment_records_exactly_one_order() {
        let flow = CheckoutFlow::new(backend_expecting_orders(1));
        let pending = flow.begin(&cart()).await.unwrap();
        assert_eq!(pending.payment_intent_id(), "pi_1");

        let order = pending
            .confirm(&FixedConfirmer(CardOutcome::Succeeded))
            .await
            .unwrap();
        assert_eq!(order.total_price, dec!(199.00));
        assert!(order.is_paid);
    }

    #[tokio::test]
    async fn declined_payment_records_nothing() {
        let flow = CheckoutFlow::new(backend_expecting_orders(0));
        let pending = flow.begin(&cart()).await.unwrap();

        let result = pending
            .confirm(&FixedConfirmer(CardOutcome::Declined("card_declined".into())))
            .await;
        assert_matches!(result, Err(CheckoutError::PaymentDeclined(ref m)) if m == "card_declined");
    }

    #[tokio::test]
    async fn empty_cart_never_requests_an_intent() {
        let mut backend = MockCheckoutBackend::new();
        backend.expect_create_payment_intent().never();
        backend.expect_create_order().never();

        let flow = CheckoutFlow::new(backend);
        assert_eq!(
            flow.begin(&Cart::new()).await.err(),
            Some(CheckoutError::EmptyCart)
        );
    }

    #[tokio::test]
    async fn overflowing_cart_never_requests_an_intent() {
        let mut backend = MockCheckoutBackend::new();
        backend.expect_create_payment_intent().never();
        backend.expect_create_order().never();

        let mut cart = cart();
        cart.add(CartItem {
            id: "max".into(),
            name: "Max".into(),
            price: Decimal::MAX,
            period: "Monthly".into(),
        });

        let flow = CheckoutFlow::new(backend);
        assert_matches!(
            flow.begin(&cart).await.err(),
            Some(CheckoutError::InvalidAmount(_))
        );
    }
}

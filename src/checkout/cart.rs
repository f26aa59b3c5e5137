use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::services::orders::{CreateOrderRequest, OrderItemInput};

/// One selected plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Plan identifier; recorded as the order item's `product`
    pub id: String,
    pub name: String,
    pub price: Decimal,
    /// Billing period label, e.g. "Monthly"
    pub period: String,
}

/// Client-held list of selected plans. Each plan appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `item` unless a plan with the same id is already present.
    /// Returns whether the cart changed.
    pub fn add(&mut self, item: CartItem) -> bool {
        if self.items.iter().any(|existing| existing.id == item.id) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<CartItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Sum of item prices, `None` on overflow
    pub fn total(&self) -> Option<Decimal> {
        self.items
            .iter()
            .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.price))
    }

    /// Order body for the paid cart. Tax is not charged on plans.
    pub fn to_order_request(&self, payment_intent_id: Option<String>) -> Option<CreateOrderRequest> {
        let total = self.total()?;
        Some(CreateOrderRequest {
            order_items: Some(
                self.items
                    .iter()
                    .map(|item| OrderItemInput {
                        name: item.name.clone(),
                        price: item.price,
                        product: item.id.clone(),
                        image: None,
                    })
                    .collect(),
            ),
            payment_method: Some("Card".to_string()),
            items_price: Some(total),
            tax_price: Some(Decimal::ZERO),
            total_price: Some(total),
            payment_intent_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan(id: &str, price: Decimal) -> CartItem {
        CartItem {
            id: id.to_string(),
            name: id.to_uppercase(),
            price,
            period: "Monthly".to_string(),
        }
    }

    #[test]
    fn duplicate_plans_are_ignored() {
        let mut cart = Cart::new();
        assert!(cart.add(plan("pro", dec!(199.00))));
        assert!(!cart.add(plan("pro", dec!(199.00))));
        assert_eq!(cart.len(), 1);
    }

    #[test]
    fn total_and_removal() {
        let mut cart = Cart::new();
        cart.add(plan("pro", dec!(199.00)));
        cart.add(plan("team", dec!(49.99)));
        assert_eq!(cart.total(), Some(dec!(248.99)));

        assert_eq!(cart.remove("pro").map(|i| i.id), Some("pro".to_string()));
        assert_eq!(cart.remove("pro"), None);
        assert_eq!(cart.total(), Some(dec!(49.99)));
    }

    #[test]
    fn order_request_mirrors_cart() {
        let mut cart = Cart::new();
        cart.add(plan("pro", dec!(199.00)));

        let body = cart.to_order_request(Some("pi_1".into())).unwrap();
        let items = body.order_items.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product, "pro");
        assert_eq!(body.total_price, Some(dec!(199.00)));
        assert_eq!(body.payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[test]
    fn overflowing_total_is_none() {
        let mut cart = Cart::new();
        cart.add(plan("a", Decimal::MAX));
        cart.add(plan("b", Decimal::ONE));

        assert_eq!(cart.total(), None);
        assert!(cart.to_order_request(None).is_none());
    }
}

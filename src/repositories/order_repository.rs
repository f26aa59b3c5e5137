use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::entities::order::{self, Entity as Order, Model as OrderModel};
use crate::entities::order_item::{self, Entity as OrderItem, Model as OrderItemModel};
use crate::errors::ServiceError;

use super::{BaseRepository, NewOrder, OrderRecord, OrderRepository, Repository};

/// sea-orm backed order storage
#[derive(Debug, Clone)]
pub struct SeaOrmOrderRepository {
    base: BaseRepository,
}

impl SeaOrmOrderRepository {
    pub fn new(db: Arc<sea_orm::DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Loads items for `orders` in one query and zips them back in order.
    async fn attach_items<C: ConnectionTrait>(
        db: &C,
        orders: Vec<OrderModel>,
    ) -> Result<Vec<OrderRecord>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::OrderId)
            .order_by_asc(order_item::Column::Position)
            .all(db)
            .await?;

        let mut by_order: HashMap<Uuid, Vec<OrderItemModel>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = by_order.remove(&order.id).unwrap_or_default();
                OrderRecord { order, items }
            })
            .collect())
    }
}

#[async_trait]
impl OrderRepository for SeaOrmOrderRepository {
    async fn insert(&self, new_order: NewOrder) -> Result<OrderRecord, ServiceError> {
        let db = self.base.get_db();
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(new_order.user_id),
            payment_method: Set(new_order.payment_method),
            items_price: Set(new_order.items_price),
            tax_price: Set(new_order.tax_price),
            total_price: Set(new_order.total_price),
            is_paid: Set(true),
            paid_at: Set(new_order.paid_at),
            is_delivered: Set(false),
            delivered_at: Set(None),
            payment_intent_id: Set(new_order.payment_intent_id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let order = match order_model.insert(&txn).await {
            Ok(order) => order,
            Err(e) => {
                let err = ServiceError::DatabaseError(e);
                if err.is_unique_violation() {
                    debug!(payment_intent_id = ?new_order.payment_intent_id, "payment intent already recorded");
                    return Err(ServiceError::Conflict(
                        "payment intent already recorded".to_string(),
                    ));
                }
                error!(error = %err, "Failed to insert order");
                return Err(err);
            }
        };

        let item_models: Vec<order_item::ActiveModel> = new_order
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                position: Set(position as i32),
                name: Set(item.name.clone()),
                price: Set(item.price),
                product_ref: Set(item.product_ref.clone()),
                image: Set(item.image.clone()),
            })
            .collect();

        OrderItem::insert_many(item_models)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to insert order items");
                ServiceError::DatabaseError(e)
            })?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(&txn)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order transaction");
            ServiceError::DatabaseError(e)
        })?;

        Ok(OrderRecord { order, items })
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<OrderRecord>, ServiceError> {
        let db = self.base.get_db();
        let found = Order::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(db)
            .await?;

        match found {
            Some(order) => Ok(Self::attach_items(db, vec![order]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<OrderRecord>, ServiceError> {
        let db = self.base.get_db();
        let orders = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_asc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .all(db)
            .await?;

        Self::attach_items(db, orders).await
    }

    async fn find_all(&self) -> Result<Vec<OrderRecord>, ServiceError> {
        let db = self.base.get_db();
        let orders = Order::find()
            .order_by_asc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .all(db)
            .await?;

        Self::attach_items(db, orders).await
    }
}

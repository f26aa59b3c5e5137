//! Persistence seams. Services depend on the traits here, so tests can
//! swap the sea-orm implementations for in-memory ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{order, order_item, user};
use crate::errors::ServiceError;

pub mod order_repository;
pub mod user_repository;

pub use order_repository::SeaOrmOrderRepository;
pub use user_repository::SeaOrmUserRepository;

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// An order together with its items in submission order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Line item to persist with a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub name: String,
    pub price: Decimal,
    pub product_ref: String,
    pub image: Option<String>,
}

/// Everything needed to insert an order and its items in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub items: Vec<NewOrderItem>,
    pub payment_method: String,
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub total_price: Decimal,
    pub paid_at: DateTime<Utc>,
    pub payment_intent_id: Option<String>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts the order and all items atomically. A duplicate
    /// `payment_intent_id` surfaces as [`ServiceError::Conflict`].
    async fn insert(&self, order: NewOrder) -> Result<OrderRecord, ServiceError>;

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<OrderRecord>, ServiceError>;

    /// Orders owned by `user_id`, oldest first.
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<OrderRecord>, ServiceError>;

    /// Every order, oldest first.
    async fn find_all(&self) -> Result<Vec<OrderRecord>, ServiceError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<user::Model>, ServiceError>;

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<user::Model>, ServiceError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>, ServiceError>;

    async fn create(
        &self,
        name: &str,
        email: &str,
        is_admin: bool,
    ) -> Result<user::Model, ServiceError>;

    async fn list(&self) -> Result<Vec<user::Model>, ServiceError>;
}

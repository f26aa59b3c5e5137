pub mod health;
pub mod orders;
pub mod payments;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::PaymentsConfig;
use crate::repositories::{OrderRepository, SeaOrmOrderRepository, SeaOrmUserRepository, UserRepository};
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;
use crate::services::stripe::PaymentProcessor;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires the services over sea-orm repositories and the given processor.
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        processor: Arc<dyn PaymentProcessor>,
        payments_config: PaymentsConfig,
    ) -> Self {
        let orders: Arc<dyn OrderRepository> = Arc::new(SeaOrmOrderRepository::new(db_pool.clone()));
        let users: Arc<dyn UserRepository> = Arc::new(SeaOrmUserRepository::new(db_pool));

        Self {
            orders: Arc::new(OrderService::new(
                orders,
                users,
                processor.clone(),
                payments_config.clone(),
            )),
            payments: Arc::new(PaymentService::new(processor, payments_config)),
        }
    }
}

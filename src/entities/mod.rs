//! sea-orm entities for the storefront tables.

pub mod order;
pub mod order_item;
pub mod user;

pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use user::Entity as User;

//! Client side of checkout: the cart, the pay-then-record driver and an HTTP
//! backend that talks to this service.

pub mod cart;
pub mod client;
pub mod flow;

pub use cart::{Cart, CartItem};
pub use client::HttpCheckoutBackend;
pub use flow::{CardConfirmer, CardOutcome, CheckoutBackend, CheckoutError, CheckoutFlow, PendingCheckout};

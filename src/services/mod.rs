//! Business services: the cart manager, checkout orchestrator, payment
//! coordinator and order lifecycle operations.

pub mod cart;
pub mod checkout;
pub mod orders;
pub mod payments;

pub use cart::CartService;
pub use checkout::CheckoutService;
pub use orders::OrderService;
pub use payments::PaymentService;

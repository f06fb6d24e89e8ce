pub mod carts;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod payments;
pub mod webhooks;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::notifier::Notifier;
use crate::services::{CartService, CheckoutService, OrderService, PaymentService};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        currency: String,
        webhook_secret: String,
    ) -> Self {
        Self {
            cart: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            checkout: Arc::new(CheckoutService::new(
                db.clone(),
                event_sender.clone(),
                notifier.clone(),
            )),
            orders: Arc::new(OrderService::new(
                db.clone(),
                event_sender.clone(),
                notifier.clone(),
            )),
            payments: Arc::new(PaymentService::new(
                db,
                gateway,
                notifier,
                event_sender,
                currency,
                webhook_secret,
            )),
        }
    }
}

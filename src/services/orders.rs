use crate::{
    entities::{
        order, order_line, product, Customer, Order, OrderLine, OrderStatus, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifier::{self, EmailMessage, EmailTemplate, Notifier},
    services::checkout::OrderWithLines,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order lifecycle service.
///
/// Every mutation goes through [`guarded_transition`], which re-reads the
/// order inside the transaction and checks the move against the status
/// machine, so a stale client can never skip a state or resurrect a
/// terminal order.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Serialize)]
pub struct OrderPage {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifier,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithLines, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let lines = OrderLine::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        let total = OrderWithLines::derive_total(&lines);
        Ok(OrderWithLines {
            order,
            lines,
            total,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_orders_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let per_page = per_page.clamp(1, 100);
        let paginator = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::OrderDate)
            .paginate(self.db.as_ref(), per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Customer-initiated cancellation. Only the owner may cancel, and only
    /// while the order is still pending; anything later needs staff.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = find_order(&txn, order_id).await?;
        if order.customer_id != customer_id {
            return Err(ServiceError::Forbidden(
                "Order belongs to another customer".to_string(),
            ));
        }
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let old_status = order.status;
        restock_lines(&txn, order_id).await?;
        let updated = apply_status(&txn, order, OrderStatus::Cancelled, None).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Cancelled,
            })
            .await;

        info!("Order {} cancelled by customer {}", order_id, customer_id);
        Ok(updated)
    }

    /// Staff moves a paid order into fulfilment.
    #[instrument(skip(self))]
    pub async fn mark_processing(
        &self,
        order_id: Uuid,
        staff_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        self.require_staff(staff_id).await?;
        self.guarded_transition(order_id, OrderStatus::Processing, None)
            .await
    }

    /// Staff marks the order shipped, optionally attaching a tracking number.
    /// The customer gets a shipment email.
    #[instrument(skip(self))]
    pub async fn mark_shipped(
        &self,
        order_id: Uuid,
        staff_id: Uuid,
        tracking_number: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        self.require_staff(staff_id).await?;
        let updated = self
            .guarded_transition(order_id, OrderStatus::Shipped, tracking_number)
            .await?;

        if let Ok(Some(customer)) = Customer::find_by_id(updated.customer_id)
            .one(self.db.as_ref())
            .await
        {
            notifier::dispatch(
                self.notifier.clone(),
                EmailMessage {
                    template: EmailTemplate::OrderShipped,
                    recipient: customer.email,
                    context: serde_json::json!({
                        "order_id": updated.id.to_string(),
                        "tracking_number": updated.tracking_number,
                    }),
                },
            );
        }

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn mark_completed(
        &self,
        order_id: Uuid,
        staff_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        self.require_staff(staff_id).await?;
        self.guarded_transition(order_id, OrderStatus::Completed, None)
            .await
    }

    /// Refunds a completed order. Stock is not restored: refunded goods are
    /// handled through returns processing, not resale.
    #[instrument(skip(self))]
    pub async fn refund_order(
        &self,
        order_id: Uuid,
        staff_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        self.require_staff(staff_id).await?;
        self.guarded_transition(order_id, OrderStatus::Refunded, None)
            .await
    }

    /// Staff cancellation, allowed up to and including processing. Restocks
    /// the order's lines in the same transaction as the status change.
    #[instrument(skip(self))]
    pub async fn cancel_order_staff(
        &self,
        order_id: Uuid,
        staff_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        self.require_staff(staff_id).await?;

        let txn = self.db.begin().await?;
        let order = find_order(&txn, order_id).await?;
        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let old_status = order.status;
        restock_lines(&txn, order_id).await?;
        let updated = apply_status(&txn, order, OrderStatus::Cancelled, None).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Cancelled,
            })
            .await;

        info!("Order {} cancelled by staff {}", order_id, staff_id);
        Ok(updated)
    }

    async fn require_staff(&self, staff_id: Uuid) -> Result<(), ServiceError> {
        let customer = Customer::find_by_id(staff_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Staff {} not found", staff_id)))?;
        if !customer.is_staff {
            warn!("Non-staff account {} attempted a staff operation", staff_id);
            return Err(ServiceError::Forbidden(
                "Staff privileges required".to_string(),
            ));
        }
        Ok(())
    }

    /// Re-reads the order in a transaction, validates the status move and
    /// applies it, then emits the status-changed event after commit.
    async fn guarded_transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        tracking_number: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = find_order(&txn, order_id).await?;
        if !order.status.can_transition_to(target) {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        let old_status = order.status;
        let updated = apply_status(&txn, order, target, tracking_number).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: target,
            })
            .await;

        info!("Order {} moved {} -> {}", order_id, old_status, target);
        Ok(updated)
    }
}

async fn find_order(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    Order::find_by_id(order_id)
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

async fn apply_status(
    txn: &DatabaseTransaction,
    order: order::Model,
    target: OrderStatus,
    tracking_number: Option<String>,
) -> Result<order::Model, ServiceError> {
    let mut active: order::ActiveModel = order.into();
    active.status = Set(target);
    if let Some(tracking) = tracking_number {
        active.tracking_number = Set(Some(tracking));
    }
    active.updated_at = Set(Utc::now());
    Ok(active.update(txn).await?)
}

/// Returns each line's quantity to product stock. Missing products are
/// logged and skipped rather than failing the cancellation.
async fn restock_lines(txn: &DatabaseTransaction, order_id: Uuid) -> Result<(), ServiceError> {
    let lines = OrderLine::find()
        .filter(order_line::Column::OrderId.eq(order_id))
        .all(txn)
        .await?;

    let now = Utc::now();
    for line in lines {
        match Product::find_by_id(line.product_id).one(txn).await? {
            Some(product) => {
                let new_stock = product.stock + line.quantity;
                let mut active: product::ActiveModel = product.into();
                active.stock = Set(new_stock);
                active.updated_at = Set(now);
                active.update(txn).await?;
            }
            None => {
                warn!(
                    "Order line {} references missing product {}; skipping restock",
                    line.id, line.product_id
                );
            }
        }
    }
    Ok(())
}

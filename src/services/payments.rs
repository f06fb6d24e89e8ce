use crate::{
    entities::{
        order, order_line, payment, Customer, Order, OrderLine, OrderStatus, Payment,
        PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{
        verify_webhook_signature, GatewayError, InitiateCharge, PaymentGateway,
        VerificationStatus,
    },
    notifier::{self, EmailMessage, EmailTemplate, Notifier},
    services::checkout::OrderWithLines,
};
use chrono::Utc;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Payment coordinator: initiates charges against the provider and
/// reconciles its webhook deliveries into local payment and order state.
///
/// Webhook handling trusts nothing in the delivery body beyond the
/// reference: success events are re-verified against the provider before
/// any state changes, and all writes key on the unique transaction id so
/// redeliveries collapse into no-ops.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    event_sender: Arc<EventSender>,
    currency: String,
    webhook_secret: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiatedPayment {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub checkout_url: String,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Result of a webhook delivery that was accepted.
#[derive(Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    AlreadyProcessed,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    data: WebhookData,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookData {
    reference: Option<String>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        event_sender: Arc<EventSender>,
        currency: String,
        webhook_secret: String,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
            event_sender,
            currency,
            webhook_secret,
        }
    }

    /// Starts a charge for a pending order and records a pending payment row.
    ///
    /// The provider call happens before the local insert; if the insert then
    /// fails the charge is orphaned on the provider side and reconciled by
    /// the webhook's get-or-create path.
    #[instrument(skip(self))]
    pub async fn initiate_payment(
        &self,
        order_id: Uuid,
        amount_override: Option<Decimal>,
    ) -> Result<InitiatedPayment, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        match order.status {
            OrderStatus::Pending => {}
            OrderStatus::Cancelled | OrderStatus::Refunded => {
                return Err(ServiceError::InvalidOperation(format!(
                    "Order {} is {} and cannot be paid",
                    order_id, order.status
                )));
            }
            _ => {
                return Err(ServiceError::Conflict(format!(
                    "Order {} is already paid",
                    order_id
                )));
            }
        }

        let in_flight = Payment::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(
                payment::Column::Status
                    .is_in([PaymentStatus::Pending, PaymentStatus::Completed]),
            )
            .one(self.db.as_ref())
            .await?;
        if in_flight.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Order {} already has an active payment",
                order_id
            )));
        }

        let amount = match amount_override {
            Some(amount) => amount,
            None => {
                let lines = OrderLine::find()
                    .filter(order_line::Column::OrderId.eq(order_id))
                    .all(self.db.as_ref())
                    .await?;
                OrderWithLines::derive_total(&lines)
            }
        };
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be positive".to_string(),
            ));
        }

        let customer = Customer::find_by_id(order.customer_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Customer {} not found", order.customer_id))
            })?;

        let reference = charge_reference(order_id, Utc::now().timestamp());
        let amount_minor = to_minor_units(amount).ok_or_else(|| {
            ServiceError::ValidationError("Payment amount out of range".to_string())
        })?;

        let charge = InitiateCharge {
            amount_minor,
            currency: self.currency.clone(),
            email: customer.email.clone(),
            reference: reference.clone(),
            metadata: serde_json::json!({
                "order_id": order_id.to_string(),
                "customer_id": order.customer_id.to_string(),
                "cart_id": order.cart_id.map(|id| id.to_string()),
            }),
        };

        let initiated = self.gateway.initiate(charge).await.map_err(|err| {
            error!("Charge initiation for order {} failed: {}", order_id, err);
            ServiceError::ExternalServiceError(gateway_error_detail(&err))
        })?;

        let now = Utc::now();
        let payment_id = Uuid::new_v4();
        let payment_model = payment::ActiveModel {
            id: Set(payment_id),
            order_id: Set(Some(order_id)),
            customer_id: Set(Some(order.customer_id)),
            reference: Set(reference.clone()),
            transaction_id: Set(reference.clone()),
            amount: Set(amount),
            currency: Set(self.currency.clone()),
            status: Set(PaymentStatus::Pending),
            payment_method: Set(None),
            payment_date: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        payment_model
            .insert(self.db.as_ref())
            .await
            .map_err(|err| map_inflight_payment_conflict(err, order_id))?;

        self.event_sender
            .send_or_log(Event::PaymentInitiated {
                payment_id,
                order_id,
                reference: reference.clone(),
            })
            .await;

        info!(
            "Payment {} initiated for order {} (reference {})",
            payment_id, order_id, reference
        );
        Ok(InitiatedPayment {
            payment_id,
            order_id,
            checkout_url: initiated.checkout_url,
            reference: initiated.reference,
            amount,
            currency: self.currency.clone(),
        })
    }

    /// Reconciles a webhook delivery. Signature verification runs against
    /// the raw body before anything is parsed or touched.
    #[instrument(skip(self, raw_body, signature))]
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let signature = signature.ok_or_else(|| {
            warn!("Webhook delivery rejected: missing signature header");
            ServiceError::Unauthorized("Missing webhook signature".to_string())
        })?;
        if !verify_webhook_signature(&self.webhook_secret, raw_body, signature) {
            warn!("Webhook delivery rejected: signature mismatch");
            return Err(ServiceError::Unauthorized(
                "Invalid webhook signature".to_string(),
            ));
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body).map_err(|err| {
            ServiceError::ValidationError(format!("Malformed webhook payload: {}", err))
        })?;

        match envelope.event.as_str() {
            "charge.success" => {
                let reference = envelope.data.reference.ok_or_else(|| {
                    ServiceError::ValidationError(
                        "charge.success event missing reference".to_string(),
                    )
                })?;
                self.reconcile_success(&reference).await
            }
            "invoice.payment_failed" => {
                let reference = envelope.data.reference.ok_or_else(|| {
                    ServiceError::ValidationError(
                        "invoice.payment_failed event missing reference".to_string(),
                    )
                })?;
                self.reconcile_failure(&reference).await
            }
            other => Err(ServiceError::UnrecognizedEvent(other.to_string())),
        }
    }

    /// Verify-then-settle for a successful charge. The provider is the
    /// source of truth: a delivery whose reference does not verify as
    /// successful changes nothing and is surfaced as a gateway failure so
    /// the provider redelivers.
    async fn reconcile_success(&self, reference: &str) -> Result<WebhookOutcome, ServiceError> {
        let verified = self.gateway.verify(reference).await.map_err(|err| {
            error!("Verification of {} failed: {}", reference, err);
            ServiceError::ExternalServiceError(gateway_error_detail(&err))
        })?;
        if verified.status != VerificationStatus::Success {
            return Err(ServiceError::ExternalServiceError(format!(
                "Transaction {} did not verify as successful",
                reference
            )));
        }

        let txn = self.db.begin().await?;

        // get-or-create keyed on the unique transaction id; a charge the
        // provider knows but we never initiated still gets a row
        let existing = Payment::find()
            .filter(payment::Column::TransactionId.eq(reference))
            .one(&txn)
            .await?;
        let payment_row = match existing {
            Some(row) => row,
            None => {
                let now = Utc::now();
                let seeded = payment::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(None),
                    customer_id: Set(None),
                    reference: Set(reference.to_string()),
                    transaction_id: Set(reference.to_string()),
                    amount: Set(Decimal::from(verified.amount_minor) / Decimal::from(100)),
                    currency: Set(verified.currency.clone()),
                    status: Set(PaymentStatus::Pending),
                    payment_method: Set(None),
                    payment_date: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                Payment::insert(seeded)
                    .on_conflict(
                        OnConflict::column(payment::Column::TransactionId)
                            .do_nothing()
                            .to_owned(),
                    )
                    .exec_without_returning(&txn)
                    .await?;
                Payment::find()
                    .filter(payment::Column::TransactionId.eq(reference))
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(format!(
                            "payment row for {} vanished after insert",
                            reference
                        ))
                    })?
            }
        };

        if payment_row.status == PaymentStatus::Completed {
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let payment_id = payment_row.id;
        let order_id = payment_row.order_id;
        let customer_id = payment_row.customer_id;
        let now = Utc::now();
        let mut active: payment::ActiveModel = payment_row.into();
        active.status = Set(PaymentStatus::Completed);
        active.payment_date = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let mut order_promoted = false;
        if let Some(order_id) = order_id {
            match Order::find_by_id(order_id).one(&txn).await? {
                Some(order) if order.status == OrderStatus::Pending => {
                    let mut active: order::ActiveModel = order.into();
                    active.status = Set(OrderStatus::Created);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                    order_promoted = true;
                }
                Some(order) => {
                    warn!(
                        "Payment {} settled but order {} is {}; leaving order untouched",
                        payment_id, order_id, order.status
                    );
                }
                None => {
                    warn!(
                        "Payment {} settled but order {} does not exist",
                        payment_id, order_id
                    );
                }
            }
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentCompleted {
                payment_id,
                order_id,
            })
            .await;
        if order_promoted {
            if let Some(order_id) = order_id {
                self.event_sender
                    .send_or_log(Event::OrderStatusChanged {
                        order_id,
                        old_status: OrderStatus::Pending,
                        new_status: OrderStatus::Created,
                    })
                    .await;
            }
        }

        if let (true, Some(customer_id)) = (order_promoted, customer_id) {
            if let Ok(Some(customer)) = Customer::find_by_id(customer_id)
                .one(self.db.as_ref())
                .await
            {
                notifier::dispatch(
                    self.notifier.clone(),
                    EmailMessage {
                        template: EmailTemplate::PaymentSuccess,
                        recipient: customer.email,
                        context: serde_json::json!({
                            "reference": reference,
                            "order_id": order_id.map(|id| id.to_string()),
                        }),
                    },
                );
            }
        }

        info!("Payment {} marked completed (reference {})", payment_id, reference);
        Ok(WebhookOutcome::Processed)
    }

    /// Marks a known payment failed. The order keeps its pending status so
    /// the customer can retry; terminal payments are never rewritten.
    async fn reconcile_failure(&self, reference: &str) -> Result<WebhookOutcome, ServiceError> {
        let payment_row = Payment::find()
            .filter(payment::Column::TransactionId.eq(reference))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No payment with transaction id {}", reference))
            })?;

        let payment_id = payment_row.id;
        let order_id = payment_row.order_id;
        let customer_id = payment_row.customer_id;

        // conditional write: a success delivery racing this one may have
        // already settled the payment, and terminal states are never rewritten
        let updated = Payment::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Failed))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::TransactionId.eq(reference))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(self.db.as_ref())
            .await?;
        if updated.rows_affected == 0 {
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        self.event_sender
            .send_or_log(Event::PaymentFailed {
                payment_id,
                order_id,
            })
            .await;

        if let Some(customer_id) = customer_id {
            if let Ok(Some(customer)) = Customer::find_by_id(customer_id)
                .one(self.db.as_ref())
                .await
            {
                notifier::dispatch(
                    self.notifier.clone(),
                    EmailMessage {
                        template: EmailTemplate::PaymentFailure,
                        recipient: customer.email,
                        context: serde_json::json!({
                            "reference": reference,
                            "order_id": order_id.map(|id| id.to_string()),
                        }),
                    },
                );
            }
        }

        info!("Payment {} marked failed (reference {})", payment_id, reference);
        Ok(WebhookOutcome::Processed)
    }
}

fn map_inflight_payment_conflict(err: DbErr, order_id: Uuid) -> ServiceError {
    let detail = err.to_string();
    // Postgres reports the index name, SQLite the column
    if detail.contains("idx_payments_inflight_per_order") || detail.contains("payments.order_id") {
        ServiceError::Conflict(format!("Order {} already has an active payment", order_id))
    } else {
        ServiceError::DatabaseError(err)
    }
}

fn charge_reference(order_id: Uuid, timestamp: i64) -> String {
    format!("order_{}_{}", order_id, timestamp)
}

fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::from(100)).round().to_i64()
}

fn gateway_error_detail(err: &GatewayError) -> String {
    match err {
        GatewayError::Declined { message, payload } => match payload {
            Some(payload) => format!("{} ({})", message, payload),
            None => message.clone(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reference_embeds_order_id_and_timestamp() {
        let order_id = Uuid::new_v4();
        let reference = charge_reference(order_id, 1_700_000_000);
        assert_eq!(
            reference,
            format!("order_{}_1700000000", order_id)
        );
    }

    #[test]
    fn minor_units_round_to_cents() {
        assert_eq!(to_minor_units(dec!(25.00)), Some(2500));
        assert_eq!(to_minor_units(dec!(0.01)), Some(1));
        assert_eq!(to_minor_units(dec!(19.995)), Some(2000));
    }

    #[test]
    fn webhook_envelope_parses_reference() {
        let body = br#"{"event":"charge.success","data":{"reference":"order_x_1","amount":2500}}"#;
        let envelope: WebhookEnvelope = serde_json::from_slice(body).unwrap();
        assert_eq!(envelope.event, "charge.success");
        assert_eq!(envelope.data.reference.as_deref(), Some("order_x_1"));
    }

    #[test]
    fn webhook_envelope_tolerates_missing_data() {
        let body = br#"{"event":"charge.dispute.create"}"#;
        let envelope: WebhookEnvelope = serde_json::from_slice(body).unwrap();
        assert!(envelope.data.reference.is_none());
    }
}

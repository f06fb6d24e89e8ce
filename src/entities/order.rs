use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::Display;
use utoipa::ToSchema;
use uuid::Uuid;

/// Order entity. Identity and line items are immutable once created; only
/// `status`, `tracking_number` and `updated_at` change over the order's life.
/// The total is always derived from the lines, never stored.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    #[sea_orm(nullable)]
    pub cart_id: Option<Uuid>,
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    #[sea_orm(column_type = "Text")]
    pub shipping_address: String,
    #[sea_orm(column_type = "Text")]
    pub billing_address: String,
    #[sea_orm(nullable)]
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLines,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLines.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order lifecycle states.
///
/// `Pending` is the initial state set at checkout. Payment reconciliation
/// moves a pending order to `Created`; staff actions drive the fulfillment
/// chain; `Cancelled` and `Refunded` are terminal, and `Completed` is
/// terminal except for the refund edge.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl OrderStatus {
    /// Whether the state machine permits moving from `self` to `target`.
    /// Every status mutation in the services is guarded by this table.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, target),
            (Pending, Created)
                | (Pending, Cancelled)
                | (Created, Processing)
                | (Created, Cancelled)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (Shipped, Completed)
                | (Completed, Refunded)
        )
    }

    /// True once a payment has settled against the order (or later).
    pub fn is_paid(self) -> bool {
        !matches!(self, OrderStatus::Pending | OrderStatus::Cancelled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn pending_splits_to_created_or_cancelled() {
        assert!(Pending.can_transition_to(Created));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Refunded));
    }

    #[test]
    fn fulfillment_chain_is_linear() {
        assert!(Created.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Completed));
        assert!(!Created.can_transition_to(Shipped));
        assert!(!Processing.can_transition_to(Completed));
    }

    #[test]
    fn shipped_orders_cannot_be_cancelled() {
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn only_completed_can_refund() {
        assert!(Completed.can_transition_to(Refunded));
        assert!(!Shipped.can_transition_to(Refunded));
        assert!(!Cancelled.can_transition_to(Refunded));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for target in [
            Pending, Created, Processing, Shipped, Completed, Cancelled, Refunded,
        ] {
            assert!(!Cancelled.can_transition_to(target));
            assert!(!Refunded.can_transition_to(target));
        }
    }

    #[test]
    fn no_self_transitions() {
        for status in [
            Pending, Created, Processing, Shipped, Completed, Cancelled, Refunded,
        ] {
            assert!(!status.can_transition_to(status));
        }
    }
}

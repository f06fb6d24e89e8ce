use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Payments::OrderId).uuid().null())
                    .col(ColumnDef::new(Payments::CustomerId).uuid().null())
                    .col(ColumnDef::new(Payments::Amount).decimal().not_null())
                    .col(
                        ColumnDef::new(Payments::Currency)
                            .string()
                            .not_null()
                            .default("KES"),
                    )
                    // idempotency keys for webhook reconciliation
                    .col(
                        ColumnDef::new(Payments::Reference)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Payments::TransactionId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Payments::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Payments::PaymentMethod).string().null())
                    .col(ColumnDef::new(Payments::PaymentDate).timestamp().null())
                    .col(ColumnDef::new(Payments::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Payments::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payments_order")
                    .table(Payments::Table)
                    .col(Payments::OrderId)
                    .to_owned(),
            )
            .await?;

        // Storage-level backstop for the one-in-flight-payment-per-order
        // invariant. The service pre-check alone is a check-then-act race
        // across the outbound provider call.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_inflight_per_order \
                 ON payments (order_id) WHERE status IN ('pending', 'completed')",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Payments {
    Table,
    Id,
    OrderId,
    CustomerId,
    Amount,
    Currency,
    Reference,
    TransactionId,
    Status,
    PaymentMethod,
    PaymentDate,
    CreatedAt,
    UpdatedAt,
}

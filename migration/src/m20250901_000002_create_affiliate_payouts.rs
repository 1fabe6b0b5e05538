use crate::m20250901_000001_create_users::Users;
use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
pub(crate) enum AffiliatePayouts {
    Table,
    Id,
    UserId,
    Amount,
    Status,
    Cycle,
    IdempotencyKey,
    ExternalRef,
    FailureReason,
    CreatedAt,
    PaidAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

/// 分销佣金打款记录
/// - status: pending(已认领佣金, 转账中) / paid / failed
/// - 按 (user_id, cycle) 建索引；同一周期可有多条，同一用户同时最多一条 pending
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AffiliatePayouts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AffiliatePayouts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AffiliatePayouts::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AffiliatePayouts::Amount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AffiliatePayouts::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(AffiliatePayouts::Cycle)
                            .string_len(7)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AffiliatePayouts::IdempotencyKey)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AffiliatePayouts::ExternalRef)
                            .string_len(255)
                            .null(),
                    )
                    .col(ColumnDef::new(AffiliatePayouts::FailureReason).text().null())
                    .col(
                        ColumnDef::new(AffiliatePayouts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AffiliatePayouts::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_affiliate_payouts_user")
                            .from(AffiliatePayouts::Table, AffiliatePayouts::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_affiliate_payouts_user_cycle")
                    .table(AffiliatePayouts::Table)
                    .col(AffiliatePayouts::UserId)
                    .col(AffiliatePayouts::Cycle)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_affiliate_payouts_status")
                    .table(AffiliatePayouts::Table)
                    .col(AffiliatePayouts::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(AffiliatePayouts::Table)
                    .to_owned(),
            )
            .await
    }
}

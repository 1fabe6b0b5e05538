use crate::m20250901_000001_create_users::Users;
use crate::m20250901_000002_create_affiliate_payouts::AffiliatePayouts;
use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Commissions {
    Table,
    Id,
    ReferrerId,
    ReferredUserId,
    PurchaseAmount,
    CommissionAmount,
    Status,
    ExternalRef,
    PayoutId,
    CreatedAt,
    PaidAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Commissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Commissions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Commissions::ReferrerId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Commissions::ReferredUserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Commissions::PurchaseAmount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Commissions::CommissionAmount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Commissions::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Commissions::ExternalRef).string_len(255).null())
                    .col(ColumnDef::new(Commissions::PayoutId).big_integer().null())
                    .col(
                        ColumnDef::new(Commissions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Commissions::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commissions_referrer")
                            .from(Commissions::Table, Commissions::ReferrerId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commissions_referred_user")
                            .from(Commissions::Table, Commissions::ReferredUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commissions_payout")
                            .from(Commissions::Table, Commissions::PayoutId)
                            .to(AffiliatePayouts::Table, AffiliatePayouts::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // 同一笔支付/账单只记一次佣金（webhook 重投幂等）
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_commissions_external_ref_unique")
                    .table(Commissions::Table)
                    .col(Commissions::ExternalRef)
                    .unique()
                    .to_owned(),
            )
            .await?;

        for (name, cols) in [
            (
                "idx_commissions_referrer_status",
                vec![Commissions::ReferrerId, Commissions::Status],
            ),
            ("idx_commissions_payout", vec![Commissions::PayoutId]),
        ] {
            let mut index = Index::create();
            index.if_not_exists().name(name).table(Commissions::Table);
            for col in cols {
                index.col(col);
            }
            manager.create_index(index.to_owned()).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().if_exists().table(Commissions::Table).to_owned())
            .await
    }
}

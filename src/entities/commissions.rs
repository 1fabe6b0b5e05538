use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
}

impl std::fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommissionStatus::Pending => write!(f, "pending"),
            CommissionStatus::Paid => write!(f, "paid"),
        }
    }
}

/// 佣金记录
/// 说明:
/// - 金额单位为美分
/// - status = paid 当且仅当 paid_at 有值
/// - payout_id 非空表示已被某次打款认领（转账中或已结算）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "commissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub referrer_id: i64,
    pub referred_user_id: i64,
    pub purchase_amount: i64,
    pub commission_amount: i64,
    pub status: CommissionStatus,
    /// 支付凭据 (payment intent / invoice id)
    pub external_ref: Option<String>,
    pub payout_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::ReferrerId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Restrict"
    )]
    Referrer,
    #[sea_orm(
        belongs_to = "super::affiliate_payouts::Entity",
        from = "Column::PayoutId",
        to = "super::affiliate_payouts::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    Payout,
}

impl Related<super::affiliate_payouts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payout.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

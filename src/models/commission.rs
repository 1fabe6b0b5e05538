use crate::entities::{CommissionStatus, commission_entity as commissions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommissionResponse {
    pub id: i64,
    pub referred_user_id: i64,
    /// 美分
    pub purchase_amount: i64,
    /// 美分
    pub commission_amount: i64,
    pub status: CommissionStatus,
    /// 支付或账单引用
    pub external_ref: Option<String>,
    pub payout_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<commissions::Model> for CommissionResponse {
    fn from(m: commissions::Model) -> Self {
        Self {
            id: m.id,
            referred_user_id: m.referred_user_id,
            purchase_amount: m.purchase_amount,
            commission_amount: m.commission_amount,
            status: m.status,
            external_ref: m.external_ref,
            payout_id: m.payout_id,
            created_at: m.created_at,
            paid_at: m.paid_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CommissionQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub status: Option<CommissionStatus>,
}

use crate::entities::{PayoutStatus, payout_entity as payouts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PayoutResponse {
    pub id: i64,
    pub user_id: i64,
    /// 美分
    pub amount: i64,
    pub status: PayoutStatus,
    pub cycle: String,
    pub external_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<payouts::Model> for PayoutResponse {
    fn from(m: payouts::Model) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            amount: m.amount,
            status: m.status,
            cycle: m.cycle,
            external_ref: m.external_ref,
            failure_reason: m.failure_reason,
            created_at: m.created_at,
            paid_at: m.paid_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PayoutQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// 单个用户的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Paid {
        payout_id: i64,
        amount: i64,
        transfer_id: String,
    },
    Failed {
        payout_id: i64,
        amount: i64,
        reason: String,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoPayoutAccount,
    BelowThreshold,
    PayoutInFlight,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoPayoutAccount => write!(f, "no payout account"),
            SkipReason::BelowThreshold => write!(f, "below threshold"),
            SkipReason::PayoutInFlight => write!(f, "an earlier payout is still in flight"),
        }
    }
}

/// 一次批量打款汇总
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PayoutBatchReport {
    pub cycle: String,
    pub eligible: usize,
    pub paid: usize,
    pub failed: usize,
    pub skipped: usize,
    pub reconciliation_needed: usize,
    /// 处理时出现数据库等内部错误的用户数
    pub errors: usize,
    /// 美分
    pub total_paid: i64,
}

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AffiliateSummary {
    pub referral_code: Option<String>,
    pub referred_users: u64,
    /// 待结算佣金（美分）
    pub pending_amount: i64,
    /// 已结算佣金（美分）
    pub paid_amount: i64,
    pub payout_threshold: i64,
    pub payout_account_configured: bool,
    pub eligible: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttachReferrerRequest {
    #[schema(example = "REF123")]
    pub referral_code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttachReferrerResponse {
    pub referrer_id: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectAccountResponse {
    pub account_id: String,
    pub onboarding_url: String,
}

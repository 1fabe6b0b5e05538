use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// 一次对外打款请求，金额为最小货币单位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub amount: i64,
    pub destination: String,
    pub idempotency_key: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Error, Debug)]
pub enum TransferError {
    /// 打款方明确拒绝，可在下个周期重新尝试
    #[error("transfer rejected: {0}")]
    Rejected(String),

    /// 结果未知，不能自动重试
    #[error("transfer timed out after {0}s")]
    Timeout(u64),

    /// 网络等错误，打款方是否已受理未知
    #[error("transfer outcome unknown: {0}")]
    Unknown(String),
}

/// 佣金打款通道
#[async_trait]
pub trait TransferRail: Send + Sync {
    /// 成功时返回外部转账 id
    async fn create_transfer(&self, request: &TransferRequest) -> Result<String, TransferError>;
}

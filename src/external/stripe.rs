use crate::config::StripeConfig;
use crate::error::{AppError, AppResult};
use crate::external::transfer::{TransferError, TransferRail, TransferRequest};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use stripe::{
    Account, AccountId, AccountLink, AccountLinkType, AccountType, Client, CreateAccount,
    CreateAccountCapabilities, CreateAccountCapabilitiesTransfers, CreateAccountLink,
    CreateTransfer, Currency, ErrorCode, ErrorType, Metadata, RequestStrategy, StripeError,
    Transfer,
};

type HmacSha256 = Hmac<Sha256>;

/// Stripe-Signature 时间戳容差（秒）
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeService {
    client: Client,
    config: StripeConfig,
    currency: Currency,
}

/// Connect 入驻结果
#[derive(Debug, Clone)]
pub struct ConnectOnboarding {
    pub account_id: String,
    pub onboarding_url: String,
}

impl StripeService {
    pub fn new(config: StripeConfig) -> Self {
        let currency = parse_currency(&config.currency).unwrap_or_else(|| {
            log::warn!(
                "Unknown currency '{}' in stripe config, falling back to usd",
                config.currency
            );
            Currency::USD
        });
        Self {
            client: Client::new(config.secret_key.clone()),
            config,
            currency,
        }
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// 为用户创建 Express 账户（若已有则复用）并生成入驻链接
    pub async fn create_connect_onboarding(
        &self,
        user_id: i64,
        email: &str,
        existing_account: Option<&str>,
    ) -> AppResult<ConnectOnboarding> {
        let account_id: AccountId = match existing_account {
            Some(id) => id
                .parse()
                .map_err(|_| AppError::ValidationError(format!("Invalid account id: {id}")))?,
            None => {
                let mut metadata = Metadata::new();
                metadata.insert("user_id".to_string(), user_id.to_string());

                let mut params = CreateAccount::new();
                params.type_ = Some(AccountType::Express);
                params.email = Some(email);
                params.metadata = Some(metadata);
                params.capabilities = Some(CreateAccountCapabilities {
                    transfers: Some(CreateAccountCapabilitiesTransfers {
                        requested: Some(true),
                    }),
                    ..Default::default()
                });
                let account = Account::create(&self.client, params).await?;
                log::info!("Created Stripe Connect account {} for user {user_id}", account.id);
                account.id
            }
        };

        let mut link = CreateAccountLink::new(account_id.clone(), AccountLinkType::AccountOnboarding);
        link.refresh_url = self.config.connect_refresh_url.as_deref();
        link.return_url = self.config.connect_return_url.as_deref();
        let link = AccountLink::create(&self.client, link).await?;

        Ok(ConnectOnboarding {
            account_id: account_id.to_string(),
            onboarding_url: link.url,
        })
    }

    pub fn verify_webhook_signature(&self, payload: &str, signature: &str) -> AppResult<()> {
        verify_signature(
            &self.config.webhook_secret,
            payload,
            signature,
            chrono::Utc::now().timestamp(),
        )
    }
}

#[async_trait]
impl TransferRail for StripeService {
    async fn create_transfer(&self, request: &TransferRequest) -> Result<String, TransferError> {
        // 同一打款记录使用同一幂等键，重试不会重复打款
        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(request.idempotency_key.clone()));

        let mut params = CreateTransfer::new(self.currency, request.destination.clone());
        params.amount = Some(request.amount);
        params.metadata = Some(request.metadata.clone());
        params.description = Some("Affiliate commission payout");

        match Transfer::create(&client, params).await {
            Ok(transfer) => Ok(transfer.id.to_string()),
            Err(e) => Err(classify_transfer_error(e)),
        }
    }
}

/// Stripe 明确拒绝的请求才算 `Rejected`；5xx、幂等冲突和网络层错误的结果未知
fn classify_transfer_error(err: StripeError) -> TransferError {
    match err {
        StripeError::Stripe(req) => {
            let outcome_unknown = req.http_status >= 500
                || req.http_status == 409
                || req.error_type == ErrorType::IdempotencyError
                || req.error_type == ErrorType::Connection
                || req.code == Some(ErrorCode::IdempotencyKeyInUse);
            if outcome_unknown {
                TransferError::Unknown(req.to_string())
            } else {
                TransferError::Rejected(req.to_string())
            }
        }
        other => TransferError::Unknown(other.to_string()),
    }
}

fn parse_currency(code: &str) -> Option<Currency> {
    serde_json::from_value(serde_json::Value::String(code.to_ascii_lowercase())).ok()
}

/// 校验 `t=<unix>,v1=<hex>` 形式的签名头
pub fn verify_signature(secret: &str, payload: &str, header: &str, now: i64) -> AppResult<()> {
    if secret.is_empty() {
        return Err(AppError::ConfigError("Webhook secret is not configured".into()));
    }

    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| AppError::AuthError("Missing signature timestamp".into()))?;
    if signatures.is_empty() {
        return Err(AppError::AuthError("Missing v1 signature".into()));
    }
    if (now - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err(AppError::AuthError("Signature timestamp outside tolerance".into()));
    }

    for sig in signatures {
        let Ok(expected) = hex::decode(sig) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::InternalError(format!("HMAC init failed: {e}")))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::AuthError("Invalid webhook signature".into()))
}

#[cfg(test)]
pub(crate) fn sign_payload(secret: &str, payload: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
    #[serde(default)]
    pub affiliate: AffiliateConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "default_access_expires_in")]
    pub access_token_expires_in: i64, // seconds
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Connect onboarding 回跳地址
    #[serde(default)]
    pub connect_refresh_url: Option<String>,
    #[serde(default)]
    pub connect_return_url: Option<String>,
}

/// 分销佣金参数，金额单位均为美分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateConfig {
    /// 佣金比例 (basis points, 4000 = 40%)
    pub commission_rate_bp: i64,
    /// 打款门槛（含），5000 = $50.00
    pub payout_threshold: i64,
    /// 订阅续费在注册后多少个自然月内计佣
    pub subscription_commission_months: i32,
    pub transfer_timeout_secs: u64,
}

impl Default for AffiliateConfig {
    fn default() -> Self {
        Self {
            commission_rate_bp: 4000,
            payout_threshold: 5000,
            subscription_commission_months: 3,
            transfer_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// UTC 小时
    pub hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    /// 为空时禁用所有管理接口
    #[serde(default)]
    pub api_key: String,
}

fn default_access_expires_in() -> i64 {
    7200
}

fn default_currency() -> String {
    "usd".to_string()
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => Self::from_toml_str(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }
                fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
                    env::var(name)
                        .ok()
                        .and_then(|v| v.parse::<T>().ok())
                        .unwrap_or(default)
                }

                // 数据库 URL 在无配置文件时必须提供
                let database_url = get_env("DATABASE_URL")
                    .ok_or("DATABASE_URL is not set and config.toml was not found")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    jwt: JwtConfig {
                        secret: get_env("JWT_SECRET")
                            .unwrap_or_else(|| "change-me-in-production".to_string()),
                        access_token_expires_in: get_env_parse(
                            "JWT_ACCESS_EXPIRES_IN",
                            default_access_expires_in(),
                        ),
                    },
                    stripe: StripeConfig {
                        secret_key: get_env("STRIPE_SECRET_KEY").unwrap_or_default(),
                        webhook_secret: get_env("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
                        currency: get_env("STRIPE_CURRENCY").unwrap_or_else(default_currency),
                        connect_refresh_url: get_env("STRIPE_CONNECT_REFRESH_URL"),
                        connect_return_url: get_env("STRIPE_CONNECT_RETURN_URL"),
                    },
                    affiliate: AffiliateConfig::default(),
                    scheduler: SchedulerConfig::default(),
                    admin: AdminConfig::default(),
                }
            }
            Err(e) => {
                return Err(format!("Failed to read config file {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        toml::from_str(config_str).map_err(|e| format!("Failed to parse config file: {e}").into())
    }

    // 环境变量覆盖（即便文件存在时也覆盖）
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            self.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Ok(v) = env::var("JWT_ACCESS_EXPIRES_IN")
            && let Ok(n) = v.parse()
        {
            self.jwt.access_token_expires_in = n;
        }
        if let Ok(v) = env::var("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = v;
        }
        if let Ok(v) = env::var("STRIPE_WEBHOOK_SECRET") {
            self.stripe.webhook_secret = v;
        }
        if let Ok(v) = env::var("STRIPE_CURRENCY") {
            self.stripe.currency = v;
        }
        if let Ok(v) = env::var("STRIPE_CONNECT_REFRESH_URL") {
            self.stripe.connect_refresh_url = Some(v);
        }
        if let Ok(v) = env::var("STRIPE_CONNECT_RETURN_URL") {
            self.stripe.connect_return_url = Some(v);
        }

        // Affiliate
        if let Ok(v) = env::var("AFFILIATE_COMMISSION_RATE_BP")
            && let Ok(n) = v.parse()
        {
            self.affiliate.commission_rate_bp = n;
        }
        if let Ok(v) = env::var("AFFILIATE_PAYOUT_THRESHOLD")
            && let Ok(n) = v.parse()
        {
            self.affiliate.payout_threshold = n;
        }
        if let Ok(v) = env::var("AFFILIATE_SUBSCRIPTION_MONTHS")
            && let Ok(n) = v.parse()
        {
            self.affiliate.subscription_commission_months = n;
        }
        if let Ok(v) = env::var("AFFILIATE_TRANSFER_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.affiliate.transfer_timeout_secs = n;
        }

        // Scheduler
        if let Ok(v) = env::var("PAYOUT_SCHEDULER_ENABLED")
            && let Ok(b) = v.parse()
        {
            self.scheduler.enabled = b;
        }
        if let Ok(v) = env::var("PAYOUT_SCHEDULER_HOUR")
            && let Ok(h) = v.parse::<u32>()
            && h < 24
        {
            self.scheduler.hour = h;
        }

        if let Ok(v) = env::var("ADMIN_API_KEY") {
            self.admin.api_key = v;
        }
    }
}

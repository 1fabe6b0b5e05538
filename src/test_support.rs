//! 测试用数据库与打款通道

use crate::entities::{CommissionStatus, PlanTier, commission_entity as commissions, user_entity as users};
use crate::external::{TransferError, TransferRail, TransferRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// 内存 SQLite，单连接保证所有查询落在同一个库上
pub async fn setup_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    referrer_id: Option<i64>,
    stripe_account_id: Option<&str>,
) -> users::Model {
    create_user_at(db, username, referrer_id, stripe_account_id, Utc::now()).await
}

pub async fn create_user_at(
    db: &DatabaseConnection,
    username: &str,
    referrer_id: Option<i64>,
    stripe_account_id: Option<&str>,
    created_at: DateTime<Utc>,
) -> users::Model {
    users::ActiveModel {
        email: Set(format!("{username}@example.com")),
        username: Set(username.to_string()),
        referrer_id: Set(referrer_id),
        referral_code: Set(Some(format!("REF-{}", username.to_uppercase()))),
        stripe_account_id: Set(stripe_account_id.map(str::to_string)),
        stripe_customer_id: Set(None),
        plan_tier: Set(PlanTier::Free),
        subscription_expires_at: Set(None),
        report_credits: Set(0),
        created_at: Set(created_at),
        updated_at: Set(created_at),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

/// 直接写入一条 pending 佣金
pub async fn seed_commission(
    db: &DatabaseConnection,
    referrer_id: i64,
    referred_user_id: i64,
    commission_amount: i64,
) -> commissions::Model {
    commissions::ActiveModel {
        referrer_id: Set(referrer_id),
        referred_user_id: Set(referred_user_id),
        purchase_amount: Set(commission_amount * 10_000 / 4_000),
        commission_amount: Set(commission_amount),
        status: Set(CommissionStatus::Pending),
        external_ref: Set(None),
        payout_id: Set(None),
        created_at: Set(Utc::now()),
        paid_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

/// 可配置失败用户的假打款通道
#[derive(Default)]
pub struct FakeRail {
    failing_users: HashSet<i64>,
    slow_users: HashSet<i64>,
    requests: Mutex<Vec<TransferRequest>>,
}

impl FakeRail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, user_id: i64) -> Self {
        self.failing_users.insert(user_id);
        self
    }

    pub fn hanging_for(mut self, user_id: i64) -> Self {
        self.slow_users.insert(user_id);
        self
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferRail for FakeRail {
    async fn create_transfer(&self, request: &TransferRequest) -> Result<String, TransferError> {
        self.requests.lock().unwrap().push(request.clone());
        let user_id: i64 = request.metadata["user_id"].parse().unwrap();
        if self.slow_users.contains(&user_id) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.failing_users.contains(&user_id) {
            return Err(TransferError::Rejected("insufficient platform balance".into()));
        }
        Ok(format!("tr_{user_id}_{}", request.amount))
    }
}

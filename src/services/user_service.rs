use crate::entities::user_entity as users;
use crate::error::{AppError, AppResult};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, Set,
};

/// 向上追溯推荐链的最大层数
const MAX_REFERRAL_DEPTH: usize = 64;

#[derive(Clone)]
pub struct UserService {
    pool: DatabaseConnection,
}

impl UserService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    pub async fn get_user_by_id(&self, user_id: i64) -> AppResult<users::Model> {
        users::Entity::find_by_id(user_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
    }

    pub async fn get_user_by_email(&self, email: &str) -> AppResult<users::Model> {
        users::Entity::find()
            .filter(users::Column::Email.eq(email.trim().to_lowercase()))
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn find_by_referral_code(&self, code: &str) -> AppResult<Option<users::Model>> {
        Ok(users::Entity::find()
            .filter(users::Column::ReferralCode.eq(code.trim()))
            .one(&self.pool)
            .await?)
    }

    pub async fn find_by_stripe_customer(
        &self,
        customer_id: &str,
    ) -> AppResult<Option<users::Model>> {
        Ok(users::Entity::find()
            .filter(users::Column::StripeCustomerId.eq(customer_id))
            .one(&self.pool)
            .await?)
    }

    /// 绑定推荐人：推荐人必须存在、不能是自己或自己的下线，且已绑定后不可更换
    pub async fn attach_referrer(
        &self,
        user_id: i64,
        referral_code: &str,
    ) -> AppResult<users::Model> {
        let user = self.get_user_by_id(user_id).await?;
        if user.referrer_id.is_some() {
            return Err(AppError::ValidationError(
                "Referrer already assigned".to_string(),
            ));
        }

        let referrer = self
            .find_by_referral_code(referral_code)
            .await?
            .ok_or_else(|| AppError::ValidationError("Invalid referral code".to_string()))?;
        if referrer.id == user.id {
            return Err(AppError::ValidationError(
                "Users cannot refer themselves".to_string(),
            ));
        }

        if self.is_referred_by(referrer.referrer_id, user.id).await? {
            return Err(AppError::ValidationError(
                "Referral cycle is not allowed".to_string(),
            ));
        }

        let mut am = user.into_active_model();
        am.referrer_id = Set(Some(referrer.id));
        am.updated_at = Set(Utc::now());
        let user = am.update(&self.pool).await?;
        log::info!("User {} attached to referrer {}", user.id, referrer.id);
        Ok(user)
    }

    /// 从 `next` 开始沿推荐链向上查找 `ancestor`
    async fn is_referred_by(&self, mut next: Option<i64>, ancestor: i64) -> AppResult<bool> {
        for _ in 0..MAX_REFERRAL_DEPTH {
            let Some(id) = next else {
                return Ok(false);
            };
            if id == ancestor {
                return Ok(true);
            }
            next = self.get_user_by_id(id).await?.referrer_id;
        }
        log::warn!("Referral chain above user {ancestor} exceeds {MAX_REFERRAL_DEPTH} levels");
        Ok(true)
    }

    pub async fn set_stripe_customer(
        &self,
        user_id: i64,
        customer_id: &str,
    ) -> AppResult<users::Model> {
        let user = self.get_user_by_id(user_id).await?;
        if user.stripe_customer_id.as_deref() == Some(customer_id) {
            return Ok(user);
        }
        let mut am = user.into_active_model();
        am.stripe_customer_id = Set(Some(customer_id.to_string()));
        am.updated_at = Set(Utc::now());
        Ok(am.update(&self.pool).await?)
    }

    pub async fn set_payout_account(
        &self,
        user_id: i64,
        account_id: &str,
    ) -> AppResult<users::Model> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(AppError::ValidationError(
                "Payout account id must not be blank".to_string(),
            ));
        }
        let user = self.get_user_by_id(user_id).await?;
        let mut am = user.into_active_model();
        am.stripe_account_id = Set(Some(account_id.to_string()));
        am.updated_at = Set(Utc::now());
        Ok(am.update(&self.pool).await?)
    }

    pub async fn referral_count(&self, user_id: i64) -> AppResult<u64> {
        Ok(users::Entity::find()
            .filter(users::Column::ReferrerId.eq(user_id))
            .count(&self.pool)
            .await?)
    }
}

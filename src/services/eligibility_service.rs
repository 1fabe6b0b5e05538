use crate::entities::{CommissionStatus, commission_entity as commissions, user_entity as users};
use crate::error::AppResult;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, FromQueryResult, JoinType,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait,
};

/// 本周期可打款的推荐人
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult)]
pub struct EligibleUser {
    pub user_id: i64,
    pub stripe_account_id: String,
    /// 美分
    pub pending_amount: i64,
}

#[derive(Clone)]
pub struct EligibilityService {
    pool: DatabaseConnection,
    threshold: i64,
}

impl EligibilityService {
    pub fn new(pool: DatabaseConnection, threshold: i64) -> Self {
        Self { pool, threshold }
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn is_eligible(&self, user: &users::Model, pending_amount: i64) -> bool {
        user.payout_destination().is_some() && pending_amount >= self.threshold
    }

    /// 未结算且未被打款认领的佣金合计
    pub async fn pending_total(&self, user_id: i64) -> AppResult<i64> {
        pending_total_on(&self.pool, user_id).await
    }

    pub async fn paid_total(&self, user_id: i64) -> AppResult<i64> {
        let total: Option<Option<i64>> = commissions::Entity::find()
            .select_only()
            .column_as(Expr::cust("CAST(SUM(commission_amount) AS BIGINT)"), "total")
            .filter(commissions::Column::ReferrerId.eq(user_id))
            .filter(commissions::Column::Status.eq(CommissionStatus::Paid))
            .into_tuple()
            .one(&self.pool)
            .await?;
        Ok(total.flatten().unwrap_or(0))
    }

    /// 一次分组查询列出所有达标且配置了打款账户的用户，按待结算金额降序
    pub async fn eligible_users(&self) -> AppResult<Vec<EligibleUser>> {
        let rows = commissions::Entity::find()
            .select_only()
            .column_as(commissions::Column::ReferrerId, "user_id")
            .column_as(users::Column::StripeAccountId, "stripe_account_id")
            .column_as(
                Expr::cust("CAST(SUM(commissions.commission_amount) AS BIGINT)"),
                "pending_amount",
            )
            .join(JoinType::InnerJoin, commissions::Relation::Referrer.def())
            .filter(commissions::Column::Status.eq(CommissionStatus::Pending))
            .filter(commissions::Column::PayoutId.is_null())
            .filter(users::Column::StripeAccountId.is_not_null())
            // 与 payout_destination 一致，纯空白视为未配置
            .filter(Expr::cust("TRIM(users.stripe_account_id) <> ''"))
            .group_by(commissions::Column::ReferrerId)
            .group_by(users::Column::StripeAccountId)
            .having(Expr::cust_with_values(
                "CAST(SUM(commissions.commission_amount) AS BIGINT) >= ?",
                [self.threshold],
            ))
            .order_by_desc(Expr::cust("pending_amount"))
            .order_by_asc(commissions::Column::ReferrerId)
            .into_model::<EligibleUser>()
            .all(&self.pool)
            .await?;
        Ok(rows)
    }
}

/// 可在事务内复用的待结算合计
pub async fn pending_total_on<C: ConnectionTrait>(db: &C, user_id: i64) -> AppResult<i64> {
    let total: Option<Option<i64>> = commissions::Entity::find()
        .select_only()
        .column_as(Expr::cust("CAST(SUM(commission_amount) AS BIGINT)"), "total")
        .filter(commissions::Column::ReferrerId.eq(user_id))
        .filter(commissions::Column::Status.eq(CommissionStatus::Pending))
        .filter(commissions::Column::PayoutId.is_null())
        .into_tuple()
        .one(db)
        .await?;
    Ok(total.flatten().unwrap_or(0))
}

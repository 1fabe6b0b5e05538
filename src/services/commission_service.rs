use crate::entities::{CommissionStatus, commission_entity as commissions};
use crate::error::{AppError, AppResult};
use crate::models::{CommissionQuery, CommissionResponse};
use crate::utils::{PaginatedResponse, PaginationParams, commission_for};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set,
};

/// 佣金记账：每笔购买事件只产生一条 pending 佣金
#[derive(Clone)]
pub struct CommissionService {
    pool: DatabaseConnection,
    rate_bp: i64,
}

impl CommissionService {
    pub fn new(pool: DatabaseConnection, rate_bp: i64) -> Self {
        Self { pool, rate_bp }
    }

    /// 返回 None 表示该 external_ref 已记过佣金
    pub async fn record_commission(
        &self,
        referrer_id: i64,
        referred_user_id: i64,
        purchase_amount: i64,
        external_ref: Option<&str>,
    ) -> AppResult<Option<commissions::Model>> {
        if referrer_id == referred_user_id {
            return Err(AppError::ValidationError(
                "Referrer and referred user must differ".to_string(),
            ));
        }
        if purchase_amount <= 0 {
            return Err(AppError::ValidationError(format!(
                "Invalid purchase amount: {purchase_amount}"
            )));
        }

        if let Some(reference) = external_ref {
            let existing = commissions::Entity::find()
                .filter(commissions::Column::ExternalRef.eq(reference))
                .one(&self.pool)
                .await?;
            if existing.is_some() {
                log::info!("Commission for {reference} already recorded, skipping");
                return Ok(None);
            }
        }

        let commission_amount = commission_for(purchase_amount, self.rate_bp);
        let am = commissions::ActiveModel {
            referrer_id: Set(referrer_id),
            referred_user_id: Set(referred_user_id),
            purchase_amount: Set(purchase_amount),
            commission_amount: Set(commission_amount),
            status: Set(CommissionStatus::Pending),
            external_ref: Set(external_ref.map(str::to_string)),
            payout_id: Set(None),
            created_at: Set(Utc::now()),
            paid_at: Set(None),
            ..Default::default()
        };

        // 并发重投时由唯一索引兜底
        let inserted = commissions::Entity::insert(am)
            .on_conflict(
                OnConflict::column(commissions::Column::ExternalRef)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.pool)
            .await;

        let id = match inserted {
            Ok(res) => res.last_insert_id,
            Err(DbErr::RecordNotInserted) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let commission = commissions::Entity::find_by_id(id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("Commission {id} vanished")))?;

        log::info!(
            "Recorded commission {} for referrer {referrer_id}: {} of {} (ref {:?})",
            commission.id,
            commission.commission_amount,
            purchase_amount,
            external_ref
        );
        Ok(Some(commission))
    }

    pub async fn list_for_referrer(
        &self,
        referrer_id: i64,
        query: &CommissionQuery,
    ) -> AppResult<PaginatedResponse<CommissionResponse>> {
        let params = PaginationParams::new(query.page, query.per_page);

        let mut select =
            commissions::Entity::find().filter(commissions::Column::ReferrerId.eq(referrer_id));
        if let Some(status) = query.status.clone() {
            select = select.filter(commissions::Column::Status.eq(status));
        }

        let paginator = select
            .order_by_desc(commissions::Column::CreatedAt)
            .order_by_desc(commissions::Column::Id)
            .paginate(&self.pool, params.get_per_page());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(params.page_index()).await?;

        Ok(PaginatedResponse::new(items, &params, total).map(CommissionResponse::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_user, setup_db};

    #[tokio::test]
    async fn test_record_commission_at_forty_percent() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, None).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        let svc = CommissionService::new(db, 4000);

        let c = svc
            .record_commission(a.id, b.id, 20_000, Some("pi_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.referrer_id, a.id);
        assert_eq!(c.referred_user_id, b.id);
        assert_eq!(c.purchase_amount, 20_000);
        assert_eq!(c.commission_amount, 8_000);
        assert_eq!(c.status, CommissionStatus::Pending);
        assert!(c.paid_at.is_none());
        assert!(c.payout_id.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_reference_is_recorded_once() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, None).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        let svc = CommissionService::new(db, 4000);

        assert!(svc
            .record_commission(a.id, b.id, 1_000, Some("in_1"))
            .await
            .unwrap()
            .is_some());
        assert!(svc
            .record_commission(a.id, b.id, 1_000, Some("in_1"))
            .await
            .unwrap()
            .is_none());

        let list = svc
            .list_for_referrer(a.id, &CommissionQuery::default())
            .await
            .unwrap();
        assert_eq!(list.pagination.total, 1);
    }

    #[tokio::test]
    async fn test_rejects_self_referral_and_empty_purchase() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, None).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        let svc = CommissionService::new(db, 4000);

        assert!(matches!(
            svc.record_commission(a.id, a.id, 1_000, None).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            svc.record_commission(a.id, b.id, 0, None).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, None).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        let svc = CommissionService::new(db, 4000);
        for i in 0..3 {
            svc.record_commission(a.id, b.id, 1_000, Some(&format!("pi_{i}")))
                .await
                .unwrap();
        }

        let pending = svc
            .list_for_referrer(
                a.id,
                &CommissionQuery {
                    page: Some(1),
                    per_page: Some(2),
                    status: Some(CommissionStatus::Pending),
                },
            )
            .await
            .unwrap();
        assert_eq!(pending.items.len(), 2);
        assert_eq!(pending.pagination.total, 3);
        assert_eq!(pending.pagination.total_pages, 2);

        let paid = svc
            .list_for_referrer(
                a.id,
                &CommissionQuery {
                    status: Some(CommissionStatus::Paid),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(paid.pagination.total, 0);
    }
}

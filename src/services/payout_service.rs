//! 分销佣金打款
//!
//! 每个用户每个周期的处理分三步：
//! 1. 事务内锁定用户、复核待结算金额、写入 pending 打款并认领佣金
//! 2. 调用打款通道（带幂等键与超时）
//! 3. 事务内落结果：成功则打款与佣金一起置为 paid；被拒则打款置 failed 并释放佣金
//!
//! 转账超时或成功后落账失败时打款保持 pending 并继续持有佣金，
//! 不会被再次打款，交由人工对账。同一用户存在 pending 打款期间不会发起新的打款；
//! 同一周期内可以有多次打款，每次只结算自己认领的佣金。

use crate::config::AffiliateConfig;
use crate::entities::{
    CommissionStatus, PayoutStatus, commission_entity as commissions, payout_entity as payouts,
    user_entity as users,
};
use crate::error::{AppError, AppResult};
use crate::external::{TransferError, TransferRail, TransferRequest};
use crate::models::{
    PayoutBatchReport, PayoutOutcome, PayoutQuery, PayoutResponse, SkipReason,
};
use crate::services::EligibilityService;
use crate::utils::{PaginatedResponse, PaginationParams, format_cents, payout_cycle};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 超过该时长仍为 pending 的打款视为需要对账
pub const STALE_IN_FLIGHT_HOURS: i64 = 24;

pub const PAYOUT_METADATA_TYPE: &str = "affiliate_payout";

#[derive(Clone)]
pub struct PayoutService {
    pool: DatabaseConnection,
    rail: Arc<dyn TransferRail>,
    eligibility: EligibilityService,
    threshold: i64,
    transfer_timeout: Duration,
}

/// 已认领、待转账的打款
struct ClaimedPayout {
    payout: payouts::Model,
    destination: String,
}

impl PayoutService {
    pub fn new(
        pool: DatabaseConnection,
        rail: Arc<dyn TransferRail>,
        config: &AffiliateConfig,
    ) -> Self {
        let eligibility = EligibilityService::new(pool.clone(), config.payout_threshold);
        Self {
            pool,
            rail,
            eligibility,
            threshold: config.payout_threshold,
            transfer_timeout: Duration::from_secs(config.transfer_timeout_secs),
        }
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn idempotency_key(payout_id: i64) -> String {
        format!("affiliate-payout-{payout_id}")
    }

    /// 扫描一次可打款用户并逐个处理；单个用户失败不影响其他用户
    pub async fn run_batch(&self, now: DateTime<Utc>) -> AppResult<PayoutBatchReport> {
        let cycle = payout_cycle(now);

        match self.stale_in_flight(now).await {
            Ok(stale) => {
                for p in stale {
                    log::error!(
                        "Payout {} for user {} ({}) has been in flight since {}, needs reconciliation",
                        p.id,
                        p.user_id,
                        format_cents(p.amount),
                        p.created_at
                    );
                }
            }
            Err(e) => log::error!("Failed to list in-flight payouts: {e:?}"),
        }

        let candidates = self.eligibility.eligible_users().await?;
        log::info!(
            "Payout batch {cycle}: {} eligible users",
            candidates.len()
        );
        for c in &candidates {
            log::info!(
                "Payout candidate user {} pending {}",
                c.user_id,
                format_cents(c.pending_amount)
            );
        }

        let mut report = PayoutBatchReport {
            cycle: cycle.clone(),
            eligible: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            match self.process_user(candidate.user_id, &cycle, now).await {
                Ok(PayoutOutcome::Paid {
                    payout_id,
                    amount,
                    transfer_id,
                }) => {
                    log::info!(
                        "Payout {payout_id} paid to user {}: {} ({transfer_id})",
                        candidate.user_id,
                        format_cents(amount)
                    );
                    report.paid += 1;
                    report.total_paid += amount;
                }
                Ok(PayoutOutcome::Failed {
                    payout_id,
                    amount,
                    reason,
                }) => {
                    log::warn!(
                        "Payout {payout_id} to user {} failed ({}): {reason}",
                        candidate.user_id,
                        format_cents(amount)
                    );
                    report.failed += 1;
                }
                Ok(PayoutOutcome::Skipped(reason)) => {
                    log::info!("Payout for user {} skipped: {reason}", candidate.user_id);
                    report.skipped += 1;
                }
                Err(e @ AppError::ReconciliationNeeded { .. }) => {
                    log::error!("Payout for user {}: {e}", candidate.user_id);
                    report.reconciliation_needed += 1;
                }
                Err(e) => {
                    log::error!("Payout for user {} errored: {e:?}", candidate.user_id);
                    report.errors += 1;
                }
            }
        }

        log::info!(
            "Payout batch {cycle} finished: paid={} failed={} skipped={} reconciliation_needed={} errors={} total={}",
            report.paid,
            report.failed,
            report.skipped,
            report.reconciliation_needed,
            report.errors,
            format_cents(report.total_paid)
        );
        Ok(report)
    }

    pub async fn process_user(
        &self,
        user_id: i64,
        cycle: &str,
        now: DateTime<Utc>,
    ) -> AppResult<PayoutOutcome> {
        let claimed = match self.claim(user_id, cycle, now).await? {
            Ok(claimed) => claimed,
            Err(reason) => return Ok(PayoutOutcome::Skipped(reason)),
        };
        let payout_id = claimed.payout.id;
        let amount = claimed.payout.amount;

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("payout_id".to_string(), payout_id.to_string());
        metadata.insert("cycle".to_string(), cycle.to_string());
        metadata.insert("type".to_string(), PAYOUT_METADATA_TYPE.to_string());
        let request = TransferRequest {
            amount,
            destination: claimed.destination,
            idempotency_key: claimed.payout.idempotency_key.clone(),
            metadata,
        };

        let result = match tokio::time::timeout(
            self.transfer_timeout,
            self.rail.create_transfer(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransferError::Timeout(self.transfer_timeout.as_secs())),
        };

        match result {
            Ok(transfer_id) => {
                self.settle_paid(payout_id, &transfer_id, Utc::now())
                    .await
                    .map_err(|e| AppError::ReconciliationNeeded {
                        payout_id,
                        detail: format!(
                            "transfer {transfer_id} succeeded but ledger update failed: {e}"
                        ),
                    })?;
                Ok(PayoutOutcome::Paid {
                    payout_id,
                    amount,
                    transfer_id,
                })
            }
            Err(TransferError::Rejected(reason)) => {
                self.settle_failed(payout_id, &reason).await.map_err(|e| {
                    AppError::ReconciliationNeeded {
                        payout_id,
                        detail: format!("transfer rejected but ledger update failed: {e}"),
                    }
                })?;
                Ok(PayoutOutcome::Failed {
                    payout_id,
                    amount,
                    reason,
                })
            }
            Err(e @ (TransferError::Timeout(_) | TransferError::Unknown(_))) => {
                Err(AppError::ReconciliationNeeded {
                    payout_id,
                    detail: e.to_string(),
                })
            }
        }
    }

    /// 事务 1：复核并认领
    async fn claim(
        &self,
        user_id: i64,
        cycle: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Result<ClaimedPayout, SkipReason>> {
        let txn = self.pool.begin().await?;

        // 行锁，避免两个批次同时对同一用户复核
        let user = users::Entity::find_by_id(user_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

        let Some(destination) = user.payout_destination().map(str::to_string) else {
            txn.commit().await?;
            return Ok(Err(SkipReason::NoPayoutAccount));
        };

        let in_flight = payouts::Entity::find()
            .filter(payouts::Column::UserId.eq(user_id))
            .filter(payouts::Column::Status.eq(PayoutStatus::Pending))
            .one(&txn)
            .await?;
        if in_flight.is_some() {
            txn.commit().await?;
            return Ok(Err(SkipReason::PayoutInFlight));
        }

        let pending = commissions::Entity::find()
            .filter(commissions::Column::ReferrerId.eq(user_id))
            .filter(commissions::Column::Status.eq(CommissionStatus::Pending))
            .filter(commissions::Column::PayoutId.is_null())
            .all(&txn)
            .await?;
        let amount: i64 = pending.iter().map(|c| c.commission_amount).sum();
        if amount < self.threshold {
            txn.commit().await?;
            return Ok(Err(SkipReason::BelowThreshold));
        }

        let payout = payouts::ActiveModel {
            user_id: Set(user_id),
            amount: Set(amount),
            status: Set(PayoutStatus::Pending),
            cycle: Set(cycle.to_string()),
            idempotency_key: Set(String::new()),
            external_ref: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            paid_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        // 幂等键依赖自增 id，插入后在同一事务内补写
        let key = Self::idempotency_key(payout.id);
        let mut active: payouts::ActiveModel = payout.into();
        active.idempotency_key = Set(key);
        let payout = active.update(&txn).await?;

        let ids: Vec<i64> = pending.iter().map(|c| c.id).collect();
        let claimed = commissions::Entity::update_many()
            .col_expr(commissions::Column::PayoutId, Expr::value(payout.id))
            .filter(commissions::Column::Id.is_in(ids.clone()))
            .filter(commissions::Column::PayoutId.is_null())
            .exec(&txn)
            .await?;
        if claimed.rows_affected != ids.len() as u64 {
            // 事务未提交，丢弃即回滚
            return Err(AppError::Conflict(format!(
                "Commissions for user {user_id} changed while claiming"
            )));
        }

        txn.commit().await?;
        Ok(Ok(ClaimedPayout {
            payout,
            destination,
        }))
    }

    /// 事务 2（成功）：打款记录与佣金一起结算
    async fn settle_paid(
        &self,
        payout_id: i64,
        transfer_id: &str,
        paid_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let txn = self.pool.begin().await?;

        payouts::Entity::update_many()
            .col_expr(payouts::Column::Status, Expr::value(PayoutStatus::Paid))
            .col_expr(payouts::Column::ExternalRef, Expr::value(transfer_id))
            .col_expr(payouts::Column::PaidAt, Expr::value(paid_at))
            .filter(payouts::Column::Id.eq(payout_id))
            .filter(payouts::Column::Status.eq(PayoutStatus::Pending))
            .exec(&txn)
            .await?;

        commissions::Entity::update_many()
            .col_expr(commissions::Column::Status, Expr::value(CommissionStatus::Paid))
            .col_expr(commissions::Column::PaidAt, Expr::value(paid_at))
            .filter(commissions::Column::PayoutId.eq(payout_id))
            .filter(commissions::Column::Status.eq(CommissionStatus::Pending))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    /// 事务 2（被拒）：记失败并释放佣金，下个周期重新计入
    async fn settle_failed(&self, payout_id: i64, reason: &str) -> AppResult<()> {
        let txn = self.pool.begin().await?;

        payouts::Entity::update_many()
            .col_expr(payouts::Column::Status, Expr::value(PayoutStatus::Failed))
            .col_expr(payouts::Column::FailureReason, Expr::value(reason))
            .filter(payouts::Column::Id.eq(payout_id))
            .filter(payouts::Column::Status.eq(PayoutStatus::Pending))
            .exec(&txn)
            .await?;

        commissions::Entity::update_many()
            .col_expr(commissions::Column::PayoutId, Expr::value(Option::<i64>::None))
            .filter(commissions::Column::PayoutId.eq(payout_id))
            .filter(commissions::Column::Status.eq(CommissionStatus::Pending))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    /// 转账结果未确认的打款
    pub async fn stale_in_flight(&self, now: DateTime<Utc>) -> AppResult<Vec<payouts::Model>> {
        let cutoff = now - ChronoDuration::hours(STALE_IN_FLIGHT_HOURS);
        Ok(payouts::Entity::find()
            .filter(payouts::Column::Status.eq(PayoutStatus::Pending))
            .filter(payouts::Column::CreatedAt.lt(cutoff))
            .order_by_asc(payouts::Column::CreatedAt)
            .all(&self.pool)
            .await?)
    }

    pub async fn in_flight(&self) -> AppResult<Vec<PayoutResponse>> {
        let rows = payouts::Entity::find()
            .filter(payouts::Column::Status.eq(PayoutStatus::Pending))
            .order_by_asc(payouts::Column::CreatedAt)
            .all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(PayoutResponse::from).collect())
    }

    pub async fn list_for_user(
        &self,
        user_id: i64,
        query: &PayoutQuery,
    ) -> AppResult<PaginatedResponse<PayoutResponse>> {
        let params = PaginationParams::new(query.page, query.per_page);
        let paginator = payouts::Entity::find()
            .filter(payouts::Column::UserId.eq(user_id))
            .order_by_desc(payouts::Column::CreatedAt)
            .order_by_desc(payouts::Column::Id)
            .paginate(&self.pool, params.get_per_page());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(params.page_index()).await?;
        Ok(PaginatedResponse::new(items, &params, total).map(PayoutResponse::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingEvent, PurchaseCompleted};
    use crate::services::BillingService;
    use crate::test_support::{FakeRail, create_user, seed_commission, setup_db};
    use chrono::TimeZone;

    fn config() -> AffiliateConfig {
        AffiliateConfig::default()
    }

    fn month_end() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 31, 10, 0, 0).unwrap()
    }

    async fn commissions_of(db: &DatabaseConnection, user_id: i64) -> Vec<commissions::Model> {
        commissions::Entity::find()
            .filter(commissions::Column::ReferrerId.eq(user_id))
            .all(db)
            .await
            .unwrap()
    }

    async fn payouts_of(db: &DatabaseConnection, user_id: i64) -> Vec<payouts::Model> {
        payouts::Entity::find()
            .filter(payouts::Column::UserId.eq(user_id))
            .all(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_payout_settles_all_pending_commissions() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 4_000).await;
        seed_commission(&db, a.id, b.id, 2_500).await;
        let rail = Arc::new(FakeRail::new());
        let svc = PayoutService::new(db.clone(), rail.clone(), &config());

        let outcome = svc.process_user(a.id, "2026-10", month_end()).await.unwrap();
        assert!(matches!(outcome, PayoutOutcome::Paid { amount: 6_500, .. }));

        let payouts = payouts_of(&db, a.id).await;
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].status, PayoutStatus::Paid);
        assert_eq!(payouts[0].amount, 6_500);
        assert_eq!(payouts[0].external_ref.as_deref(), Some("tr_1_6500"));
        assert!(payouts[0].paid_at.is_some());

        for c in commissions_of(&db, a.id).await {
            assert_eq!(c.status, CommissionStatus::Paid);
            assert!(c.paid_at.is_some());
            assert_eq!(c.payout_id, Some(payouts[0].id));
        }

        let requests = rail.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount, 6_500);
        assert_eq!(requests[0].destination, "acct_a");
        assert_eq!(
            requests[0].idempotency_key,
            format!("affiliate-payout-{}", payouts[0].id)
        );
        assert_eq!(payouts[0].idempotency_key, requests[0].idempotency_key);
        assert_eq!(requests[0].metadata["type"], PAYOUT_METADATA_TYPE);
        assert_eq!(requests[0].metadata["user_id"], a.id.to_string());
    }

    #[tokio::test]
    async fn test_rejected_transfer_records_failed_payout_and_keeps_commissions_pending() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 8_000).await;
        let rail = Arc::new(FakeRail::new().failing_for(a.id));
        let svc = PayoutService::new(db.clone(), rail, &config());

        let outcome = svc.process_user(a.id, "2026-10", month_end()).await.unwrap();
        assert!(matches!(outcome, PayoutOutcome::Failed { amount: 8_000, .. }));

        let payouts = payouts_of(&db, a.id).await;
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].status, PayoutStatus::Failed);
        assert_eq!(payouts[0].amount, 8_000);
        assert!(payouts[0].failure_reason.is_some());
        assert!(payouts[0].paid_at.is_none());

        for c in commissions_of(&db, a.id).await {
            assert_eq!(c.status, CommissionStatus::Pending);
            assert!(c.paid_at.is_none());
            assert!(c.payout_id.is_none());
        }

        // 下个周期重新计入同样的金额
        let eligibility = EligibilityService::new(db.clone(), 5000);
        assert_eq!(eligibility.pending_total(a.id).await.unwrap(), 8_000);
        let next = Arc::new(FakeRail::new());
        let svc = PayoutService::new(db.clone(), next, &config());
        let outcome = svc.process_user(a.id, "2026-11", month_end()).await.unwrap();
        assert!(matches!(outcome, PayoutOutcome::Paid { amount: 8_000, .. }));
    }

    #[tokio::test]
    async fn test_recheck_skips_when_below_threshold_or_no_account() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let no_acct = create_user(&db, "noacct", None, None).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 4_999).await;
        seed_commission(&db, no_acct.id, b.id, 9_000).await;
        let rail = Arc::new(FakeRail::new());
        let svc = PayoutService::new(db.clone(), rail.clone(), &config());

        assert_eq!(
            svc.process_user(a.id, "2026-10", month_end()).await.unwrap(),
            PayoutOutcome::Skipped(SkipReason::BelowThreshold)
        );
        assert_eq!(
            svc.process_user(no_acct.id, "2026-10", month_end())
                .await
                .unwrap(),
            PayoutOutcome::Skipped(SkipReason::NoPayoutAccount)
        );
        assert!(rail.requests().is_empty());
        assert!(payouts_of(&db, a.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_second_run_in_same_cycle_pays_only_new_commissions() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 6_000).await;
        let rail = Arc::new(FakeRail::new());
        let svc = PayoutService::new(db.clone(), rail.clone(), &config());

        svc.run_batch(month_end()).await.unwrap();
        let report = svc.run_batch(month_end()).await.unwrap();
        assert_eq!(report.eligible, 0);
        assert_eq!(rail.requests().len(), 1);

        seed_commission(&db, a.id, b.id, 7_000).await;
        let report = svc.run_batch(month_end()).await.unwrap();
        assert_eq!(report.eligible, 1);
        assert_eq!(report.paid, 1);
        assert_eq!(report.total_paid, 7_000);

        let requests = rail.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].amount, 7_000);
        assert_ne!(requests[0].idempotency_key, requests[1].idempotency_key);

        let payouts = payouts_of(&db, a.id).await;
        assert_eq!(payouts.len(), 2);
        assert!(payouts.iter().all(|p| p.cycle == "2026-10"));
        assert!(payouts.iter().all(|p| p.status == PayoutStatus::Paid));
        let eligibility = EligibilityService::new(db.clone(), 5000);
        assert_eq!(eligibility.paid_total(a.id).await.unwrap(), 13_000);
    }

    #[tokio::test]
    async fn test_rejected_manual_run_does_not_block_month_end_run() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 6_000).await;

        let mid_month = Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap();
        let rejecting = PayoutService::new(
            db.clone(),
            Arc::new(FakeRail::new().failing_for(a.id)),
            &config(),
        );
        let report = rejecting.run_batch(mid_month).await.unwrap();
        assert_eq!(report.failed, 1);

        seed_commission(&db, a.id, b.id, 6_000).await;
        let rail = Arc::new(FakeRail::new());
        let svc = PayoutService::new(db.clone(), rail.clone(), &config());
        let report = svc.run_batch(month_end()).await.unwrap();
        assert_eq!(report.cycle, "2026-10");
        assert_eq!(report.eligible, 1);
        assert_eq!(report.paid, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.total_paid, 12_000);
        assert_eq!(rail.requests()[0].amount, 12_000);

        let mut statuses: Vec<_> = payouts_of(&db, a.id)
            .await
            .into_iter()
            .map(|p| p.status)
            .collect();
        statuses.sort_by_key(|s| s.to_string());
        assert_eq!(statuses, vec![PayoutStatus::Failed, PayoutStatus::Paid]);
    }

    #[tokio::test]
    async fn test_in_flight_payout_blocks_new_attempts() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 6_000).await;
        let hanging = PayoutService::new(
            db.clone(),
            Arc::new(FakeRail::new().hanging_for(a.id)),
            &config(),
        )
        .with_transfer_timeout(Duration::from_millis(50));
        let report = hanging.run_batch(month_end()).await.unwrap();
        assert_eq!(report.reconciliation_needed, 1);

        seed_commission(&db, a.id, b.id, 9_000).await;
        let rail = Arc::new(FakeRail::new());
        let svc = PayoutService::new(db.clone(), rail.clone(), &config());
        let report = svc.run_batch(month_end()).await.unwrap();
        assert_eq!(report.eligible, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.paid, 0);
        assert!(rail.requests().is_empty());
        assert_eq!(
            svc.process_user(a.id, "2026-10", month_end()).await.unwrap(),
            PayoutOutcome::Skipped(SkipReason::PayoutInFlight)
        );
    }

    #[tokio::test]
    async fn test_referred_purchase_is_paid_out_at_month_end() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        let billing = BillingService::new(db.clone(), &config());
        billing
            .handle_event(BillingEvent::PurchaseCompleted(PurchaseCompleted {
                event_id: "evt_purchase".into(),
                user_id: b.id,
                amount: 20_000,
                payment_ref: "pi_purchase".into(),
                report_credits: 5,
            }))
            .await
            .unwrap();

        let eligibility = EligibilityService::new(db.clone(), 5000);
        assert_eq!(eligibility.pending_total(a.id).await.unwrap(), 8_000);

        let rail = Arc::new(FakeRail::new());
        let svc = PayoutService::new(db.clone(), rail.clone(), &config());
        let report = svc.run_batch(month_end()).await.unwrap();
        assert_eq!(report.eligible, 1);
        assert_eq!(report.paid, 1);
        assert_eq!(report.total_paid, 8_000);
        assert_eq!(rail.requests()[0].destination, "acct_a");

        let c = &commissions_of(&db, a.id).await[0];
        assert_eq!(c.status, CommissionStatus::Paid);
        assert_eq!(c.referred_user_id, b.id);
        assert_eq!(eligibility.pending_total(a.id).await.unwrap(), 0);
        assert_eq!(eligibility.paid_total(a.id).await.unwrap(), 8_000);
    }

    #[tokio::test]
    async fn test_batch_isolates_individual_failures() {
        let db = setup_db().await;
        let first = create_user(&db, "first", None, Some("acct_1")).await;
        let second = create_user(&db, "second", None, Some("acct_2")).await;
        let third = create_user(&db, "third", None, Some("acct_3")).await;
        let buyer = create_user(&db, "buyer", None, None).await;
        seed_commission(&db, first.id, buyer.id, 9_000).await;
        seed_commission(&db, second.id, buyer.id, 8_000).await;
        seed_commission(&db, third.id, buyer.id, 7_000).await;
        let rail = Arc::new(FakeRail::new().failing_for(second.id));
        let svc = PayoutService::new(db.clone(), rail, &config());

        let report = svc.run_batch(month_end()).await.unwrap();
        assert_eq!(report.cycle, "2026-10");
        assert_eq!(report.eligible, 3);
        assert_eq!(report.paid, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total_paid, 16_000);

        assert_eq!(payouts_of(&db, first.id).await[0].status, PayoutStatus::Paid);
        assert_eq!(payouts_of(&db, second.id).await[0].status, PayoutStatus::Failed);
        assert_eq!(payouts_of(&db, third.id).await[0].status, PayoutStatus::Paid);
        assert_eq!(
            commissions_of(&db, second.id).await[0].status,
            CommissionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_timeout_keeps_payout_in_flight_for_reconciliation() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 6_000).await;
        let rail = Arc::new(FakeRail::new().hanging_for(a.id));
        let svc = PayoutService::new(db.clone(), rail, &config())
            .with_transfer_timeout(Duration::from_millis(50));

        let err = svc
            .process_user(a.id, "2026-10", month_end())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ReconciliationNeeded { .. }));

        let payouts = payouts_of(&db, a.id).await;
        assert_eq!(payouts[0].status, PayoutStatus::Pending);
        let c = &commissions_of(&db, a.id).await[0];
        assert_eq!(c.status, CommissionStatus::Pending);
        assert_eq!(c.payout_id, Some(payouts[0].id));

        // 转账中的佣金不再计入待结算
        let eligibility = EligibilityService::new(db.clone(), 5000);
        assert_eq!(eligibility.pending_total(a.id).await.unwrap(), 0);
        assert_eq!(svc.in_flight().await.unwrap().len(), 1);
        assert_eq!(
            svc.stale_in_flight(month_end() + ChronoDuration::hours(25))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_list_for_user() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 6_000).await;
        let svc = PayoutService::new(db.clone(), Arc::new(FakeRail::new()), &config());
        svc.process_user(a.id, "2026-10", month_end()).await.unwrap();

        let page = svc
            .list_for_user(a.id, &PayoutQuery::default())
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.items[0].cycle, "2026-10");
        assert_eq!(page.items[0].status, PayoutStatus::Paid);
    }
}

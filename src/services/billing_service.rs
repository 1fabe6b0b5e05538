use crate::config::AffiliateConfig;
use crate::entities::{user_entity as users, webhook_event_entity as webhook_events};
use crate::error::{AppError, AppResult};
use crate::models::{BillingEvent, InvoicePaid, PurchaseCompleted};
use crate::services::{CommissionService, UserService};
use crate::utils::months_between;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, QueryFilter, Set, TransactionTrait,
};

/// 订阅续费是否仍在计佣期内（按自然月编号差计算）
pub fn qualifies_for_subscription_commission(
    account_created_at: DateTime<Utc>,
    invoice_date: DateTime<Utc>,
    max_months: i32,
) -> bool {
    months_between(account_created_at, invoice_date) < max_months
}

/// 计费事件处理：发放权益并触发佣金记账
#[derive(Clone)]
pub struct BillingService {
    pool: DatabaseConnection,
    users: UserService,
    commissions: CommissionService,
    subscription_months: i32,
}

impl BillingService {
    pub fn new(pool: DatabaseConnection, config: &AffiliateConfig) -> Self {
        Self {
            users: UserService::new(pool.clone()),
            commissions: CommissionService::new(pool.clone(), config.commission_rate_bp),
            subscription_months: config.subscription_commission_months,
            pool,
        }
    }

    pub async fn handle_event(&self, event: BillingEvent) -> AppResult<()> {
        match event {
            BillingEvent::PurchaseCompleted(purchase) => self.handle_purchase(purchase).await,
            BillingEvent::SubscriptionStarted {
                user_id,
                customer_id,
            } => {
                self.users.set_stripe_customer(user_id, &customer_id).await?;
                log::info!("Linked Stripe customer {customer_id} to user {user_id}");
                Ok(())
            }
            BillingEvent::InvoicePaid(invoice) => self.handle_invoice(invoice).await,
            BillingEvent::Unhandled { event_type } => {
                log::debug!("Ignoring webhook event type {event_type}");
                Ok(())
            }
        }
    }

    async fn handle_purchase(&self, purchase: PurchaseCompleted) -> AppResult<()> {
        let txn = self.pool.begin().await?;
        if !mark_processed(&txn, &purchase.event_id, "purchase_completed").await? {
            log::info!("Webhook event {} already processed", purchase.event_id);
            return Ok(());
        }

        let buyer = users::Entity::find_by_id(purchase.user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", purchase.user_id)))?;

        if purchase.report_credits > 0 {
            users::Entity::update_many()
                .col_expr(
                    users::Column::ReportCredits,
                    Expr::col(users::Column::ReportCredits).add(purchase.report_credits),
                )
                .col_expr(users::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(users::Column::Id.eq(buyer.id))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        log::info!(
            "Purchase {} by user {}: {} cents, {} report credits",
            purchase.payment_ref,
            buyer.id,
            purchase.amount,
            purchase.report_credits
        );

        if let Some(referrer_id) = buyer.referrer_id {
            self.record_commission(referrer_id, buyer.id, purchase.amount, &purchase.payment_ref)
                .await;
        }
        Ok(())
    }

    async fn handle_invoice(&self, invoice: InvoicePaid) -> AppResult<()> {
        let user = self.resolve_invoice_user(&invoice).await?;

        let txn = self.pool.begin().await?;
        if !mark_processed(&txn, &invoice.event_id, "invoice_paid").await? {
            log::info!("Webhook event {} already processed", invoice.event_id);
            return Ok(());
        }

        if invoice.plan_tier.is_some() || invoice.period_end.is_some() {
            let mut am = user.clone().into_active_model();
            if let Some(tier) = invoice.plan_tier.clone() {
                am.plan_tier = Set(tier);
            }
            if let Some(period_end) = invoice.period_end {
                am.subscription_expires_at = Set(Some(period_end));
            }
            am.updated_at = Set(Utc::now());
            am.update(&txn).await?;
        }
        txn.commit().await?;

        log::info!(
            "Invoice {} paid by user {}: {} cents",
            invoice.invoice_ref,
            user.id,
            invoice.amount
        );

        let Some(referrer_id) = user.referrer_id else {
            return Ok(());
        };
        if invoice.amount <= 0 {
            return Ok(());
        }
        if !qualifies_for_subscription_commission(
            user.created_at,
            invoice.invoice_date,
            self.subscription_months,
        ) {
            log::info!(
                "Invoice {} outside the {}-month commission window for user {}",
                invoice.invoice_ref,
                self.subscription_months,
                user.id
            );
            return Ok(());
        }
        self.record_commission(referrer_id, user.id, invoice.amount, &invoice.invoice_ref)
            .await;
        Ok(())
    }

    async fn resolve_invoice_user(&self, invoice: &InvoicePaid) -> AppResult<users::Model> {
        if let Some(customer_id) = invoice.customer_id.as_deref()
            && let Some(user) = self.users.find_by_stripe_customer(customer_id).await?
        {
            return Ok(user);
        }
        match invoice.user_id {
            Some(user_id) => self.users.get_user_by_id(user_id).await,
            None => Err(AppError::NotFound(format!(
                "No user for invoice {} (customer {:?})",
                invoice.invoice_ref, invoice.customer_id
            ))),
        }
    }

    // 佣金记账失败只记日志，不影响权益发放
    async fn record_commission(
        &self,
        referrer_id: i64,
        referred_user_id: i64,
        purchase_amount: i64,
        external_ref: &str,
    ) {
        if let Err(e) = self
            .commissions
            .record_commission(referrer_id, referred_user_id, purchase_amount, Some(external_ref))
            .await
        {
            log::error!(
                "Failed to record commission for referrer {referrer_id} ({external_ref}): {e:?}"
            );
        }
    }
}

/// 返回 false 表示该事件已处理过
async fn mark_processed<C: ConnectionTrait>(
    db: &C,
    event_id: &str,
    event_type: &str,
) -> AppResult<bool> {
    let row = webhook_events::ActiveModel {
        event_id: Set(event_id.to_string()),
        event_type: Set(event_type.to_string()),
        processed_at: Set(Utc::now()),
        ..Default::default()
    };
    let result = webhook_events::Entity::insert(row)
        .on_conflict(
            OnConflict::column(webhook_events::Column::EventId)
                .do_nothing()
                .to_owned(),
        )
        .exec(db)
        .await;
    match result {
        Ok(_) => Ok(true),
        Err(DbErr::RecordNotInserted) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

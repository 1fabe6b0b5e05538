//! Background scheduled tasks for the application.
//!
//! The monthly affiliate payout is the only recurring job. It fires once a day
//! during the last four days of each month and runs the batch only on the last
//! day. Call `spawn_all` once during startup to launch it.

use crate::config::SchedulerConfig;
use crate::error::{AppError, AppResult};
use crate::models::PayoutBatchReport;
use crate::services::PayoutService;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 每月最后几天触发检查
pub const PAYOUT_WINDOW_DAYS: u32 = 4;

/// 批量打款调度：定时与手动触发共用同一把运行锁，同一时刻最多一个批次
#[derive(Clone)]
pub struct PayoutScheduler {
    payouts: PayoutService,
    run_lock: Arc<Mutex<()>>,
    hour: u32,
}

impl PayoutScheduler {
    pub fn new(payouts: PayoutService, config: &SchedulerConfig) -> Self {
        Self {
            payouts,
            run_lock: Arc::new(Mutex::new(())),
            hour: config.hour,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// 手动触发，跳过日期检查
    pub async fn run_now(&self) -> AppResult<PayoutBatchReport> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> AppResult<PayoutBatchReport> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| AppError::Conflict("A payout batch is already running".to_string()))?;
        self.payouts.run_batch(now).await
    }

    /// 定时触发：只有明天是 1 号才执行
    pub async fn tick(&self, now: DateTime<Utc>) -> AppResult<Option<PayoutBatchReport>> {
        if !is_last_day_of_month(now.date_naive()) {
            log::debug!("Payout check on {}: not the last day of month", now.date_naive());
            return Ok(None);
        }
        self.run_at(now).await.map(Some)
    }

    async fn run_forever(self) {
        loop {
            let now = Utc::now();
            let Some(next) = next_fire_after(now, self.hour) else {
                log::error!("Invalid payout scheduler hour {}, scheduler stopped", self.hour);
                return;
            };
            log::info!("Next payout check at {next}");
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            match self.tick(Utc::now()).await {
                Ok(Some(report)) => log::info!(
                    "Scheduled payout batch {} done: {} paid, {} failed",
                    report.cycle,
                    report.paid,
                    report.failed
                ),
                Ok(None) => {}
                Err(AppError::Conflict(msg)) => log::warn!("Scheduled payout skipped: {msg}"),
                Err(e) => log::error!("Scheduled payout batch failed: {e:?}"),
            }
        }
    }
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

pub fn is_last_day_of_month(date: NaiveDate) -> bool {
    date.succ_opt().is_some_and(|tomorrow| tomorrow.day() == 1)
}

pub fn in_payout_window(date: NaiveDate) -> bool {
    days_in_month(date) - date.day() < PAYOUT_WINDOW_DAYS
}

/// 严格晚于 `now` 的下一个触发时刻
pub fn next_fire_after(now: DateTime<Utc>, hour: u32) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    (0..=62)
        .map(|offset| today + Duration::days(offset))
        .filter(|date| in_payout_window(*date))
        .filter_map(|date| date.and_hms_opt(hour, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .find(|at| *at > now)
}

/// Spawn all background tasks.
///
/// Detaches via `tokio::spawn`; it does not block.
pub fn spawn_all(scheduler: PayoutScheduler, config: &SchedulerConfig) {
    if !config.enabled {
        log::info!("Payout scheduler disabled");
        return;
    }
    tokio::spawn(scheduler.run_forever());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AffiliateConfig;
    use crate::test_support::{FakeRail, create_user, seed_commission, setup_db};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    async fn scheduler() -> (PayoutScheduler, sea_orm::DatabaseConnection) {
        let db = setup_db().await;
        let payouts = PayoutService::new(
            db.clone(),
            Arc::new(FakeRail::new()),
            &AffiliateConfig::default(),
        );
        (
            PayoutScheduler::new(payouts, &SchedulerConfig::default()),
            db,
        )
    }

    #[test]
    fn test_last_day_of_month() {
        assert!(is_last_day_of_month(date(2026, 10, 31)));
        assert!(!is_last_day_of_month(date(2026, 10, 30)));
        assert!(is_last_day_of_month(date(2026, 2, 28)));
        assert!(!is_last_day_of_month(date(2028, 2, 28)));
        assert!(is_last_day_of_month(date(2028, 2, 29)));
        assert!(is_last_day_of_month(date(2026, 12, 31)));
    }

    #[test]
    fn test_payout_window_covers_last_four_days() {
        assert!(!in_payout_window(date(2026, 10, 27)));
        assert!(in_payout_window(date(2026, 10, 28)));
        assert!(in_payout_window(date(2026, 10, 31)));
        assert!(in_payout_window(date(2026, 2, 25)));
        assert!(!in_payout_window(date(2026, 2, 24)));
    }

    #[test]
    fn test_next_fire_after() {
        assert_eq!(
            next_fire_after(at(2026, 10, 14, 8), 10),
            Some(at(2026, 10, 28, 10))
        );
        assert_eq!(
            next_fire_after(at(2026, 10, 28, 10), 10),
            Some(at(2026, 10, 29, 10))
        );
        assert_eq!(
            next_fire_after(at(2026, 10, 31, 11), 10),
            Some(at(2026, 11, 27, 10))
        );
        assert_eq!(next_fire_after(at(2026, 10, 14, 8), 25), None);
    }

    #[tokio::test]
    async fn test_tick_runs_only_on_last_day() {
        let (scheduler, db) = scheduler().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 6_000).await;

        assert!(scheduler.tick(at(2026, 10, 29, 10)).await.unwrap().is_none());

        let report = scheduler
            .tick(at(2026, 10, 31, 10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.cycle, "2026-10");
        assert_eq!(report.paid, 1);
        assert_eq!(report.total_paid, 6_000);
    }

    #[tokio::test]
    async fn test_second_invocation_is_rejected_while_running() {
        let (scheduler, _db) = scheduler().await;
        let _held = scheduler.run_lock.try_lock().unwrap();

        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.run_now().await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_run_now_bypasses_date_check() {
        let (scheduler, _db) = scheduler().await;
        let report = scheduler.run_at(at(2026, 10, 14, 8)).await.unwrap();
        assert_eq!(report.cycle, "2026-10");
        assert_eq!(report.eligible, 0);
        assert!(!scheduler.is_running());
    }
}

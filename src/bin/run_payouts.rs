//! 手动执行一次分销打款批次，不带参数。
//! 批次完成（含个别用户失败）退出码 0，无法完成退出码 1。

use affiliate_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::{StripeService, TransferRail},
    services::PayoutService,
    tasks::PayoutScheduler,
};
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;

async fn run() -> anyhow::Result<()> {
    let config = Config::from_toml()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Failed to load configuration")?;
    let pool = create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let rail: Arc<dyn TransferRail> = Arc::new(StripeService::new(config.stripe.clone()));
    let payouts = PayoutService::new(pool, rail, &config.affiliate);
    let report = PayoutScheduler::new(payouts, &config.scheduler)
        .run_now()
        .await
        .context("Payout batch failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;

use affiliate_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::{StripeService, TransferRail},
    handlers,
    middlewares::{AuthMiddleware, create_cors},
    services::*,
    swagger::swagger_config,
    tasks::{self, PayoutScheduler},
    utils::JwtService,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml()
        .map_err(|e| std::io::Error::other(format!("Failed to load configuration: {e}")))?;

    // 创建数据库连接池
    let pool = create_pool(&config.database)
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to create database pool: {e}")))?;

    // 运行数据库迁移
    run_migrations(&pool)
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to run migrations: {e}")))?;

    let jwt_service = JwtService::new(&config.jwt.secret, config.jwt.access_token_expires_in);

    // 外部服务
    let stripe_service = StripeService::new(config.stripe.clone());
    let rail: Arc<dyn TransferRail> = Arc::new(stripe_service.clone());

    // 创建服务
    let user_service = UserService::new(pool.clone());
    let commission_service =
        CommissionService::new(pool.clone(), config.affiliate.commission_rate_bp);
    let eligibility_service =
        EligibilityService::new(pool.clone(), config.affiliate.payout_threshold);
    let billing_service = BillingService::new(pool.clone(), &config.affiliate);
    let payout_service = PayoutService::new(pool.clone(), rail, &config.affiliate);
    let scheduler = PayoutScheduler::new(payout_service.clone(), &config.scheduler);

    // 启动后台任务
    tasks::spawn_all(scheduler.clone(), &config.scheduler);

    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    let admin_config = config.admin.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .app_data(web::Data::new(user_service.clone()))
            .app_data(web::Data::new(commission_service.clone()))
            .app_data(web::Data::new(eligibility_service.clone()))
            .app_data(web::Data::new(billing_service.clone()))
            .app_data(web::Data::new(payout_service.clone()))
            .app_data(web::Data::new(scheduler.clone()))
            .app_data(web::Data::new(stripe_service.clone()))
            .app_data(web::Data::new(admin_config.clone()))
            .configure(swagger_config)
            .configure(handlers::webhook_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::affiliate_config)
                    .configure(handlers::admin_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}

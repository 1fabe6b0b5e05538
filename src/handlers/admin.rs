use crate::config::AdminConfig;
use crate::error::AppError;
use crate::models::ApiResponse;
use crate::services::PayoutService;
use crate::tasks::PayoutScheduler;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const ADMIN_KEY_HEADER: &str = "X-Admin-Key";

type HmacSha256 = Hmac<Sha256>;

// 以配置密钥为 HMAC key 比较两侧摘要，verify_slice 为常量时间比较
fn admin_key_matches(provided: &str, expected: &str) -> bool {
    let Ok(mut reference) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    reference.update(expected.as_bytes());
    let tag = reference.finalize().into_bytes();

    let Ok(mut candidate) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    candidate.update(provided.as_bytes());
    candidate.verify_slice(&tag).is_ok()
}

// 未配置密钥时所有管理接口一律拒绝
fn check_admin_key(req: &HttpRequest, config: &AdminConfig) -> Result<(), AppError> {
    if config.api_key.is_empty() {
        return Err(AppError::Forbidden);
    }
    let provided = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !admin_key_matches(provided, &config.api_key) {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/admin/payouts/run",
    tag = "admin",
    params(
        ("X-Admin-Key" = String, Header, description = "管理密钥")
    ),
    responses(
        (status = 200, description = "批量打款完成", body = crate::models::PayoutBatchReport),
        (status = 403, description = "管理密钥无效"),
        (status = 409, description = "已有批次在运行")
    )
)]
pub async fn run_payouts(
    scheduler: web::Data<PayoutScheduler>,
    admin: web::Data<AdminConfig>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    if let Err(e) = check_admin_key(&req, &admin) {
        return Ok(e.error_response());
    }

    log::info!("Manual payout batch triggered");
    match scheduler.run_now().await {
        Ok(report) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            report,
            "Payout batch completed",
        ))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/admin/payouts/in-flight",
    tag = "admin",
    params(
        ("X-Admin-Key" = String, Header, description = "管理密钥")
    ),
    responses(
        (status = 200, description = "转账结果未确认的打款", body = [crate::models::PayoutResponse]),
        (status = 403, description = "管理密钥无效")
    )
)]
pub async fn in_flight_payouts(
    payout_service: web::Data<PayoutService>,
    admin: web::Data<AdminConfig>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    if let Err(e) = check_admin_key(&req, &admin) {
        return Ok(e.error_response());
    }

    match payout_service.in_flight().await {
        Ok(items) => Ok(HttpResponse::Ok().json(ApiResponse::success(items))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .route("/payouts/run", web::post().to(run_payouts))
            .route("/payouts/in-flight", web::get().to(in_flight_payouts)),
    );
}

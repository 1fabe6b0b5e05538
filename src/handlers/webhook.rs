use crate::error::AppError;
use crate::external::StripeService;
use crate::models::BillingEvent;
use crate::services::BillingService;
use actix_web::{HttpRequest, HttpResponse, Result, web};
use log::{error, info, warn};

/// Stripe webhook处理器
///
/// 签名校验通过后解析为计费事件并交给 `BillingService`。
/// 数据库错误返回 500 让 Stripe 重投（事件与佣金均按外部 id 去重）；
/// 无法处理的事件返回 200 并记录日志。
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    stripe_service: web::Data<StripeService>,
    billing_service: web::Data<BillingService>,
) -> Result<HttpResponse> {
    let signature = match req.headers().get("stripe-signature") {
        Some(sig) => sig.to_str().unwrap_or(""),
        None => {
            warn!("Missing Stripe-Signature header");
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Missing Stripe-Signature header"
            })));
        }
    };

    let payload = std::str::from_utf8(&body).map_err(|_| {
        error!("Invalid UTF-8 in webhook payload");
        actix_web::error::ErrorBadRequest("Invalid payload encoding")
    })?;

    if let Err(e) = stripe_service.verify_webhook_signature(payload, signature) {
        error!("Webhook signature verification failed: {e}");
        return Ok(HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "Invalid signature"
        })));
    }

    let event = match BillingEvent::parse(payload) {
        Ok(event) => event,
        Err(e) => {
            error!("Failed to parse webhook event: {e}");
            return Ok(HttpResponse::Ok().json(serde_json::json!({
                "received": true,
                "error": format!("Parse failed: {e}")
            })));
        }
    };

    let kind = event.kind().to_string();
    info!("Received Stripe webhook event: {kind}");

    match billing_service.handle_event(event).await {
        Ok(()) => {
            info!("Successfully processed webhook event {kind}");
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "received": true
            })))
        }
        Err(e) if should_redeliver(&e) => {
            error!("Failed to process webhook event {kind}, asking for redelivery: {e}");
            Ok(HttpResponse::InternalServerError().json(serde_json::json!({
                "received": false,
                "error": "Temporary processing failure"
            })))
        }
        Err(e) => {
            error!("Failed to process webhook event {kind}: {e}");
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "received": true,
                "error": format!("Processing failed: {e}")
            })))
        }
    }
}

fn should_redeliver(err: &AppError) -> bool {
    matches!(err, AppError::DatabaseError(_))
}

pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhook").route("/stripe", web::post().to(stripe_webhook)));
}

use crate::error::AppError;
use crate::external::StripeService;
use crate::models::*;
use crate::services::{CommissionService, EligibilityService, PayoutService, UserService};
use actix_web::{HttpMessage, HttpRequest, HttpResponse, ResponseError, Result, web};

fn get_user_id_from_request(req: &HttpRequest) -> Result<i64, AppError> {
    req.extensions()
        .get::<i64>()
        .copied()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::AuthError("Missing user identity".to_string()))
}

#[utoipa::path(
    get,
    path = "/affiliate/summary",
    tag = "affiliate",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "获取分销概览成功", body = AffiliateSummary),
        (status = 401, description = "未授权"),
        (status = 404, description = "用户不存在")
    )
)]
pub async fn get_summary(
    user_service: web::Data<UserService>,
    eligibility_service: web::Data<EligibilityService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    let summary = async {
        let user = user_service.get_user_by_id(user_id).await?;
        let referred_users = user_service.referral_count(user_id).await?;
        let pending_amount = eligibility_service.pending_total(user_id).await?;
        let paid_amount = eligibility_service.paid_total(user_id).await?;
        Ok::<_, AppError>(AffiliateSummary {
            referral_code: user.referral_code.clone(),
            referred_users,
            pending_amount,
            paid_amount,
            payout_threshold: eligibility_service.threshold(),
            payout_account_configured: user.payout_destination().is_some(),
            eligible: eligibility_service.is_eligible(&user, pending_amount),
        })
    }
    .await;

    match summary {
        Ok(summary) => Ok(HttpResponse::Ok().json(ApiResponse::success(summary))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/affiliate/commissions",
    tag = "affiliate",
    params(CommissionQuery),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "获取佣金列表成功"),
        (status = 401, description = "未授权")
    )
)]
pub async fn get_commissions(
    commission_service: web::Data<CommissionService>,
    req: HttpRequest,
    query: web::Query<CommissionQuery>,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match commission_service.list_for_referrer(user_id, &query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/affiliate/payouts",
    tag = "affiliate",
    params(PayoutQuery),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "获取打款记录成功"),
        (status = 401, description = "未授权")
    )
)]
pub async fn get_payouts(
    payout_service: web::Data<PayoutService>,
    req: HttpRequest,
    query: web::Query<PayoutQuery>,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match payout_service.list_for_user(user_id, &query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/affiliate/referrer",
    tag = "affiliate",
    request_body = AttachReferrerRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "绑定推荐人成功", body = AttachReferrerResponse),
        (status = 400, description = "推荐码无效或已绑定"),
        (status = 401, description = "未授权")
    )
)]
pub async fn attach_referrer(
    user_service: web::Data<UserService>,
    req: HttpRequest,
    request: web::Json<AttachReferrerRequest>,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match user_service
        .attach_referrer(user_id, &request.referral_code)
        .await
    {
        Ok(user) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            AttachReferrerResponse {
                referrer_id: user.referrer_id.unwrap_or_default(),
            },
            "Referrer attached",
        ))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/affiliate/connect-account",
    tag = "affiliate",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "生成 Stripe Connect 入驻链接", body = ConnectAccountResponse),
        (status = 401, description = "未授权"),
        (status = 502, description = "Stripe 调用失败")
    )
)]
pub async fn create_connect_account(
    user_service: web::Data<UserService>,
    stripe_service: web::Data<StripeService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match get_user_id_from_request(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    let result = async {
        let user = user_service.get_user_by_id(user_id).await?;
        let onboarding = stripe_service
            .create_connect_onboarding(user.id, &user.email, user.payout_destination())
            .await?;
        if user.payout_destination() != Some(onboarding.account_id.as_str()) {
            user_service
                .set_payout_account(user.id, &onboarding.account_id)
                .await?;
        }
        Ok::<_, AppError>(ConnectAccountResponse {
            account_id: onboarding.account_id,
            onboarding_url: onboarding.onboarding_url,
        })
    }
    .await;

    match result {
        Ok(resp) => Ok(HttpResponse::Ok().json(ApiResponse::success(resp))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn affiliate_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/affiliate")
            .route("/summary", web::get().to(get_summary))
            .route("/commissions", web::get().to(get_commissions))
            .route("/payouts", web::get().to(get_payouts))
            .route("/referrer", web::post().to(attach_referrer))
            .route("/connect-account", web::post().to(create_connect_account)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middlewares::AuthMiddleware;
    use crate::test_support::{create_user, seed_commission, setup_db};
    use crate::utils::JwtService;
    use actix_web::{App, http::StatusCode, test};

    #[actix_web::test]
    async fn test_summary_requires_token_and_reports_totals() {
        let db = setup_db().await;
        let a = create_user(&db, "a", None, Some("acct_a")).await;
        let b = create_user(&db, "b", Some(a.id), None).await;
        seed_commission(&db, a.id, b.id, 5_000).await;

        let jwt = JwtService::new("secret", 60);
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(jwt.clone()))
                .app_data(web::Data::new(UserService::new(db.clone())))
                .app_data(web::Data::new(EligibilityService::new(db.clone(), 5000)))
                .service(web::scope("/api/v1").configure(affiliate_config)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/v1/affiliate/summary")
            .to_request();
        let resp = test::try_call_service(&app, req).await;
        let status = match resp {
            Ok(resp) => resp.status(),
            Err(e) => e.as_response_error().status_code(),
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = jwt.generate_access_token(a.id).unwrap();
        let req = test::TestRequest::get()
            .uri("/api/v1/affiliate/summary")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["referral_code"], "REF-A");
        assert_eq!(body["data"]["referred_users"], 1);
        assert_eq!(body["data"]["pending_amount"], 5_000);
        assert_eq!(body["data"]["paid_amount"], 0);
        assert_eq!(body["data"]["payout_account_configured"], true);
        assert_eq!(body["data"]["eligible"], true);
    }
}

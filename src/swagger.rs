use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{CommissionStatus, PayoutStatus};
use crate::handlers;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::affiliate::get_summary,
        handlers::affiliate::get_commissions,
        handlers::affiliate::get_payouts,
        handlers::affiliate::attach_referrer,
        handlers::affiliate::create_connect_account,
        handlers::admin::run_payouts,
        handlers::admin::in_flight_payouts,
    ),
    components(
        schemas(
            AffiliateSummary,
            AttachReferrerRequest,
            AttachReferrerResponse,
            ConnectAccountResponse,
            CommissionResponse,
            CommissionStatus,
            PayoutResponse,
            PayoutStatus,
            PayoutBatchReport,
            ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "affiliate", description = "Affiliate commission API"),
        (name = "admin", description = "Payout operations API"),
    ),
    info(
        title = "Affiliate Backend API",
        version = "1.0.0",
        description = "Affiliate commission ledger and payout REST API documentation",
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}

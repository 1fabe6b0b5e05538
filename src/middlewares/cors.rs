use actix_cors::Cors;

pub fn create_cors() -> Cors {
    Cors::default()
        .allowed_origin_fn(|_, _req_head| true)
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        // 管理接口使用自定义 X-Admin-Key
        .allow_any_header()
        .max_age(3600)
}

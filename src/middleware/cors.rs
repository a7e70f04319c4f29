// CORS中间件配置
// 允许店面前端跨域调用结账与查询接口

use actix_cors::Cors;
use actix_web::http::header;

use crate::config::ServerConfig;

/// 创建CORS中间件
///
/// 开发环境允许本机的任意端口，生产环境只允许配置中列出的店面源。
///
/// # Arguments
/// * `server` - 服务器配置 (运行环境与允许的源)
pub fn create_cors(server: &ServerConfig) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-csrf-token"),
        ])
        .expose_headers(vec![header::RETRY_AFTER])
        .max_age(3600);

    if server.environment.is_development() {
        cors = cors.allowed_origin_fn(|origin, _req_head| {
            let origin = origin.as_bytes();
            origin.starts_with(b"http://localhost") || origin.starts_with(b"http://127.0.0.1")
        });
    }

    for origin in &server.allowed_origins {
        cors = cors.allowed_origin(origin);
    }

    cors
}

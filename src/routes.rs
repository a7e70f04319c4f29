// API路由配置
// 定义所有HTTP接口的路由规则与各路由的限流类别

use actix_web::web;

use crate::handlers::*;
use crate::middleware::{CsrfProtection, RateLimit};
use crate::services::RouteClass;

/// 不计入限流额度的路由 (网关回调与健康检查)
///
/// 必须在店面路由之前注册。
pub fn unmetered_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/payuni-webhook", web::post().to(payuni_webhook))
        .route("/payment-return", web::post().to(payment_return));
}

/// 店面路由 (一般流量额度，结账与轮询另有独立额度)
///
/// 结账先检查额度再消耗防伪令牌，被限流的请求不会用掉令牌。
pub fn storefront_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .app_data(json_config())
            .wrap(RateLimit::new(RouteClass::General))
            .route("/csrf-token", web::get().to(csrf_token))
            .service(
                web::resource("/create-payment")
                    .wrap(CsrfProtection)
                    .wrap(RateLimit::new(RouteClass::Payment))
                    .route(web::post().to(create_payment)),
            )
            .service(
                web::resource("/create-subscription")
                    .wrap(CsrfProtection)
                    .wrap(RateLimit::new(RouteClass::Payment))
                    .route(web::post().to(create_subscription)),
            )
            .service(
                web::resource("/order-status/{trade_no}")
                    .wrap(RateLimit::new(RouteClass::Polling))
                    .route(web::get().to(order_status)),
            ),
    );
}

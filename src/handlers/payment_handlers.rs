// 结账API处理器
// 处理单次付款与订阅的结账请求，返回网关地址与已签名的表单字段

use actix_web::{error::InternalError, web, HttpRequest, HttpResponse};

use crate::config::Environment;
use crate::error::AppError;
use crate::middleware::rate_limit::caller_ip;
use crate::models::{CheckoutRequest, ProductKind};
use crate::state::AppState;

/// 结账请求体解析配置
///
/// 请求体无法解析时返回与其他错误一致的JSON错误体
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, req| {
        let env = req
            .app_data::<web::Data<AppState>>()
            .map(|state| state.environment())
            .unwrap_or(Environment::Production);
        log::warn!("Rejected checkout body on {}: {}", req.path(), err);
        let response = AppError::InvalidRequest(err.to_string()).to_response(env);
        InternalError::from_response(err, response).into()
    })
}

/// 创建单次付款
///
/// POST /create-payment
///
/// 需要 X-CSRF-Token
/// 请求体: CheckoutRequest
/// 响应: CheckoutResponse
pub async fn create_payment(
    data: web::Data<AppState>,
    request: web::Json<CheckoutRequest>,
    req: HttpRequest,
) -> HttpResponse {
    checkout(&data, &request, &req, ProductKind::OneTime).await
}

/// 创建订阅
///
/// POST /create-subscription
///
/// 需要 X-CSRF-Token
/// 请求体: CheckoutRequest
/// 响应: CheckoutResponse
pub async fn create_subscription(
    data: web::Data<AppState>,
    request: web::Json<CheckoutRequest>,
    req: HttpRequest,
) -> HttpResponse {
    checkout(&data, &request, &req, ProductKind::Subscription).await
}

async fn checkout(
    data: &AppState,
    request: &CheckoutRequest,
    req: &HttpRequest,
    kind: ProductKind,
) -> HttpResponse {
    let remote_ip = caller_ip(req, data.config.server.trust_forwarded_for);

    match data
        .payments
        .checkout(request, kind, remote_ip.as_deref())
        .await
    {
        Ok(payment) => HttpResponse::Ok().json(data.payments.checkout_response(payment)),
        Err(e) => {
            log::error!(
                "Failed to create {} checkout for product {}: {}",
                kind,
                request.product_id,
                e
            );
            e.to_response(data.environment())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckoutResponse;
    use crate::services::OrderRepository;
    use crate::utils::crypto::{PayuniCodec, TradeCipher};
    use actix_web::{http::StatusCode, test, App};

    fn codec() -> PayuniCodec {
        let config = crate::config::Config::for_test();
        PayuniCodec::new(config.gateway.hash_key, config.gateway.hash_iv).unwrap()
    }

    #[actix_web::test]
    async fn test_create_subscription_returns_signed_form() {
        let state = web::Data::new(AppState::new_for_test());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/create-subscription", web::post().to(create_subscription)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/create-subscription")
            .set_json(serde_json::json!({ "productID": "plan_basic", "turnstileToken": "x" }))
            .to_request();
        let resp: CheckoutResponse = test::call_and_read_body_json(&app, req).await;

        assert!(resp.pay_url.ends_with("/api/period"));
        assert_eq!(resp.data.mer_id, "S01234567");
        let fields = codec()
            .decode(&resp.data.encrypt_info, &resp.data.hash_info)
            .unwrap();
        assert_eq!(fields.get("PeriodAmt"), Some("990"));

        let trade_no = fields.get("MerTradeNo").unwrap();
        assert!(state.orders.find(trade_no).await.unwrap().is_some());
    }

    #[actix_web::test]
    async fn test_create_payment_rejects_subscription_product() {
        let state = web::Data::new(AppState::new_for_test());
        let app = test::init_service(
            App::new()
                .app_data(state)
                .route("/create-payment", web::post().to(create_payment)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/create-payment")
            .set_json(serde_json::json!({ "productID": "plan_basic" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_malformed_body_returns_json_error() {
        let state = web::Data::new(AppState::new_for_test());
        let app = test::init_service(
            App::new()
                .app_data(state)
                .app_data(json_config())
                .route("/create-payment", web::post().to(create_payment)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/create-payment")
            .set_json(serde_json::json!({ "turnstileToken": "x" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("productID"));

        let req = test::TestRequest::post()
            .uri("/create-payment")
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    #[actix_web::test]
    async fn test_unknown_product_is_not_found() {
        let state = web::Data::new(AppState::new_for_test());
        let app = test::init_service(
            App::new()
                .app_data(state)
                .route("/create-payment", web::post().to(create_payment)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/create-payment")
            .set_json(serde_json::json!({ "productID": "nope" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }
}

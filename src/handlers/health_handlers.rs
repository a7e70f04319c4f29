// 健康检查与防伪令牌API处理器
// 提供服务存活状态、待人工对账订单数，以及一次性防伪令牌的签发

use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::services::token_service::CSRF_PURPOSE;
use crate::state::AppState;

/// 系统健康检查响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 版本信息
    pub version: String,
    /// 是否启用人机验证
    pub human_verification: bool,
    /// 已有终态但同步失败、等待人工对账的订单数
    pub awaiting_reconciliation: usize,
    /// 当前时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// 基础健康检查
///
/// GET /health
///
/// 响应: HealthResponse
pub async fn health_check(data: web::Data<AppState>) -> HttpResponse {
    let mut health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        human_verification: data.gate.human_verification_enabled(),
        awaiting_reconciliation: 0,
        timestamp: chrono::Utc::now(),
    };

    match data.webhooks.pending_reconciliation().await {
        Ok(count) => {
            health.awaiting_reconciliation = count;
            if count > 0 {
                health.status = "degraded".to_string();
            }
        }
        Err(e) => {
            log::error!("Order store health check failed: {}", e);
            health.status = "unhealthy".to_string();
            return HttpResponse::ServiceUnavailable().json(health);
        }
    }

    HttpResponse::Ok().json(health)
}

/// 签发防伪令牌
///
/// GET /csrf-token
///
/// 响应: {token, purpose, issuedAt, expiresAt}
pub async fn csrf_token(data: web::Data<AppState>) -> HttpResponse {
    let token = data.tokens.issue(CSRF_PURPOSE).await;
    HttpResponse::Ok().json(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_check() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new_for_test()))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["awaitingReconciliation"], 0);
        assert_eq!(body["humanVerification"], false);
    }

    #[actix_web::test]
    async fn test_csrf_token_is_consumable() {
        let state = web::Data::new(AppState::new_for_test());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/csrf-token", web::get().to(csrf_token)),
        )
        .await;

        let req = test::TestRequest::get().uri("/csrf-token").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let token = body["token"].as_str().unwrap();
        assert_eq!(token.len(), 32);
        assert!(body["expiresAt"].is_string());

        state.tokens.consume(token, CSRF_PURPOSE).await.unwrap();
    }
}

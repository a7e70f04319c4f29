// 网关回调API处理器
// 接收网关服务器通知与浏览器返回，两者都免除防伪令牌

use actix_web::{http::header, web, HttpRequest, HttpResponse};

use crate::error::AppError;
use crate::models::GatewayEnvelope;
use crate::state::AppState;

/// 网关确认字串
const ACK_SUCCESS: &str = "SUCCESS";
const ACK_FAIL: &str = "FAIL";
const ACK_RETRY: &str = "RETRY";

fn caller(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

fn parse_envelope(body: &[u8]) -> Result<GatewayEnvelope, AppError> {
    serde_urlencoded::from_bytes(body)
        .map_err(|e| AppError::Decode(format!("invalid gateway form: {}", e)))
}

/// 网关服务器通知
///
/// POST /payuni-webhook
///
/// 请求体: application/x-www-form-urlencoded {Status, MerID, Version, EncryptInfo, HashInfo}
/// 响应: 200 SUCCESS (已处理/重复/未知订单)，400 FAIL (验证失败)，503 RETRY (同步失败)
pub async fn payuni_webhook(
    data: web::Data<AppState>,
    body: web::Bytes,
    req: HttpRequest,
) -> HttpResponse {
    let source = caller(&req);

    let result = match parse_envelope(&body) {
        Ok(envelope) => data.webhooks.handle_notification(&envelope, &source).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            log::debug!("Gateway notification from {} handled: {:?}", source, outcome);
            HttpResponse::Ok().content_type("text/plain").body(ACK_SUCCESS)
        }
        Err(AppError::Persistence(e)) => {
            log::error!("Gateway notification from {} needs redelivery: {}", source, e);
            HttpResponse::ServiceUnavailable()
                .content_type("text/plain")
                .body(ACK_RETRY)
        }
        Err(e) => {
            log::warn!("Rejected gateway notification from {}: {}", source, e);
            HttpResponse::BadRequest().content_type("text/plain").body(ACK_FAIL)
        }
    }
}

/// 浏览器付款完成返回
///
/// POST /payment-return
///
/// 验证信封后303跳转到结果页，不修改订单状态 (订单只由服务器通知更新)
pub async fn payment_return(
    data: web::Data<AppState>,
    body: web::Bytes,
    req: HttpRequest,
) -> HttpResponse {
    let source = caller(&req);

    let summary = parse_envelope(&body)
        .and_then(|envelope| data.webhooks.verify_return(&envelope, &source));

    let query: Vec<(&str, String)> = match &summary {
        Ok(summary) => vec![
            ("tradeNo", summary.trade_no.clone()),
            ("status", summary.result.as_str().to_string()),
        ],
        Err(e) => {
            log::warn!("Invalid payment return from {}: {}", source, e);
            vec![("status", "error".to_string())]
        }
    };

    let result_page = &data.config.gateway.result_page_url;
    let location = match serde_urlencoded::to_string(&query) {
        Ok(query) => format!("{}?{}", result_page, query),
        Err(_) => result_page.clone(),
    };

    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location))
        .finish()
}

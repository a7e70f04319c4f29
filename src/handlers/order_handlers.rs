// 订单查询API处理器
// 供结果页轮询付款结果

use actix_web::{web, HttpResponse};

use crate::error::AppError;
use crate::models::OrderStatusResponse;
use crate::state::AppState;
use crate::utils::validation::validate_trade_no;

/// 查询订单状态
///
/// GET /order-status/{trade_no}
///
/// 响应: OrderStatusResponse
pub async fn order_status(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let trade_no = path.into_inner();
    if let Err(e) = validate_trade_no(&trade_no) {
        return e.to_response(data.environment());
    }

    match data.orders.find(&trade_no).await {
        Ok(Some(order)) => HttpResponse::Ok().json(OrderStatusResponse::from(&order)),
        Ok(None) => AppError::UnknownOrder(trade_no).to_response(data.environment()),
        Err(e) => {
            log::error!("Failed to look up order {}: {}", trade_no, e);
            e.to_response(data.environment())
        }
    }
}

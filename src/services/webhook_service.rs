// 网关通知服务
// 验证网关回传的加密通知，并将结果以幂等方式落到订单上，再转发到订单同步服务

use std::sync::Arc;

use crate::error::AppError;
use crate::models::{
    GatewayEnvelope, NotifyTradeInfo, Order, OrderStatus, ResultStatus, Transition,
};
use crate::services::order_store::{OrderRepository, TerminalUpdate};
use crate::services::sheet_sync::{OrderSink, OrderSyncPayload};
use crate::utils::crypto::TradeCipher;

/// 通知处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// 首次送达，订单已迁移到终态
    Applied(OrderStatus),
    /// 重复送达，订单保持原终态
    Duplicate(OrderStatus),
    /// 网关结果与已有终态不一致，订单保持原终态并等待人工对账
    Conflict {
        current: OrderStatus,
        reported: OrderStatus,
    },
    /// 找不到对应订单 (已记录日志，仍向网关确认)
    UnknownOrder(String),
}

/// 浏览器返回页的验证结果
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSummary {
    pub trade_no: String,
    pub result: ResultStatus,
}

/// 网关通知服务
pub struct WebhookService {
    merchant_id: String,
    cipher: Arc<dyn TradeCipher>,
    orders: Arc<dyn OrderRepository>,
    sink: Arc<dyn OrderSink>,
}

impl WebhookService {
    pub fn new(
        merchant_id: String,
        cipher: Arc<dyn TradeCipher>,
        orders: Arc<dyn OrderRepository>,
        sink: Arc<dyn OrderSink>,
    ) -> Self {
        Self {
            merchant_id,
            cipher,
            orders,
            sink,
        }
    }

    /// 验证并解析网关信封
    ///
    /// # Arguments
    /// * `envelope` - 网关回传的外层表单
    /// * `source` - 调用方地址 (仅用于日志)
    fn verify(&self, envelope: &GatewayEnvelope, source: &str) -> Result<NotifyTradeInfo, AppError> {
        let fields = self
            .cipher
            .decode(&envelope.encrypt_info, &envelope.hash_info)
            .map_err(AppError::from)
            .map_err(|e| {
                if matches!(e, AppError::Integrity) {
                    log::warn!("Rejected gateway payload with bad signature from {}", source);
                }
                e
            })?;

        let info = NotifyTradeInfo::from_fields(&fields)?;
        if info.mer_id != self.merchant_id {
            return Err(AppError::Decode(format!(
                "notification addressed to merchant {}",
                info.mer_id
            )));
        }
        Ok(info)
    }

    /// 处理网关服务器通知
    ///
    /// # Returns
    /// * `Err(Integrity | Decode)` 时未修改任何订单
    /// * `Err(Persistence)` 时终态已记录，订单标记为同步失败，等待网关重送
    /// * `Ok(Conflict)` 时终态不变，订单进入人工对账清单
    pub async fn handle_notification(
        &self,
        envelope: &GatewayEnvelope,
        source: &str,
    ) -> Result<NotifyOutcome, AppError> {
        let info = self.verify(envelope, source)?;

        let target = match info.result {
            ResultStatus::Success => OrderStatus::Completed,
            ResultStatus::Failure => OrderStatus::Failed,
        };
        let update = TerminalUpdate {
            status: target,
            gateway_trade_no: info.gateway_trade_no.clone(),
            gateway_message: info.message.clone(),
        };

        let transition = match self.orders.transition(&info.mer_trade_no, update).await {
            Ok(transition) => transition,
            Err(AppError::UnknownOrder(trade_no)) => {
                log::warn!("Gateway notification for unknown order {}", trade_no);
                return Ok(NotifyOutcome::UnknownOrder(trade_no));
            }
            Err(e) => return Err(e),
        };

        let outcome = match &transition {
            Transition::Applied(order) => {
                log::info!(
                    "Order {} transitioned to {} (gateway trade {:?})",
                    order.trade_no,
                    order.status,
                    order.gateway_trade_no
                );
                if let Some(amount) = info.trade_amt {
                    if amount != order.amount {
                        log::warn!(
                            "Order {} amount mismatch: expected {}, gateway reported {}",
                            order.trade_no,
                            order.amount,
                            amount
                        );
                    }
                }
                NotifyOutcome::Applied(order.status)
            }
            Transition::AlreadyTerminal(order) if order.status != target => {
                log::error!(
                    "Order {} is already {} but gateway reported {} (gateway trade {:?}), flagged for reconciliation",
                    order.trade_no,
                    order.status,
                    target,
                    info.gateway_trade_no
                );
                self.orders.flag_conflict(&order.trade_no, target).await?;
                NotifyOutcome::Conflict {
                    current: order.status,
                    reported: target,
                }
            }
            Transition::AlreadyTerminal(order) => {
                log::info!(
                    "Duplicate notification for order {} (already {})",
                    order.trade_no,
                    order.status
                );
                NotifyOutcome::Duplicate(order.status)
            }
        };

        self.forward(transition.order()).await?;
        Ok(outcome)
    }

    /// 转发终态订单到同步服务
    ///
    /// 认领、转发与结束同步在独立任务中完成，请求被取消时订单不会停留在同步中。
    async fn forward(&self, order: &Order) -> Result<(), AppError> {
        let orders = self.orders.clone();
        let sink = self.sink.clone();
        let order = order.clone();

        tokio::spawn(async move { forward_order(orders.as_ref(), sink.as_ref(), &order).await })
            .await
            .map_err(|e| AppError::Internal(format!("order sync task aborted: {}", e)))?
    }

    /// 验证浏览器返回页携带的信封 (不修改订单)
    pub fn verify_return(&self, envelope: &GatewayEnvelope, source: &str) -> Result<ReturnSummary, AppError> {
        let info = self.verify(envelope, source)?;
        Ok(ReturnSummary {
            trade_no: info.mer_trade_no,
            result: info.result,
        })
    }

    /// 等待人工对账的订单数
    pub async fn pending_reconciliation(&self) -> Result<usize, AppError> {
        Ok(self.orders.reconciliation_backlog().await?.len())
    }
}

/// 仅认领成功的一方转发；上次转发失败的订单在重送时再次转发
async fn forward_order(
    orders: &dyn OrderRepository,
    sink: &dyn OrderSink,
    order: &Order,
) -> Result<(), AppError> {
    if !orders.claim_sync(&order.trade_no).await? {
        return Ok(());
    }

    let payload = OrderSyncPayload::from(order);
    match sink.forward(&payload).await {
        Ok(()) => orders.finish_sync(&order.trade_no, true).await,
        Err(e) => {
            log::error!(
                "Order {} is {} but could not be forwarded, flagged for reconciliation: {}",
                order.trade_no,
                order.status,
                e
            );
            orders.finish_sync(&order.trade_no, false).await?;
            Err(e)
        }
    }
}

// 订单存储
// 订单状态的唯一权威记录，终态迁移使用比较并交换 (pending -> 终态)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::models::{Order, OrderStatus, SyncState, Transition};

/// 终态迁移请求
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub status: OrderStatus,
    pub gateway_trade_no: Option<String>,
    pub gateway_message: Option<String>,
}

/// 订单仓库接口
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// 新增待付款订单，交易编号重复时失败
    async fn insert_pending(&self, order: Order) -> Result<(), AppError>;

    async fn find(&self, trade_no: &str) -> Result<Option<Order>, AppError>;

    /// 原子地将 pending 订单迁移到终态
    ///
    /// 已处于终态的订单不做修改并返回 `AlreadyTerminal`。
    async fn transition(
        &self,
        trade_no: &str,
        update: TerminalUpdate,
    ) -> Result<Transition, AppError>;

    /// 认领同步任务 (unsynced/failed -> syncing)，返回是否认领成功
    async fn claim_sync(&self, trade_no: &str) -> Result<bool, AppError>;

    /// 结束同步任务
    async fn finish_sync(&self, trade_no: &str, synced: bool) -> Result<(), AppError>;

    /// 记录终态订单收到的不一致网关结果
    async fn flag_conflict(&self, trade_no: &str, reported: OrderStatus) -> Result<(), AppError>;

    /// 等待人工对账的订单 (同步失败或结果冲突)
    async fn reconciliation_backlog(&self) -> Result<Vec<Order>, AppError>;

    /// 将早于指定时间仍为 pending 的订单标记为过期 (供外部清理任务调用)
    async fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

/// 内存订单仓库
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderStore {
    async fn insert_pending(&self, order: Order) -> Result<(), AppError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.trade_no) {
            return Err(AppError::DuplicateTradeNo(order.trade_no));
        }
        orders.insert(order.trade_no.clone(), order);
        Ok(())
    }

    async fn find(&self, trade_no: &str) -> Result<Option<Order>, AppError> {
        Ok(self.orders.read().await.get(trade_no).cloned())
    }

    async fn transition(
        &self,
        trade_no: &str,
        update: TerminalUpdate,
    ) -> Result<Transition, AppError> {
        if !update.status.is_terminal() {
            return Err(AppError::Internal("target status must be terminal".to_string()));
        }

        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(trade_no)
            .ok_or_else(|| AppError::UnknownOrder(trade_no.to_string()))?;

        if order.status.is_terminal() {
            return Ok(Transition::AlreadyTerminal(order.clone()));
        }

        order.status = update.status;
        order.gateway_trade_no = update.gateway_trade_no;
        order.gateway_message = update.gateway_message;
        order.updated_at = Utc::now();
        Ok(Transition::Applied(order.clone()))
    }

    async fn claim_sync(&self, trade_no: &str) -> Result<bool, AppError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(trade_no)
            .ok_or_else(|| AppError::UnknownOrder(trade_no.to_string()))?;

        if order.status.is_terminal() && order.sync_state.is_claimable() {
            order.sync_state = SyncState::Syncing;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn finish_sync(&self, trade_no: &str, synced: bool) -> Result<(), AppError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(trade_no)
            .ok_or_else(|| AppError::UnknownOrder(trade_no.to_string()))?;
        order.sync_state = if synced { SyncState::Synced } else { SyncState::Failed };
        Ok(())
    }

    async fn flag_conflict(&self, trade_no: &str, reported: OrderStatus) -> Result<(), AppError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(trade_no)
            .ok_or_else(|| AppError::UnknownOrder(trade_no.to_string()))?;
        order.reported_status = Some(reported);
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn reconciliation_backlog(&self) -> Result<Vec<Order>, AppError> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|o| o.needs_reconciliation())
            .cloned()
            .collect())
    }

    async fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut orders = self.orders.write().await;
        let now = Utc::now();
        let mut expired = 0;
        for order in orders.values_mut() {
            if order.status == OrderStatus::Pending && order.created_at < cutoff {
                order.status = OrderStatus::Expired;
                order.updated_at = now;
                expired += 1;
            }
        }
        if expired > 0 {
            log::info!("Expired {} stale pending orders", expired);
        }
        Ok(expired)
    }
}

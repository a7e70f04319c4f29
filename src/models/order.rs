// 订单数据模型
// 订单状态机: pending -> {completed, failed, expired}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::ProductKind;

/// 订单
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// 商店交易编号
    pub trade_no: String,
    /// 商品ID
    pub product_id: String,
    /// 商品类型
    pub kind: ProductKind,
    /// 订单金额
    pub amount: i64,
    /// 订单状态
    pub status: OrderStatus,
    /// 同步到表格的状态
    pub sync_state: SyncState,
    /// 网关交易编号
    pub gateway_trade_no: Option<String>,
    /// 网关返回信息
    pub gateway_message: Option<String>,
    /// 终态确定后网关又回报了不同结果 (等待人工对账)
    #[serde(default)]
    pub reported_status: Option<OrderStatus>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// 是否需要人工对账：同步失败，或网关回报与终态不一致
    pub fn needs_reconciliation(&self) -> bool {
        self.status.is_terminal()
            && (self.sync_state == SyncState::Failed || self.reported_status.is_some())
    }

    /// 创建待付款订单
    pub fn pending(trade_no: String, product_id: String, kind: ProductKind, amount: i64) -> Self {
        let now = Utc::now();
        Self {
            trade_no,
            product_id,
            kind,
            amount,
            status: OrderStatus::Pending,
            sync_state: SyncState::Unsynced,
            gateway_trade_no: None,
            gateway_message: None,
            reported_status: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 订单状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Expired => "expired",
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单同步状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// 尚未同步
    Unsynced,
    /// 同步中 (已被某个请求认领)
    Syncing,
    /// 已同步
    Synced,
    /// 同步失败，等待网关重送或人工对账
    Failed,
}

impl SyncState {
    /// 是否可被认领发起同步
    pub fn is_claimable(&self) -> bool {
        matches!(self, SyncState::Unsynced | SyncState::Failed)
    }
}

/// 状态迁移结果
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// 本次请求完成了 pending -> 终态 的迁移
    Applied(Order),
    /// 订单已处于终态，未做任何修改
    AlreadyTerminal(Order),
}

impl Transition {
    pub fn order(&self) -> &Order {
        match self {
            Transition::Applied(order) | Transition::AlreadyTerminal(order) => order,
        }
    }
}

/// 订单状态查询响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub trade_no: String,
    pub status: OrderStatus,
    pub amount: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderStatusResponse {
    fn from(order: &Order) -> Self {
        Self {
            trade_no: order.trade_no.clone(),
            status: order.status,
            amount: order.amount,
            updated_at: order.updated_at,
        }
    }
}

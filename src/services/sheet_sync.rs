// 订单同步服务
// 将已确定结果的订单转发到表格Webhook，请求有超时限制并只重试一次

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::Serialize;
use tokio::time::{sleep, Duration};

use crate::config::PersistenceConfig;
use crate::error::AppError;
use crate::models::{Order, OrderStatus};

/// 同步载荷
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderSyncPayload {
    pub action: &'static str,
    pub trade_no: String,
    pub product_id: String,
    pub amount: i64,
    pub status: OrderStatus,
    pub gateway_trade_no: Option<String>,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderSyncPayload {
    fn from(order: &Order) -> Self {
        Self {
            action: "upsertOrder",
            trade_no: order.trade_no.clone(),
            product_id: order.product_id.clone(),
            amount: order.amount,
            status: order.status,
            gateway_trade_no: order.gateway_trade_no.clone(),
            message: order.gateway_message.clone(),
            updated_at: order.updated_at,
        }
    }
}

/// 订单持久化接口
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn forward(&self, payload: &OrderSyncPayload) -> Result<(), AppError>;
}

/// 表格Webhook同步
pub struct SheetWebhookSink {
    client: Client,
    url: String,
    retry_delay: Duration,
}

impl SheetWebhookSink {
    /// 创建同步服务
    ///
    /// # Arguments
    /// * `config` - 同步配置 (地址、超时、重试间隔)
    pub fn new(config: &PersistenceConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent("storefront-pay/1.0")
            .build()?;

        Ok(Self {
            client,
            url: config.sheet_webhook_url.clone(),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// 单次发送尝试
    async fn send_attempt(&self, payload: &OrderSyncPayload) -> Result<(), AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("storefront-pay/1.0"));

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::Persistence(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AppError::Persistence(format!(
                "sheet webhook returned {}: {}",
                status.as_u16(),
                body
            )))
        }
    }
}

#[async_trait]
impl OrderSink for SheetWebhookSink {
    async fn forward(&self, payload: &OrderSyncPayload) -> Result<(), AppError> {
        match self.send_attempt(payload).await {
            Ok(()) => Ok(()),
            Err(first) => {
                log::warn!(
                    "Order {} forward failed, retrying in {}ms: {}",
                    payload.trade_no,
                    self.retry_delay.as_millis(),
                    first
                );
                sleep(self.retry_delay).await;
                self.send_attempt(payload).await
            }
        }
    }
}

// 支付服务
// 负责为每次结账生成一份已加密签名、可直接提交到网关的付款请求，并建立待付款订单

use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::models::{
    CheckoutRequest, CheckoutResponse, GatewayForm, OneTimeTradeInfo, Order, PeriodTradeInfo,
    Product, ProductKind,
};
use crate::services::anti_abuse::AntiAbuseGate;
use crate::services::catalog::ProductCatalog;
use crate::services::order_store::OrderRepository;
use crate::services::period_translator::{self, FType};
use crate::utils::crypto::{generate_random_string, TradeCipher, UPPER_ALPHANUMERIC};
use crate::utils::validation::validate_product_id;

/// 交易编号随机后缀长度
const TRADE_SUFFIX_LEN: usize = 6;

/// 交易编号冲突时的最大重试次数
const MAX_TRADE_NO_ATTEMPTS: usize = 3;

/// 网关所在时区 (UTC+8)
const GATEWAY_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// 付款请求 (仅存在于本次结账流程中)
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub product_id: String,
    pub amount: i64,
    pub merchant_trade_no: String,
    pub encrypted_payload: String,
    pub signature: String,
    pub gateway_endpoint: String,
}

/// 支付服务
pub struct PaymentService {
    gateway: GatewayConfig,
    catalog: Arc<ProductCatalog>,
    cipher: Arc<dyn TradeCipher>,
    orders: Arc<dyn OrderRepository>,
    gate: Arc<AntiAbuseGate>,
}

impl PaymentService {
    /// 创建新的支付服务实例
    pub fn new(
        gateway: GatewayConfig,
        catalog: Arc<ProductCatalog>,
        cipher: Arc<dyn TradeCipher>,
        orders: Arc<dyn OrderRepository>,
        gate: Arc<AntiAbuseGate>,
    ) -> Self {
        Self {
            gateway,
            catalog,
            cipher,
            orders,
            gate,
        }
    }

    /// 处理一次结账
    ///
    /// # Arguments
    /// * `request` - 结账请求 (商品ID与人机验证令牌)
    /// * `expected` - 端点接受的商品类型
    /// * `remote_ip` - 调用方地址
    ///
    /// # Returns
    /// * 已签名的付款请求，对应订单已标记为 pending
    pub async fn checkout(
        &self,
        request: &CheckoutRequest,
        expected: ProductKind,
        remote_ip: Option<&str>,
    ) -> Result<PaymentRequest, AppError> {
        validate_product_id(&request.product_id)?;

        self.gate
            .verify_human(request.turnstile_token.as_deref(), remote_ip)
            .await?;

        let product = self
            .catalog
            .get(&request.product_id)
            .ok_or_else(|| AppError::NotFound(request.product_id.clone()))?;

        if product.kind != expected {
            return Err(AppError::InvalidRequest(format!(
                "product {} is a {} product",
                product.id, product.kind
            )));
        }

        for _ in 0..MAX_TRADE_NO_ATTEMPTS {
            let now = Utc::now();
            let trade_no = generate_trade_no(product.kind, now)?;
            let payment = self.build_request(product, &trade_no, now)?;

            // 插入本身即唯一性检查
            match self
                .orders
                .insert_pending(Order::pending(
                    trade_no,
                    product.id.clone(),
                    product.kind,
                    payment.amount,
                ))
                .await
            {
                Ok(()) => {}
                Err(AppError::DuplicateTradeNo(trade_no)) => {
                    log::warn!("Trade number collision on {}, regenerating", trade_no);
                    continue;
                }
                Err(e) => return Err(e),
            }

            log::info!(
                "Created {} payment request {} for product {} (amount {})",
                product.kind,
                payment.merchant_trade_no,
                product.id,
                payment.amount
            );
            return Ok(payment);
        }

        Err(AppError::Internal(
            "could not allocate a unique trade number".to_string(),
        ))
    }

    /// 组装并签名付款请求
    ///
    /// 金额只取自商品价格，从不接受调用方提供的金额。
    pub fn build_request(
        &self,
        product: &Product,
        trade_no: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentRequest, AppError> {
        let amount = product.price;
        let timestamp = now.timestamp();

        let (fields, endpoint) = match product.kind {
            ProductKind::OneTime => {
                let info = OneTimeTradeInfo {
                    mer_id: self.gateway.merchant_id.clone(),
                    mer_trade_no: trade_no.to_string(),
                    trade_amt: amount,
                    timestamp,
                    prod_desc: product.name.clone(),
                    return_url: self.gateway.return_url.clone(),
                    notify_url: self.gateway.notify_url.clone(),
                };
                (info.to_fields(), self.gateway.one_time_endpoint())
            }
            ProductKind::Subscription => {
                let config = product.period_config.as_ref().ok_or_else(|| {
                    AppError::Config(format!("subscription {} has no period config", product.id))
                })?;
                let period = period_translator::translate(config, product.trial.as_ref())?;
                let first_date = match period.f_type {
                    FType::Job => Some(first_charge_date(now, period.first_charge_delay_days)?),
                    FType::Build => None,
                };
                let info = PeriodTradeInfo {
                    mer_id: self.gateway.merchant_id.clone(),
                    mer_trade_no: trade_no.to_string(),
                    period_amt: amount,
                    prod_desc: product.name.clone(),
                    period,
                    first_date,
                    return_url: self.gateway.return_url.clone(),
                    notify_url: self.gateway.notify_url.clone(),
                    timestamp,
                };
                (info.to_fields(), self.gateway.period_endpoint())
            }
        };

        let sealed = self.cipher.encode(&fields)?;

        Ok(PaymentRequest {
            product_id: product.id.clone(),
            amount,
            merchant_trade_no: trade_no.to_string(),
            encrypted_payload: sealed.encrypt_info,
            signature: sealed.hash_info,
            gateway_endpoint: endpoint,
        })
    }

    /// 转换为前端自动提交表单所需的响应
    pub fn checkout_response(&self, payment: PaymentRequest) -> CheckoutResponse {
        CheckoutResponse {
            pay_url: payment.gateway_endpoint,
            data: GatewayForm {
                mer_id: self.gateway.merchant_id.clone(),
                version: self.gateway.version.clone(),
                encrypt_info: payment.encrypted_payload,
                hash_info: payment.signature,
            },
        }
    }
}

fn gateway_offset() -> Result<FixedOffset, AppError> {
    FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS)
        .ok_or_else(|| AppError::Internal("invalid gateway timezone offset".to_string()))
}

/// 生成商店交易编号: 类型前缀 + yyMMddHHmmss + 6位随机大写字母数字
pub fn generate_trade_no(kind: ProductKind, now: DateTime<Utc>) -> Result<String, AppError> {
    let local = now.with_timezone(&gateway_offset()?);
    Ok(format!(
        "{}{}{}",
        kind.trade_prefix(),
        local.format("%y%m%d%H%M%S"),
        generate_random_string(TRADE_SUFFIX_LEN, UPPER_ALPHANUMERIC)
    ))
}

/// 试用期结束后的首期扣款日 (网关时区，YYYY-MM-DD)
fn first_charge_date(now: DateTime<Utc>, delay_days: i32) -> Result<String, AppError> {
    let local = now.with_timezone(&gateway_offset()?);
    let date = local + Duration::days(i64::from(delay_days));
    Ok(date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RateLimitConfig};
    use crate::models::{CheckoutRequest, OrderStatus, Transition};
    use crate::services::anti_abuse::{HumanVerifier, InMemoryRateLimitStore};
    use crate::services::order_store::{InMemoryOrderStore, TerminalUpdate};
    use crate::utils::crypto::PayuniCodec;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RejectAll;

    #[async_trait]
    impl HumanVerifier for RejectAll {
        async fn verify(&self, _token: &str, _ip: Option<&str>) -> Result<bool, AppError> {
            Ok(false)
        }
    }

    struct Fixture {
        service: PaymentService,
        codec: Arc<PayuniCodec>,
        orders: Arc<InMemoryOrderStore>,
    }

    fn fixture(verifier: Option<Arc<dyn HumanVerifier>>) -> Fixture {
        let config = Config::for_test();
        let codec = Arc::new(
            PayuniCodec::new(config.gateway.hash_key.clone(), config.gateway.hash_iv.clone())
                .unwrap(),
        );
        let orders = Arc::new(InMemoryOrderStore::new());
        let gate = Arc::new(AntiAbuseGate::new(
            RateLimitConfig::default(),
            Arc::new(InMemoryRateLimitStore::new()),
            verifier,
        ));
        let service = PaymentService::new(
            config.gateway.clone(),
            Arc::new(ProductCatalog::load(None).unwrap()),
            codec.clone(),
            orders.clone(),
            gate,
        );
        Fixture {
            service,
            codec,
            orders,
        }
    }

    fn request(product_id: &str) -> CheckoutRequest {
        CheckoutRequest {
            product_id: product_id.to_string(),
            turnstile_token: Some("token".to_string()),
        }
    }

    #[tokio::test]
    async fn test_plan_basic_builds_immediate_subscription() {
        let fx = fixture(None);
        let payment = fx
            .service
            .checkout(&request("plan_basic"), ProductKind::Subscription, None)
            .await
            .unwrap();

        assert_eq!(payment.amount, 990);
        assert!(payment.gateway_endpoint.ends_with("/api/period"));

        let fields = fx
            .codec
            .decode(&payment.encrypted_payload, &payment.signature)
            .unwrap();
        assert_eq!(fields.get("FType"), Some("build"));
        assert_eq!(fields.get("FDate"), None);
        assert_eq!(fields.get("PeriodAmt"), Some("990"));
        assert_eq!(fields.get("MerTradeNo"), Some(payment.merchant_trade_no.as_str()));

        let order = fx.orders.find(&payment.merchant_trade_no).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_trial_plan_builds_delayed_subscription() {
        let fx = fixture(None);
        let product = fx.service.catalog.get("plan_monthly_trial").unwrap().clone();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let payment = fx.service.build_request(&product, "S240101100000ABCDEF", now).unwrap();

        let fields = fx
            .codec
            .decode(&payment.encrypted_payload, &payment.signature)
            .unwrap();
        assert_eq!(fields.get("FType"), Some("job"));
        assert_eq!(fields.get("FDate"), Some("2024-01-08"));
    }

    #[tokio::test]
    async fn test_amount_comes_from_catalog() {
        let fx = fixture(None);
        // 客户端附带的金额字段在反序列化时即被忽略
        let request: CheckoutRequest = serde_json::from_str(
            r#"{"productID":"ebook_starter","turnstileToken":"t","amount":1,"TradeAmt":"1"}"#,
        )
        .unwrap();
        let payment = fx
            .service
            .checkout(&request, ProductKind::OneTime, None)
            .await
            .unwrap();

        assert_eq!(payment.amount, 1200);
        let fields = fx
            .codec
            .decode(&payment.encrypted_payload, &payment.signature)
            .unwrap();
        assert_eq!(fields.get("TradeAmt"), Some("1200"));
        assert!(payment.gateway_endpoint.ends_with("/api/upp"));
    }

    #[tokio::test]
    async fn test_unknown_product_creates_no_order() {
        let fx = fixture(None);
        let result = fx
            .service
            .checkout(&request("plan_missing"), ProductKind::Subscription, None)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(fx.orders.is_empty().await);
    }

    #[tokio::test]
    async fn test_kind_mismatch_rejected() {
        let fx = fixture(None);
        let result = fx
            .service
            .checkout(&request("plan_basic"), ProductKind::OneTime, None)
            .await;
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_failed_verification_creates_no_order() {
        let fx = fixture(Some(Arc::new(RejectAll)));
        let result = fx
            .service
            .checkout(&request("plan_basic"), ProductKind::Subscription, None)
            .await;
        assert!(matches!(result, Err(AppError::VerificationFailed(_))));

        let missing = CheckoutRequest {
            product_id: "plan_basic".to_string(),
            turnstile_token: None,
        };
        let result = fx
            .service
            .checkout(&missing, ProductKind::Subscription, None)
            .await;
        assert!(matches!(result, Err(AppError::VerificationRequired)));
        assert!(fx.orders.is_empty().await);
    }

    #[tokio::test]
    async fn test_trade_numbers_are_unique() {
        let fx = fixture(None);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let payment = fx
                .service
                .checkout(&request("ebook_starter"), ProductKind::OneTime, None)
                .await
                .unwrap();
            assert!(seen.insert(payment.merchant_trade_no));
        }
    }

    /// 前几次插入回报交易编号重复的订单仓库
    struct CollidingStore {
        inner: InMemoryOrderStore,
        collisions: AtomicUsize,
    }

    #[async_trait]
    impl OrderRepository for CollidingStore {
        async fn insert_pending(&self, order: Order) -> Result<(), AppError> {
            let remaining = self.collisions.load(Ordering::SeqCst);
            if remaining > 0 {
                self.collisions.store(remaining - 1, Ordering::SeqCst);
                return Err(AppError::DuplicateTradeNo(order.trade_no));
            }
            self.inner.insert_pending(order).await
        }

        async fn find(&self, trade_no: &str) -> Result<Option<Order>, AppError> {
            self.inner.find(trade_no).await
        }

        async fn transition(
            &self,
            trade_no: &str,
            update: TerminalUpdate,
        ) -> Result<Transition, AppError> {
            self.inner.transition(trade_no, update).await
        }

        async fn claim_sync(&self, trade_no: &str) -> Result<bool, AppError> {
            self.inner.claim_sync(trade_no).await
        }

        async fn finish_sync(&self, trade_no: &str, synced: bool) -> Result<(), AppError> {
            self.inner.finish_sync(trade_no, synced).await
        }

        async fn flag_conflict(&self, trade_no: &str, reported: OrderStatus) -> Result<(), AppError> {
            self.inner.flag_conflict(trade_no, reported).await
        }

        async fn reconciliation_backlog(&self) -> Result<Vec<Order>, AppError> {
            self.inner.reconciliation_backlog().await
        }

        async fn expire_pending_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, AppError> {
            self.inner.expire_pending_before(cutoff).await
        }
    }

    fn service_with(orders: Arc<dyn OrderRepository>) -> PaymentService {
        let config = Config::for_test();
        let codec = PayuniCodec::new(config.gateway.hash_key.clone(), config.gateway.hash_iv.clone())
            .unwrap();
        PaymentService::new(
            config.gateway.clone(),
            Arc::new(ProductCatalog::load(None).unwrap()),
            Arc::new(codec),
            orders,
            Arc::new(AntiAbuseGate::new(
                RateLimitConfig::default(),
                Arc::new(InMemoryRateLimitStore::new()),
                None,
            )),
        )
    }

    #[tokio::test]
    async fn test_duplicate_insert_regenerates_trade_number() {
        let orders = Arc::new(CollidingStore {
            inner: InMemoryOrderStore::new(),
            collisions: AtomicUsize::new(2),
        });
        let service = service_with(orders.clone());

        let payment = service
            .checkout(&request("ebook_starter"), ProductKind::OneTime, None)
            .await
            .unwrap();
        assert_eq!(orders.collisions.load(Ordering::SeqCst), 0);
        assert!(orders.find(&payment.merchant_trade_no).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persistent_collisions_give_up() {
        let orders = Arc::new(CollidingStore {
            inner: InMemoryOrderStore::new(),
            collisions: AtomicUsize::new(MAX_TRADE_NO_ATTEMPTS),
        });
        let service = service_with(orders.clone());

        let result = service
            .checkout(&request("ebook_starter"), ProductKind::OneTime, None)
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert!(orders.inner.is_empty().await);
    }

    #[test]
    fn test_trade_no_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 16, 30, 5).unwrap();
        let trade_no = generate_trade_no(ProductKind::Subscription, now).unwrap();
        assert_eq!(trade_no.len(), 19);
        // UTC 16:30 即网关时区次日 00:30
        assert!(trade_no.starts_with("S240310003005"));
    }
}

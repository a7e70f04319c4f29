// 应用状态管理
// 启动时组装一次的共享服务：配置、防滥用关卡、令牌、支付与通知服务

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::{Config, Environment};
use crate::services::anti_abuse::{HumanVerifier, RateLimitStore};
use crate::services::{
    AntiAbuseGate, InMemoryOrderStore, InMemoryRateLimitStore, OrderRepository, OrderSink,
    PaymentService, ProductCatalog, SheetWebhookSink, TokenService, TurnstileVerifier,
    WebhookService,
};
use crate::utils::crypto::{PayuniCodec, TradeCipher};

/// 应用全局状态
pub struct AppState {
    /// 应用配置
    pub config: Arc<Config>,
    /// 防滥用关卡
    pub gate: Arc<AntiAbuseGate>,
    /// 一次性令牌
    pub tokens: TokenService,
    /// 支付请求构建
    pub payments: PaymentService,
    /// 网关通知对账
    pub webhooks: WebhookService,
    /// 订单存储
    pub orders: Arc<dyn OrderRepository>,
}

impl AppState {
    /// 按配置创建生产环境的应用状态
    ///
    /// # Arguments
    /// * `config` - 已校验的应用配置
    ///
    /// # Returns
    /// * 应用状态实例，商品目录或外部服务客户端无法建立时返回错误
    pub fn new(config: Config) -> Result<Self> {
        let sink = SheetWebhookSink::new(&config.persistence)
            .context("Failed to create sheet webhook client")?;

        let verifier: Option<Arc<dyn HumanVerifier>> = if config.turnstile.enabled {
            let turnstile = TurnstileVerifier::new(&config.turnstile)
                .context("Failed to create Turnstile client")?;
            Some(Arc::new(turnstile))
        } else {
            log::warn!("Human verification is disabled");
            None
        };

        Self::assemble(
            config,
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(sink),
            Arc::new(InMemoryRateLimitStore::new()),
            verifier,
        )
    }

    /// 以指定的存储与外部服务组装应用状态
    pub fn assemble(
        config: Config,
        orders: Arc<dyn OrderRepository>,
        sink: Arc<dyn OrderSink>,
        rate_limits: Arc<dyn RateLimitStore>,
        verifier: Option<Arc<dyn HumanVerifier>>,
    ) -> Result<Self> {
        let catalog = ProductCatalog::load(config.catalog_path.as_deref())
            .context("Failed to load product catalog")?;
        log::info!("Loaded {} products", catalog.len());

        let cipher: Arc<dyn TradeCipher> = Arc::new(
            PayuniCodec::new(config.gateway.hash_key.clone(), config.gateway.hash_iv.clone())
                .context("Invalid gateway credentials")?,
        );

        let gate = Arc::new(AntiAbuseGate::new(
            config.rate_limit.clone(),
            rate_limits,
            verifier,
        ));

        let payments = PaymentService::new(
            config.gateway.clone(),
            Arc::new(catalog),
            cipher.clone(),
            orders.clone(),
            gate.clone(),
        );
        let webhooks = WebhookService::new(
            config.gateway.merchant_id.clone(),
            cipher,
            orders.clone(),
            sink,
        );

        Ok(Self {
            config: Arc::new(config),
            gate,
            tokens: TokenService::new(),
            payments,
            webhooks,
            orders,
        })
    }

    /// 当前运行环境
    pub fn environment(&self) -> Environment {
        self.config.server.environment
    }

    /// 创建测试用的应用状态 (内存存储，同步服务总是成功，不启用人机验证)
    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Self::assemble(
            Config::for_test(),
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(test_support::AcceptingSink),
            Arc::new(InMemoryRateLimitStore::new()),
            None,
        )
        .expect("test state")
    }
}

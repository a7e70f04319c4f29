// 防滥用关卡
// 在请求到达支付请求构建之前，检查人机验证结果并按路由类别限制请求频率

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::{BudgetConfig, RateLimitConfig, TurnstileConfig};
use crate::error::AppError;

/// 路由类别，每类有独立的滑动窗口额度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// 一般流量
    General,
    /// 发起付款
    Payment,
    /// 查询付款结果
    Polling,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::General => "general",
            RouteClass::Payment => "payment",
            RouteClass::Polling => "polling",
        }
    }

    /// 统一的限流提示 (不透露额度细节)
    pub fn limit_message(&self) -> &'static str {
        match self {
            RouteClass::General => "Too many requests, please try again later.",
            RouteClass::Payment => "Too many payment attempts, please try again later.",
            RouteClass::Polling => "Too many status checks, please slow down.",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 额度检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

/// 限流计数存储接口 (可替换为内存或分布式实现)
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// 记录一次请求并返回是否允许
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
        now: Instant,
    ) -> Result<BudgetDecision, AppError>;
}

/// 清理过期调用方记录的最短间隔
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// 单个键的请求日志
#[derive(Debug)]
struct SlidingLog {
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingLog {
    fn evict_before(&mut self, now: Instant) {
        while let Some(oldest) = self.hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// 窗口内已无任何请求
    fn is_idle(&self, now: Instant) -> bool {
        self.hits
            .back()
            .map_or(true, |last| now.saturating_duration_since(*last) >= self.window)
    }
}

#[derive(Debug, Default)]
struct Logs {
    by_key: HashMap<String, SlidingLog>,
    last_sweep: Option<Instant>,
}

impl Logs {
    /// 移除窗口已过的键，轮换来源地址不会让表无限增长
    fn sweep(&mut self, now: Instant) {
        match self.last_sweep {
            Some(last) if now.saturating_duration_since(last) < SWEEP_INTERVAL => {}
            Some(_) => {
                let before = self.by_key.len();
                self.by_key.retain(|_, entry| !entry.is_idle(now));
                let removed = before - self.by_key.len();
                if removed > 0 {
                    log::debug!("Dropped {} idle rate limit keys", removed);
                }
                self.last_sweep = Some(now);
            }
            None => self.last_sweep = Some(now),
        }
    }
}

/// 内存滑动窗口计数
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    logs: Mutex<Logs>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.logs.lock().await.by_key.len()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
        now: Instant,
    ) -> Result<BudgetDecision, AppError> {
        let mut logs = self.logs.lock().await;
        logs.sweep(now);

        let entries = logs.by_key.entry(key.to_string()).or_insert_with(|| SlidingLog {
            window,
            hits: VecDeque::new(),
        });
        entries.window = window;
        entries.evict_before(now);

        if entries.hits.len() >= max_requests as usize {
            let retry_after = entries
                .hits
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(window);
            return Ok(BudgetDecision::Denied { retry_after });
        }

        entries.hits.push_back(now);
        Ok(BudgetDecision::Allowed {
            remaining: max_requests - entries.hits.len() as u32,
        })
    }
}

/// 人机验证服务接口
#[async_trait]
pub trait HumanVerifier: Send + Sync {
    /// 向验证服务确认令牌，返回是否通过
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool, AppError>;
}

/// Turnstile验证响应
#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

/// Cloudflare Turnstile 人机验证
pub struct TurnstileVerifier {
    client: Client,
    secret_key: SecretString,
    verify_url: String,
}

impl TurnstileVerifier {
    pub fn new(config: &TurnstileConfig) -> anyhow::Result<Self> {
        let secret_key = config
            .secret_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Turnstile secret key is not configured"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            client,
            secret_key,
            verify_url: config.verify_url.clone(),
        })
    }
}

#[async_trait]
impl HumanVerifier for TurnstileVerifier {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool, AppError> {
        let mut form = vec![
            ("secret", self.secret_key.expose_secret().as_str()),
            ("response", token),
        ];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }

        let response = self
            .client
            .post(&self.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::VerificationFailed(format!("provider unreachable: {}", e)))?;

        let result: SiteVerifyResponse = response
            .json()
            .await
            .map_err(|e| AppError::VerificationFailed(format!("invalid provider response: {}", e)))?;

        if !result.success {
            log::warn!("Turnstile rejected token: {:?}", result.error_codes);
        }
        Ok(result.success)
    }
}

/// 防滥用关卡
///
/// 除共享的限流计数外不保存任何请求状态，也不了解商品与订单。
pub struct AntiAbuseGate {
    budgets: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    verifier: Option<Arc<dyn HumanVerifier>>,
}

impl AntiAbuseGate {
    /// 创建防滥用关卡
    ///
    /// # Arguments
    /// * `budgets` - 各路由类别的额度
    /// * `store` - 限流计数存储
    /// * `verifier` - 人机验证服务，`None` 表示未启用
    pub fn new(
        budgets: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        verifier: Option<Arc<dyn HumanVerifier>>,
    ) -> Self {
        Self {
            budgets,
            store,
            verifier,
        }
    }

    fn budget_for(&self, class: RouteClass) -> BudgetConfig {
        match class {
            RouteClass::General => self.budgets.general,
            RouteClass::Payment => self.budgets.payment,
            RouteClass::Polling => self.budgets.polling,
        }
    }

    /// 检查调用方在某路由类别的额度
    pub async fn check_budget(&self, class: RouteClass, caller: &str) -> Result<(), AppError> {
        self.check_budget_at(class, caller, Instant::now()).await
    }

    pub async fn check_budget_at(
        &self,
        class: RouteClass,
        caller: &str,
        now: Instant,
    ) -> Result<(), AppError> {
        let budget = self.budget_for(class);
        let key = format!("ratelimit:{}:{}", class.as_str(), caller);
        let decision = self
            .store
            .hit(
                &key,
                Duration::from_secs(budget.window_secs),
                budget.max_requests,
                now,
            )
            .await?;

        match decision {
            BudgetDecision::Allowed { .. } => Ok(()),
            BudgetDecision::Denied { retry_after } => {
                log::warn!("Rate limit exceeded: class={} caller={}", class, caller);
                Err(AppError::RateLimited {
                    class,
                    retry_after_secs: retry_after.as_secs().max(1),
                })
            }
        }
    }

    pub fn human_verification_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    /// 检查人机验证令牌
    pub async fn verify_human(
        &self,
        token: Option<&str>,
        remote_ip: Option<&str>,
    ) -> Result<(), AppError> {
        let Some(verifier) = &self.verifier else {
            return Ok(());
        };

        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::VerificationRequired)?;

        if verifier.verify(token, remote_ip).await? {
            Ok(())
        } else {
            Err(AppError::VerificationFailed("token rejected by provider".to_string()))
        }
    }
}

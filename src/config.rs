// 配置管理模块
// 负责在启动时加载并校验应用程序配置，缺少必填项时直接启动失败

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// 应用程序配置结构
#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器配置
    pub server: ServerConfig,
    /// 支付网关配置
    pub gateway: GatewayConfig,
    /// 人机验证配置
    pub turnstile: TurnstileConfig,
    /// 订单同步配置
    pub persistence: PersistenceConfig,
    /// 请求限流配置
    pub rate_limit: RateLimitConfig,
    /// 商品目录文件路径 (可选，未配置时使用内置目录)
    pub catalog_path: Option<String>,
}

/// 运行环境
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => anyhow::bail!("Unknown APP_ENV: {}", other),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 工作线程数
    pub workers: Option<usize>,
    /// 运行环境
    pub environment: Environment,
    /// 允许跨域访问的前端源
    pub allowed_origins: Vec<String>,
    /// 是否信任反向代理的 X-Forwarded-For 作为调用方地址
    pub trust_forwarded_for: bool,
}

/// 支付网关配置
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// 网关API地址
    pub api_base: String,
    /// 商店代号
    pub merchant_id: String,
    /// 加密密钥 (32字节)
    pub hash_key: SecretString,
    /// 加密向量 (16字节)
    pub hash_iv: SecretString,
    /// 网关接口版本
    pub version: String,
    /// 付款完成后浏览器返回地址
    pub return_url: String,
    /// 网关服务器通知地址
    pub notify_url: String,
    /// 付款结果展示页
    pub result_page_url: String,
}

impl GatewayConfig {
    /// 单次付款端点
    pub fn one_time_endpoint(&self) -> String {
        format!("{}/api/upp", self.api_base.trim_end_matches('/'))
    }

    /// 定期定额端点
    pub fn period_endpoint(&self) -> String {
        format!("{}/api/period", self.api_base.trim_end_matches('/'))
    }
}

/// 人机验证配置
#[derive(Debug, Clone)]
pub struct TurnstileConfig {
    pub enabled: bool,
    pub secret_key: Option<SecretString>,
    pub verify_url: String,
    /// 请求超时时间 (秒)
    pub timeout: u64,
}

/// 订单同步配置 (表格Webhook)
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// 表格Webhook地址
    pub sheet_webhook_url: String,
    /// 请求超时时间 (秒)
    pub timeout: u64,
    /// 重试前等待时间 (毫秒)
    pub retry_delay_ms: u64,
}

/// 单个路由类别的额度
#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    /// 滑动窗口长度 (秒)
    pub window_secs: u64,
    /// 窗口内最大请求数
    pub max_requests: u32,
}

/// 请求限流配置
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// 一般流量
    pub general: BudgetConfig,
    /// 发起付款
    pub payment: BudgetConfig,
    /// 查询付款结果
    pub polling: BudgetConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: BudgetConfig { window_secs: 15 * 60, max_requests: 100 },
            payment: BudgetConfig { window_secs: 60, max_requests: 5 },
            polling: BudgetConfig { window_secs: 60, max_requests: 30 },
        }
    }
}

/// 读取并解析数值变量，超出目标类型范围时报错
///
/// # Arguments
/// * `var` - 变量查找函数
/// * `key` - 变量名
/// * `default` - 未设置时的默认值
fn parse_var<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {}", key, raw)),
        None => Ok(default),
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // 加载.env文件，忽略错误
        Self::from_vars(|key| env::var(key).ok())
    }

    /// 通过变量查找函数加载配置
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            var(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} environment variable is required", key))
        };

        let flag = |key: &str| {
            var(key)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false)
        };

        let turnstile_enabled = flag("TURNSTILE_ENABLED");
        let turnstile_secret = if turnstile_enabled {
            Some(SecretString::new(required("TURNSTILE_SECRET_KEY")?))
        } else {
            var("TURNSTILE_SECRET_KEY").map(SecretString::new)
        };

        let defaults = RateLimitConfig::default();
        let budget = |prefix: &str, fallback: BudgetConfig| -> Result<BudgetConfig> {
            Ok(BudgetConfig {
                window_secs: parse_var(
                    &var,
                    &format!("RATE_LIMIT_{}_WINDOW_SECS", prefix),
                    fallback.window_secs,
                )?,
                max_requests: parse_var(
                    &var,
                    &format!("RATE_LIMIT_{}_MAX", prefix),
                    fallback.max_requests,
                )?,
            })
        };

        let config = Config {
            server: ServerConfig {
                host: var("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: parse_var(&var, "SERVER_PORT", 8080)?,
                workers: var("SERVER_WORKERS").and_then(|s| s.parse().ok()),
                environment: var("APP_ENV")
                    .unwrap_or_else(|| "production".to_string())
                    .parse()?,
                allowed_origins: var("CORS_ALLOWED_ORIGINS")
                    .map(|v| {
                        v.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                trust_forwarded_for: flag("TRUST_FORWARDED_FOR"),
            },
            gateway: GatewayConfig {
                api_base: required("PAYUNI_API_BASE")?,
                merchant_id: required("PAYUNI_MER_ID")?,
                hash_key: SecretString::new(required("PAYUNI_HASH_KEY")?),
                hash_iv: SecretString::new(required("PAYUNI_HASH_IV")?),
                version: var("PAYUNI_VERSION").unwrap_or_else(|| "1.0".to_string()),
                return_url: required("PAYUNI_RETURN_URL")?,
                notify_url: required("PAYUNI_NOTIFY_URL")?,
                result_page_url: var("PAYMENT_RESULT_URL")
                    .unwrap_or_else(|| "/payment-result.html".to_string()),
            },
            turnstile: TurnstileConfig {
                enabled: turnstile_enabled,
                secret_key: turnstile_secret,
                verify_url: var("TURNSTILE_VERIFY_URL").unwrap_or_else(|| {
                    "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string()
                }),
                timeout: parse_var(&var, "TURNSTILE_TIMEOUT", 5)?,
            },
            persistence: PersistenceConfig {
                sheet_webhook_url: required("SHEET_WEBHOOK_URL")?,
                timeout: parse_var(&var, "SHEET_WEBHOOK_TIMEOUT", 10)?,
                retry_delay_ms: parse_var(&var, "SHEET_WEBHOOK_RETRY_DELAY_MS", 500)?,
            },
            rate_limit: RateLimitConfig {
                general: budget("GENERAL", defaults.general)?,
                payment: budget("PAYMENT", defaults.payment)?,
                polling: budget("POLLING", defaults.polling)?,
            },
            catalog_path: var("PRODUCT_CATALOG_PATH").filter(|v| !v.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        // AES-256-GCM 需要32字节密钥与16字节向量
        if self.gateway.hash_key.expose_secret().len() != 32 {
            anyhow::bail!("PAYUNI_HASH_KEY must be exactly 32 bytes");
        }
        if self.gateway.hash_iv.expose_secret().len() != 16 {
            anyhow::bail!("PAYUNI_HASH_IV must be exactly 16 bytes");
        }

        for (name, url) in [
            ("PAYUNI_API_BASE", &self.gateway.api_base),
            ("PAYUNI_RETURN_URL", &self.gateway.return_url),
            ("PAYUNI_NOTIFY_URL", &self.gateway.notify_url),
            ("SHEET_WEBHOOK_URL", &self.persistence.sheet_webhook_url),
        ] {
            reqwest::Url::parse(url).with_context(|| format!("{} is not a valid URL", name))?;
        }

        if self.turnstile.enabled && self.turnstile.secret_key.is_none() {
            anyhow::bail!("TURNSTILE_SECRET_KEY is required when TURNSTILE_ENABLED is set");
        }

        for (name, budget) in [
            ("GENERAL", self.rate_limit.general),
            ("PAYMENT", self.rate_limit.payment),
            ("POLLING", self.rate_limit.polling),
        ] {
            if budget.window_secs == 0 || budget.max_requests == 0 {
                anyhow::bail!("Rate limit budget {} must have a non-zero window and ceiling", name);
            }
        }

        Ok(())
    }

    /// 获取服务器绑定地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 测试用配置
    #[cfg(test)]
    pub fn for_test() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: Some(1),
                environment: Environment::Development,
                allowed_origins: vec!["http://localhost:3000".to_string()],
                trust_forwarded_for: false,
            },
            gateway: GatewayConfig {
                api_base: "https://sandbox-api.payuni.com.tw".to_string(),
                merchant_id: "S01234567".to_string(),
                hash_key: SecretString::new("12345678901234567890123456789012".to_string()),
                hash_iv: SecretString::new("1234567890123456".to_string()),
                version: "1.0".to_string(),
                return_url: "https://shop.example.com/payment-return".to_string(),
                notify_url: "https://shop.example.com/payuni-webhook".to_string(),
                result_page_url: "/payment-result.html".to_string(),
            },
            turnstile: TurnstileConfig {
                enabled: false,
                secret_key: None,
                verify_url: "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string(),
                timeout: 5,
            },
            persistence: PersistenceConfig {
                sheet_webhook_url: "https://sheets.example.com/exec".to_string(),
                timeout: 2,
                retry_delay_ms: 10,
            },
            rate_limit: RateLimitConfig::default(),
            catalog_path: None,
        }
    }
}

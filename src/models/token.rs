// 一次性令牌模型

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// 令牌有效期 (分钟)
pub const TOKEN_TTL_MINUTES: i64 = 5;

/// 一次性令牌
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeToken {
    /// 令牌值
    #[serde(rename = "token")]
    pub value: String,
    /// 用途 (如 "csrf")
    pub purpose: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 是否已被使用
    #[serde(skip)]
    pub consumed: bool,
}

impl OneTimeToken {
    pub fn new(value: String, purpose: &str, issued_at: DateTime<Utc>) -> Self {
        Self {
            value,
            purpose: purpose.to_string(),
            issued_at,
            expires_at: issued_at + Duration::minutes(TOKEN_TTL_MINUTES),
            consumed: false,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

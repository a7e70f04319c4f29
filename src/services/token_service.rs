// 一次性令牌服务
// 令牌签发后5分钟内有效，且只能使用一次

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::models::OneTimeToken;
use crate::utils::crypto::{generate_random_string, ALPHANUMERIC};

/// 令牌长度
const TOKEN_LENGTH: usize = 32;

/// 防伪令牌用途
pub const CSRF_PURPOSE: &str = "csrf";

/// 一次性令牌服务
#[derive(Debug, Default)]
pub struct TokenService {
    tokens: Mutex<HashMap<String, OneTimeToken>>,
}

impl TokenService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 签发令牌
    pub async fn issue(&self, purpose: &str) -> OneTimeToken {
        self.issue_at(purpose, Utc::now()).await
    }

    pub async fn issue_at(&self, purpose: &str, now: DateTime<Utc>) -> OneTimeToken {
        let mut tokens = self.tokens.lock().await;
        tokens.retain(|_, token| !token.is_expired_at(now));

        let token = OneTimeToken::new(generate_random_string(TOKEN_LENGTH, ALPHANUMERIC), purpose, now);
        tokens.insert(token.value.clone(), token.clone());
        token
    }

    /// 使用令牌
    pub async fn consume(&self, value: &str, purpose: &str) -> Result<(), AppError> {
        self.consume_at(value, purpose, Utc::now()).await
    }

    /// 使用令牌
    ///
    /// # Returns
    /// * 令牌不存在或用途不符返回 `TokenInvalid`，已使用返回 `TokenConsumed`，
    ///   已过期返回 `TokenExpired`
    pub async fn consume_at(
        &self,
        value: &str,
        purpose: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tokens = self.tokens.lock().await;
        let token = tokens
            .get_mut(value)
            .filter(|token| token.purpose == purpose)
            .ok_or(AppError::TokenInvalid)?;

        if token.consumed {
            return Err(AppError::TokenConsumed);
        }
        if token.is_expired_at(now) {
            return Err(AppError::TokenExpired);
        }
        token.consumed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_token_consumed_once() {
        let service = TokenService::new();
        let token = service.issue(CSRF_PURPOSE).await;
        assert_eq!(token.value.len(), TOKEN_LENGTH);

        service.consume(&token.value, CSRF_PURPOSE).await.unwrap();
        assert!(matches!(
            service.consume(&token.value, CSRF_PURPOSE).await,
            Err(AppError::TokenConsumed)
        ));
    }

    #[tokio::test]
    async fn test_token_expires_after_five_minutes() {
        let service = TokenService::new();
        let issued = Utc::now();
        let token = service.issue_at(CSRF_PURPOSE, issued).await;

        let late = issued + Duration::minutes(5);
        assert!(matches!(
            service.consume_at(&token.value, CSRF_PURPOSE, late).await,
            Err(AppError::TokenExpired)
        ));

        let token = service.issue_at(CSRF_PURPOSE, issued).await;
        let in_time = issued + Duration::minutes(4);
        assert!(service.consume_at(&token.value, CSRF_PURPOSE, in_time).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_purpose_or_unknown_is_invalid() {
        let service = TokenService::new();
        let token = service.issue("checkout").await;
        assert!(matches!(
            service.consume(&token.value, CSRF_PURPOSE).await,
            Err(AppError::TokenInvalid)
        ));
        assert!(matches!(
            service.consume("unknown", CSRF_PURPOSE).await,
            Err(AppError::TokenInvalid)
        ));
    }
}

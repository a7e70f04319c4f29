// 错误类型定义
// 支付请求构建、Webhook验证、订单对账等流程共用的错误分类

use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::config::Environment;
use crate::services::anti_abuse::RouteClass;
use crate::utils::crypto::CodecError;

/// 应用错误
#[derive(Debug, Error)]
pub enum AppError {
    /// 商品不存在
    #[error("product not found: {0}")]
    NotFound(String),

    /// 已启用人机验证但未提供验证令牌
    #[error("human verification token is required")]
    VerificationRequired,

    /// 人机验证未通过
    #[error("human verification failed: {0}")]
    VerificationFailed(String),

    /// 超出请求额度
    #[error("rate limit exceeded for {class} traffic")]
    RateLimited { class: RouteClass, retry_after_secs: u64 },

    /// 订阅周期参数不合法
    #[error("invalid billing configuration: {0}")]
    Config(String),

    /// 签名不匹配
    #[error("gateway signature mismatch")]
    Integrity,

    /// 签名正确但载荷格式错误
    #[error("malformed gateway payload: {0}")]
    Decode(String),

    /// Webhook引用了不存在的订单
    #[error("no order for trade number {0}")]
    UnknownOrder(String),

    /// 交易编号已被其他订单使用
    #[error("duplicate trade number {0}")]
    DuplicateTradeNo(String),

    /// 订单同步到持久化服务失败
    #[error("order forward failed: {0}")]
    Persistence(String),

    #[error("token expired")]
    TokenExpired,

    #[error("token already consumed")]
    TokenConsumed,

    #[error("token invalid")]
    TokenInvalid,

    /// 请求参数错误
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// 错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl AppError {
    /// 面向调用方的提示信息
    ///
    /// 生产环境只返回不含敏感细节的通用提示，开发环境返回完整错误。
    /// 签名错误在任何环境下都不回显细节。
    pub fn public_message(&self, env: Environment) -> String {
        match self {
            AppError::RateLimited { class, .. } => class.limit_message().to_string(),
            AppError::Integrity => "Invalid request".to_string(),
            _ if env.is_development() => self.to_string(),
            AppError::NotFound(_) => "Product not found".to_string(),
            AppError::UnknownOrder(_) => "Order not found".to_string(),
            AppError::VerificationRequired => "Please complete the human verification".to_string(),
            AppError::VerificationFailed(_) => "Human verification failed, please retry".to_string(),
            AppError::TokenExpired | AppError::TokenConsumed | AppError::TokenInvalid => {
                "Session expired, please refresh the page".to_string()
            }
            AppError::InvalidRequest(_) => "Invalid request".to_string(),
            _ => "Payment service is temporarily unavailable".to_string(),
        }
    }

    /// 按运行环境生成HTTP响应
    pub fn to_response(&self, env: Environment) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let AppError::RateLimited { retry_after_secs, .. } = self {
            builder.insert_header((header::RETRY_AFTER, retry_after_secs.to_string()));
        }
        builder.json(ErrorBody {
            error: self.public_message(env),
        })
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) | AppError::UnknownOrder(_) => StatusCode::NOT_FOUND,
            AppError::VerificationRequired | AppError::InvalidRequest(_) | AppError::Decode(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Integrity => StatusCode::BAD_REQUEST,
            AppError::VerificationFailed(_)
            | AppError::TokenExpired
            | AppError::TokenConsumed
            | AppError::TokenInvalid => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::DuplicateTradeNo(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        self.to_response(Environment::Production)
    }
}

impl From<CodecError> for AppError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Integrity => AppError::Integrity,
            CodecError::Decode(msg) => AppError::Decode(msg),
            CodecError::Cipher(msg) => AppError::Internal(msg),
        }
    }
}

// 数据验证工具函数
// 在进入业务逻辑之前检查来自浏览器的标识符格式

use crate::error::AppError;

/// 商品ID最大长度
const MAX_PRODUCT_ID_LEN: usize = 64;

/// 网关允许的交易编号最大长度
const MAX_TRADE_NO_LEN: usize = 32;

/// 验证商品ID格式
///
/// # Arguments
/// * `product_id` - 商品ID (小写字母、数字、下划线、连字符)
pub fn validate_product_id(product_id: &str) -> Result<(), AppError> {
    if product_id.is_empty() {
        return Err(AppError::InvalidRequest("productID is required".to_string()));
    }

    if product_id.len() > MAX_PRODUCT_ID_LEN {
        return Err(AppError::InvalidRequest(format!(
            "productID cannot exceed {} characters",
            MAX_PRODUCT_ID_LEN
        )));
    }

    let valid = product_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid {
        return Err(AppError::InvalidRequest(
            "productID contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

/// 验证交易编号格式
pub fn validate_trade_no(trade_no: &str) -> Result<(), AppError> {
    if trade_no.is_empty() || trade_no.len() > MAX_TRADE_NO_LEN {
        return Err(AppError::InvalidRequest("invalid trade number length".to_string()));
    }

    if !trade_no.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::InvalidRequest(
            "trade number must be alphanumeric".to_string(),
        ));
    }

    Ok(())
}

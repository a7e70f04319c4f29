// 网关交易字段模型
// 每种请求类型 (单次付款、定期定额、结果通知) 各有一份固定字段顺序的结构，
// 与加密层之间通过有序的 FieldSet 交换

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::period_translator::{FType, PeriodParams};

/// 有序的网关字段集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet(Vec<(String, String)>);

impl FieldSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// 追加字段 (保持插入顺序)
    pub fn push(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.0.push((key.to_string(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 读取必填字段
    pub fn require(&self, key: &str) -> Result<&str, AppError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Decode(format!("missing field {}", key)))
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<(String, String)>> for FieldSet {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }
}

/// 单次付款交易资料
#[derive(Debug, Clone)]
pub struct OneTimeTradeInfo {
    pub mer_id: String,
    pub mer_trade_no: String,
    pub trade_amt: i64,
    pub timestamp: i64,
    pub prod_desc: String,
    pub return_url: String,
    pub notify_url: String,
}

impl OneTimeTradeInfo {
    pub fn to_fields(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        fields
            .push("MerID", self.mer_id.as_str())
            .push("MerTradeNo", self.mer_trade_no.as_str())
            .push("TradeAmt", self.trade_amt.to_string())
            .push("Timestamp", self.timestamp.to_string())
            .push("ProdDesc", self.prod_desc.as_str())
            .push("ReturnURL", self.return_url.as_str())
            .push("NotifyURL", self.notify_url.as_str());
        fields
    }
}

/// 定期定额交易资料
#[derive(Debug, Clone)]
pub struct PeriodTradeInfo {
    pub mer_id: String,
    pub mer_trade_no: String,
    pub period_amt: i64,
    pub prod_desc: String,
    pub period: PeriodParams,
    /// 首期扣款日 (仅 job 模式，格式 YYYY-MM-DD)
    pub first_date: Option<String>,
    pub return_url: String,
    pub notify_url: String,
    pub timestamp: i64,
}

impl PeriodTradeInfo {
    pub fn to_fields(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        fields
            .push("MerID", self.mer_id.as_str())
            .push("MerTradeNo", self.mer_trade_no.as_str())
            .push("PeriodAmt", self.period_amt.to_string())
            .push("ProdDesc", self.prod_desc.as_str())
            .push("PeriodType", self.period.period_type.as_str())
            .push("PeriodDate", self.period.period_date.as_str())
            .push("PeriodTimes", self.period.period_times.to_string())
            .push("FType", self.period.f_type.as_str());
        if self.period.f_type == FType::Job {
            if let Some(date) = &self.first_date {
                fields.push("FDate", date.as_str());
            }
        }
        fields
            .push("ReturnURL", self.return_url.as_str())
            .push("NotifyURL", self.notify_url.as_str())
            .push("Timestamp", self.timestamp.to_string());
        fields
    }
}

/// 付款结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failure,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Failure => "failure",
        }
    }
}

/// 网关结果通知 (解密后)
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyTradeInfo {
    pub mer_id: String,
    pub mer_trade_no: String,
    pub gateway_trade_no: Option<String>,
    pub trade_amt: Option<i64>,
    pub message: Option<String>,
    pub result: ResultStatus,
}

impl NotifyTradeInfo {
    /// 从解密字段中解析通知内容
    pub fn from_fields(fields: &FieldSet) -> Result<Self, AppError> {
        let status = fields.require("Status")?;
        let trade_amt = match fields.get("TradeAmt").filter(|v| !v.is_empty()) {
            Some(raw) => Some(
                raw.parse::<i64>()
                    .map_err(|_| AppError::Decode(format!("invalid TradeAmt {}", raw)))?,
            ),
            None => None,
        };
        let result = if status.eq_ignore_ascii_case("SUCCESS") {
            ResultStatus::Success
        } else {
            ResultStatus::Failure
        };

        Ok(Self {
            mer_id: fields.require("MerID")?.to_string(),
            mer_trade_no: fields.require("MerTradeNo")?.to_string(),
            gateway_trade_no: fields.get("TradeNo").map(str::to_string),
            trade_amt,
            message: fields.get("Message").map(str::to_string),
            result,
        })
    }
}

/// 网关回传的外层表单
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayEnvelope {
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
    #[serde(rename = "MerID", default)]
    pub mer_id: Option<String>,
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    #[serde(rename = "EncryptInfo")]
    pub encrypt_info: String,
    #[serde(rename = "HashInfo")]
    pub hash_info: String,
}

/// 送往网关的表单字段 (由前端自动提交)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayForm {
    #[serde(rename = "MerID")]
    pub mer_id: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "EncryptInfo")]
    pub encrypt_info: String,
    #[serde(rename = "HashInfo")]
    pub hash_info: String,
}

/// 结账请求
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(rename = "productID")]
    pub product_id: String,
    #[serde(rename = "turnstileToken", default)]
    pub turnstile_token: Option<String>,
}

/// 结账响应
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub pay_url: String,
    pub data: GatewayForm,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PeriodType;

    #[test]
    fn test_one_time_field_order() {
        let info = OneTimeTradeInfo {
            mer_id: "S01".into(),
            mer_trade_no: "P2401010000001ABCDEF".into(),
            trade_amt: 1200,
            timestamp: 1_700_000_000,
            prod_desc: "Starter e-book".into(),
            return_url: "https://shop/return".into(),
            notify_url: "https://shop/notify".into(),
        };
        let fields = info.to_fields();
        let keys: Vec<&str> = fields.pairs().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["MerID", "MerTradeNo", "TradeAmt", "Timestamp", "ProdDesc", "ReturnURL", "NotifyURL"]
        );
    }

    #[test]
    fn test_period_fields_include_first_date_only_for_job() {
        let mut info = PeriodTradeInfo {
            mer_id: "S01".into(),
            mer_trade_no: "S240101000000ABCDEF".into(),
            period_amt: 990,
            prod_desc: "Basic".into(),
            period: PeriodParams {
                period_type: PeriodType::Month,
                period_date: "1".into(),
                period_times: 12,
                f_type: FType::Build,
                first_charge_delay_days: 0,
            },
            first_date: Some("2024-01-08".into()),
            return_url: "https://shop/return".into(),
            notify_url: "https://shop/notify".into(),
            timestamp: 1_700_000_000,
        };
        assert_eq!(info.to_fields().get("FDate"), None);
        assert_eq!(info.to_fields().get("FType"), Some("build"));

        info.period.f_type = FType::Job;
        info.period.first_charge_delay_days = 7;
        assert_eq!(info.to_fields().get("FDate"), Some("2024-01-08"));
        assert_eq!(info.to_fields().get("FType"), Some("job"));
    }

    #[test]
    fn test_notify_requires_trade_number() {
        let mut fields = FieldSet::new();
        fields.push("Status", "SUCCESS").push("MerID", "S01");
        assert!(matches!(
            NotifyTradeInfo::from_fields(&fields),
            Err(AppError::Decode(_))
        ));

        fields.push("MerTradeNo", "P1").push("TradeAmt", "990");
        let info = NotifyTradeInfo::from_fields(&fields).unwrap();
        assert_eq!(info.result, ResultStatus::Success);
        assert_eq!(info.trade_amt, Some(990));
    }

    #[test]
    fn test_checkout_request_ignores_client_amount() {
        let req: CheckoutRequest = serde_json::from_str(
            r#"{"productID":"plan_basic","turnstileToken":"tok","amount":1}"#,
        )
        .unwrap();
        assert_eq!(req.product_id, "plan_basic");
    }
}

// 商品数据模型
// 定义单次商品与订阅方案，以及订阅的计费周期与试用期

use serde::{Deserialize, Serialize};
use std::fmt;

/// 商品
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// 商品唯一标识
    pub id: String,
    /// 商品名称 (作为网关商品描述)
    pub name: String,
    /// 商品类型
    #[serde(rename = "type")]
    pub kind: ProductKind,
    /// 价格 (最小货币单位)
    pub price: i64,
    /// 订阅计费周期 (仅订阅商品)
    #[serde(default)]
    pub period_config: Option<PeriodConfig>,
    /// 试用期
    #[serde(default)]
    pub trial: Option<Trial>,
}

/// 商品类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    OneTime,
    Subscription,
}

impl ProductKind {
    /// 交易编号前缀
    pub fn trade_prefix(&self) -> char {
        match self {
            ProductKind::OneTime => 'P',
            ProductKind::Subscription => 'S',
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductKind::OneTime => write!(f, "one_time"),
            ProductKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// 订阅计费周期
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeriodConfig {
    /// 周期单位
    pub period_type: PeriodType,
    /// 扣款日 (周: 1-7，月: 1-31，年: MMDD)
    pub period_date: String,
    /// 扣款期数
    pub period_times: i32,
    /// 首期扣款方式
    pub charge_mode: ChargeMode,
    /// 首期延迟扣款天数
    #[serde(default)]
    pub first_charge_delay_days: i32,
}

/// 周期单位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Week,
    Month,
    Year,
}

impl PeriodType {
    /// 网关参数值
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Week => "week",
            PeriodType::Month => "month",
            PeriodType::Year => "year",
        }
    }
}

/// 首期扣款方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeMode {
    /// 建立时立即扣款
    Immediate,
    /// 试用期结束后扣款
    Delayed,
}

/// 试用期
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub days: i32,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub description: String,
}

impl Product {
    pub fn is_subscription(&self) -> bool {
        self.kind == ProductKind::Subscription
    }
}

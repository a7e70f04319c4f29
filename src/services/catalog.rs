// 商品目录
// 启动时加载一次的只读商品清单，加载时校验订阅与试用期的约束

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::models::{ChargeMode, PeriodConfig, PeriodType, Product, ProductKind, Trial};
use crate::services::period_translator;

/// 商品目录
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    products: HashMap<String, Product>,
}

impl ProductCatalog {
    /// 从商品列表建立目录
    pub fn from_products(products: Vec<Product>) -> Result<Self> {
        let mut map = HashMap::with_capacity(products.len());
        for product in products {
            validate_product(&product)
                .with_context(|| format!("Invalid product {}", product.id))?;
            if map.contains_key(&product.id) {
                anyhow::bail!("Duplicate product id {}", product.id);
            }
            map.insert(product.id.clone(), product);
        }
        Ok(Self { products: map })
    }

    /// 从JSON文件加载
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read product catalog {}", path))?;
        let products: Vec<Product> =
            serde_json::from_str(&raw).context("Failed to parse product catalog")?;
        Self::from_products(products)
    }

    /// 按配置加载目录，未指定文件时使用内置商品
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_products(default_products()),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }
}

fn validate_product(product: &Product) -> Result<()> {
    if product.id.trim().is_empty() {
        anyhow::bail!("product id cannot be empty");
    }
    if product.price <= 0 {
        anyhow::bail!("price must be positive");
    }

    match (product.kind, &product.period_config) {
        (ProductKind::OneTime, None) => {
            if product.trial.is_some() {
                anyhow::bail!("one-time products cannot have a trial");
            }
        }
        (ProductKind::OneTime, Some(_)) => {
            anyhow::bail!("one-time products cannot have a period config")
        }
        (ProductKind::Subscription, None) => {
            anyhow::bail!("subscriptions require a period config")
        }
        (ProductKind::Subscription, Some(config)) => {
            if let Some(trial) = &product.trial {
                if trial.amount != 0 {
                    anyhow::bail!("trial amount must be 0");
                }
            }
            period_translator::translate(config, product.trial.as_ref())?;
        }
    }
    Ok(())
}

/// 内置商品
pub fn default_products() -> Vec<Product> {
    vec![
        Product {
            id: "plan_basic".to_string(),
            name: "Basic monthly plan".to_string(),
            kind: ProductKind::Subscription,
            price: 990,
            period_config: Some(PeriodConfig {
                period_type: PeriodType::Month,
                period_date: "1".to_string(),
                period_times: 12,
                charge_mode: ChargeMode::Immediate,
                first_charge_delay_days: 0,
            }),
            trial: None,
        },
        Product {
            id: "plan_monthly_trial".to_string(),
            name: "Monthly plan with 7-day trial".to_string(),
            kind: ProductKind::Subscription,
            price: 1490,
            period_config: Some(PeriodConfig {
                period_type: PeriodType::Month,
                period_date: "1".to_string(),
                period_times: 12,
                charge_mode: ChargeMode::Delayed,
                first_charge_delay_days: 7,
            }),
            trial: Some(Trial {
                days: 7,
                amount: 0,
                description: "7-day free trial".to_string(),
            }),
        },
        Product {
            id: "plan_yearly".to_string(),
            name: "Yearly plan".to_string(),
            kind: ProductKind::Subscription,
            price: 9900,
            period_config: Some(PeriodConfig {
                period_type: PeriodType::Year,
                period_date: "0101".to_string(),
                period_times: 3,
                charge_mode: ChargeMode::Immediate,
                first_charge_delay_days: 0,
            }),
            trial: None,
        },
        Product {
            id: "ebook_starter".to_string(),
            name: "Starter e-book".to_string(),
            kind: ProductKind::OneTime,
            price: 1200,
            period_config: None,
            trial: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = ProductCatalog::load(None).unwrap();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.get("plan_basic").unwrap().price, 990);
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut products = default_products();
        products.push(products[0].clone());
        assert!(ProductCatalog::from_products(products).is_err());
    }

    #[test]
    fn test_trial_without_delayed_charge_rejected() {
        let mut products = default_products();
        products[0].trial = Some(Trial {
            days: 7,
            amount: 0,
            description: String::new(),
        });
        assert!(ProductCatalog::from_products(products).is_err());
    }

    #[test]
    fn test_parse_json_catalog() {
        let raw = r#"[
            {"id":"plan_weekly","name":"Weekly","type":"subscription","price":300,
             "periodConfig":{"periodType":"week","periodDate":"1","periodTimes":4,
                             "chargeMode":"immediate","firstChargeDelayDays":0}},
            {"id":"sticker","name":"Sticker","type":"one_time","price":50}
        ]"#;
        let products: Vec<Product> = serde_json::from_str(raw).unwrap();
        let catalog = ProductCatalog::from_products(products).unwrap();
        assert!(catalog.get("plan_weekly").unwrap().is_subscription());
        assert_eq!(catalog.get("sticker").unwrap().kind, ProductKind::OneTime);
    }
}

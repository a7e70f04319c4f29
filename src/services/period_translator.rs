// 订阅周期转换
// 将商品的计费周期与试用期转换为网关的定期定额参数

use serde::Serialize;

use crate::error::AppError;
use crate::models::{ChargeMode, PeriodConfig, PeriodType, Trial};

/// 首期扣款模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FType {
    /// 建立后立即扣第一期
    Build,
    /// 延后指定天数才扣第一期 (试用)
    Job,
}

impl FType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FType::Build => "build",
            FType::Job => "job",
        }
    }
}

/// 网关定期定额参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodParams {
    pub period_type: PeriodType,
    pub period_date: String,
    pub period_times: i32,
    pub f_type: FType,
    pub first_charge_delay_days: i32,
}

/// 转换订阅计费条件
///
/// 无试用期时以 build 模式立即扣款；有试用期时以 job 模式延后 `trial.days` 天扣款。
/// 两者不可混用，否则试用用户会在订阅当下被扣款。
///
/// # Arguments
/// * `config` - 商品计费周期
/// * `trial` - 试用期 (可选)
///
/// # Returns
/// * 网关周期参数
pub fn translate(config: &PeriodConfig, trial: Option<&Trial>) -> Result<PeriodParams, AppError> {
    if config.period_times < 1 {
        return Err(AppError::Config(format!(
            "periodTimes must be at least 1, got {}",
            config.period_times
        )));
    }
    if config.first_charge_delay_days < 0 {
        return Err(AppError::Config(format!(
            "firstChargeDelayDays cannot be negative, got {}",
            config.first_charge_delay_days
        )));
    }
    validate_period_date(config.period_type, &config.period_date)?;

    let (f_type, first_charge_delay_days) = match trial {
        None => {
            if config.charge_mode != ChargeMode::Immediate || config.first_charge_delay_days != 0 {
                return Err(AppError::Config(
                    "subscriptions without a trial must charge immediately".to_string(),
                ));
            }
            (FType::Build, 0)
        }
        Some(trial) => {
            if trial.days <= 0 {
                return Err(AppError::Config(format!(
                    "trial days must be positive, got {}",
                    trial.days
                )));
            }
            if config.charge_mode != ChargeMode::Delayed
                || config.first_charge_delay_days != trial.days
            {
                return Err(AppError::Config(format!(
                    "trial of {} days requires a delayed first charge of the same length",
                    trial.days
                )));
            }
            (FType::Job, trial.days)
        }
    };

    Ok(PeriodParams {
        period_type: config.period_type,
        period_date: config.period_date.clone(),
        period_times: config.period_times,
        f_type,
        first_charge_delay_days,
    })
}

fn validate_period_date(period_type: PeriodType, date: &str) -> Result<(), AppError> {
    let invalid = || {
        AppError::Config(format!(
            "periodDate {:?} is invalid for {} billing",
            date,
            period_type.as_str()
        ))
    };

    match period_type {
        PeriodType::Week => match date.parse::<u32>() {
            Ok(day) if (1..=7).contains(&day) => Ok(()),
            _ => Err(invalid()),
        },
        PeriodType::Month => match date.parse::<u32>() {
            Ok(day) if (1..=31).contains(&day) => Ok(()),
            _ => Err(invalid()),
        },
        PeriodType::Year => {
            if date.len() != 4 || !date.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            let month: u32 = date[..2].parse().map_err(|_| invalid())?;
            let day: u32 = date[2..].parse().map_err(|_| invalid())?;
            if (1..=12).contains(&month) && (1..=31).contains(&day) {
                Ok(())
            } else {
                Err(invalid())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monthly(charge_mode: ChargeMode, delay: i32) -> PeriodConfig {
        PeriodConfig {
            period_type: PeriodType::Month,
            period_date: "1".to_string(),
            period_times: 12,
            charge_mode,
            first_charge_delay_days: delay,
        }
    }

    fn trial(days: i32) -> Trial {
        Trial {
            days,
            amount: 0,
            description: format!("{}天免费试用", days),
        }
    }

    #[test]
    fn test_no_trial_translates_to_build() {
        let params = translate(&monthly(ChargeMode::Immediate, 0), None).unwrap();
        assert_eq!(params.f_type, FType::Build);
        assert_eq!(params.first_charge_delay_days, 0);
        assert_eq!(params.period_times, 12);
    }

    #[test]
    fn test_seven_day_trial_translates_to_job() {
        let trial = trial(7);
        let params = translate(&monthly(ChargeMode::Delayed, 7), Some(&trial)).unwrap();
        assert_eq!(params.f_type, FType::Job);
        assert_eq!(params.first_charge_delay_days, 7);
    }

    #[test]
    fn test_zero_period_times_rejected() {
        let mut config = monthly(ChargeMode::Immediate, 0);
        config.period_times = 0;
        assert!(matches!(translate(&config, None), Err(AppError::Config(_))));
    }

    #[test]
    fn test_negative_delay_rejected() {
        let config = monthly(ChargeMode::Immediate, -1);
        assert!(matches!(translate(&config, None), Err(AppError::Config(_))));
    }

    #[test]
    fn test_trial_with_immediate_charge_rejected() {
        let trial = trial(7);
        let config = monthly(ChargeMode::Immediate, 0);
        assert!(matches!(translate(&config, Some(&trial)), Err(AppError::Config(_))));
    }

    #[test]
    fn test_period_date_ranges() {
        assert!(validate_period_date(PeriodType::Week, "7").is_ok());
        assert!(validate_period_date(PeriodType::Week, "8").is_err());
        assert!(validate_period_date(PeriodType::Month, "31").is_ok());
        assert!(validate_period_date(PeriodType::Month, "0").is_err());
        assert!(validate_period_date(PeriodType::Year, "0229").is_ok());
        assert!(validate_period_date(PeriodType::Year, "1301").is_err());
        assert!(validate_period_date(PeriodType::Year, "131").is_err());
    }
}

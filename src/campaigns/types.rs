// Domain type definitions for campaign triggers

use chrono::{DateTime, Duration, Months, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cashback::AccrualRule;

/// Event category a campaign listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    NewPurchase,
    FirstPurchase,
    CashbackAccumulated,
    TotalPurchaseCount,
    TotalPurchaseValue,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::NewPurchase => "NEW_PURCHASE",
            TriggerType::FirstPurchase => "FIRST_PURCHASE",
            TriggerType::CashbackAccumulated => "CASHBACK_ACCUMULATED",
            TriggerType::TotalPurchaseCount => "TOTAL_PURCHASE_COUNT",
            TriggerType::TotalPurchaseValue => "TOTAL_PURCHASE_VALUE",
        }
    }

    /// Categories evaluated after a sale is recorded
    pub const PURCHASE_TRIGGERS: [TriggerType; 4] = [
        TriggerType::FirstPurchase,
        TriggerType::NewPurchase,
        TriggerType::TotalPurchaseCount,
        TriggerType::TotalPurchaseValue,
    ];
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "NEW_PURCHASE" => Ok(TriggerType::NewPurchase),
            "FIRST_PURCHASE" => Ok(TriggerType::FirstPurchase),
            "CASHBACK_ACCUMULATED" => Ok(TriggerType::CashbackAccumulated),
            "TOTAL_PURCHASE_COUNT" => Ok(TriggerType::TotalPurchaseCount),
            "TOTAL_PURCHASE_VALUE" => Ok(TriggerType::TotalPurchaseValue),
            _ => Err(format!("Invalid trigger type: {}", s)),
        }
    }
}

/// Calendar unit for schedule offsets and recurrence intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl std::str::FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MINUTES" => Ok(TimeUnit::Minutes),
            "HOURS" => Ok(TimeUnit::Hours),
            "DAYS" => Ok(TimeUnit::Days),
            "WEEKS" => Ok(TimeUnit::Weeks),
            "MONTHS" => Ok(TimeUnit::Months),
            "YEARS" => Ok(TimeUnit::Years),
            _ => Err(format!("Invalid time unit: {}", s)),
        }
    }
}

/// Amount of calendar time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub value: u32,
    pub unit: TimeUnit,
}

impl Period {
    pub fn new(value: u32, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// `at + self`; `None` on calendar overflow
    pub fn after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let value = self.value as i64;
        match self.unit {
            TimeUnit::Minutes => at.checked_add_signed(Duration::minutes(value)),
            TimeUnit::Hours => at.checked_add_signed(Duration::hours(value)),
            TimeUnit::Days => at.checked_add_signed(Duration::days(value)),
            TimeUnit::Weeks => at.checked_add_signed(Duration::weeks(value)),
            TimeUnit::Months => at.checked_add_months(Months::new(self.value)),
            TimeUnit::Years => at.checked_add_months(Months::new(self.value.saturating_mul(12))),
        }
    }

    /// `at - self`; `None` on calendar overflow
    pub fn before(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let value = self.value as i64;
        match self.unit {
            TimeUnit::Minutes => at.checked_sub_signed(Duration::minutes(value)),
            TimeUnit::Hours => at.checked_sub_signed(Duration::hours(value)),
            TimeUnit::Days => at.checked_sub_signed(Duration::days(value)),
            TimeUnit::Weeks => at.checked_sub_signed(Duration::weeks(value)),
            TimeUnit::Months => at.checked_sub_months(Months::new(self.value)),
            TimeUnit::Years => at.checked_sub_months(Months::new(self.value.saturating_mul(12))),
        }
    }

    /// Build from nullable value/unit columns; incomplete or negative pairs yield `None`
    pub fn from_columns(value: Option<i32>, unit: Option<&str>) -> Option<Self> {
        let value = u32::try_from(value?).ok()?;
        let unit = unit?.parse::<TimeUnit>().ok()?;
        Some(Self::new(value, unit))
    }
}

/// How often a campaign may fire for the same client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "interval", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recurrence {
    /// At most once per client, ever
    Never,

    /// Again only after the interval has passed since the last firing
    Every(Period),

    /// Every qualifying event
    Unrestricted,
}

/// Cashback generated by a campaign firing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCashback {
    /// Fixed amount or percentage of the sale value
    pub rule: AccrualRule,
    pub expiration_days: Option<i32>,
}

/// Part of the day an interaction is scheduled into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeBlock {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeBlock {
    pub fn of(at: DateTime<Utc>) -> Self {
        match at.hour() {
            6..=11 => TimeBlock::Morning,
            12..=17 => TimeBlock::Afternoon,
            18..=23 => TimeBlock::Evening,
            _ => TimeBlock::Night,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_trigger_type_from_str_accepts_dashes() {
        assert_eq!("new-purchase".parse::<TriggerType>().unwrap(), TriggerType::NewPurchase);
        assert_eq!(
            "CASHBACK_ACCUMULATED".parse::<TriggerType>().unwrap(),
            TriggerType::CashbackAccumulated
        );
        assert!("BIRTHDAY".parse::<TriggerType>().is_err());
    }

    #[test]
    fn test_period_months_are_calendar_months() {
        let at = Utc.with_ymd_and_hms(2024, 3, 31, 10, 0, 0).unwrap();
        let period = Period::new(1, TimeUnit::Months);

        assert_eq!(period.before(at), Some(Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap()));
        assert_eq!(period.after(at), Some(Utc.with_ymd_and_hms(2024, 4, 30, 10, 0, 0).unwrap()));
    }

    #[test]
    fn test_period_weeks_and_years() {
        let at = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(
            Period::new(2, TimeUnit::Weeks).before(at),
            Some(Utc.with_ymd_and_hms(2023, 12, 27, 0, 0, 0).unwrap())
        );
        assert_eq!(
            Period::new(1, TimeUnit::Years).after(at),
            Some(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_period_from_columns() {
        assert_eq!(
            Period::from_columns(Some(3), Some("days")),
            Some(Period::new(3, TimeUnit::Days))
        );
        assert_eq!(Period::from_columns(None, Some("DAYS")), None);
        assert_eq!(Period::from_columns(Some(-1), Some("DAYS")), None);
        assert_eq!(Period::from_columns(Some(1), Some("FORTNIGHTS")), None);
    }

    #[test]
    fn test_time_block_of_hour() {
        let morning = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let afternoon = Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();

        assert_eq!(TimeBlock::of(morning), TimeBlock::Morning);
        assert_eq!(TimeBlock::of(afternoon), TimeBlock::Afternoon);
        assert_eq!(TimeBlock::of(evening), TimeBlock::Evening);
        assert_eq!(TimeBlock::of(night), TimeBlock::Night);
    }
}

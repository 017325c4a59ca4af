// Trigger Evaluator
//
// Pure predicates deciding whether a campaign fires for an event, which
// campaigns win when categories overlap, and when a firing may be scheduled.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::campaigns::models::Campaign;
use crate::campaigns::types::{Recurrence, TriggerType};
use crate::cashback::{round_amount, AccrualRule};
use crate::models::NEW_CLIENTS_SEGMENT;

/// Everything the triggers look at for one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerFacts {
    pub segment: Option<String>,
    pub sale_value: Decimal,
    /// Client was created by this same event
    pub client_created: bool,
    /// Sale is the client's first valid sale
    pub first_valid_sale: bool,
    pub purchase_count_before: i32,
    pub purchase_count_after: i32,
    pub purchase_value_before: Decimal,
    pub purchase_value_after: Decimal,
    /// Cashback credited by this event
    pub accrued: Decimal,
    pub available_after: Decimal,
}

pub struct TriggerEvaluator;

impl TriggerEvaluator {
    /// Whether the event satisfies the campaign's trigger conditions
    pub fn is_eligible(campaign: &Campaign, facts: &TriggerFacts) -> bool {
        let segment = facts.segment.as_deref();

        match campaign.trigger {
            TriggerType::NewPurchase => {
                campaign
                    .min_sale_value
                    .map_or(true, |min| facts.sale_value >= min)
                    && campaign.targets_segment(segment)
            }
            TriggerType::FirstPurchase => {
                (campaign.segments.is_empty()
                    || campaign.segments.iter().any(|s| s == NEW_CLIENTS_SEGMENT))
                    && facts.first_valid_sale
                    && facts.client_created
            }
            TriggerType::CashbackAccumulated => {
                facts.accrued > Decimal::ZERO
                    && campaign
                        .min_new_cashback
                        .map_or(true, |min| facts.accrued >= min)
                    && campaign
                        .min_total_cashback
                        .map_or(true, |min| facts.available_after >= min)
                    && campaign.targets_segment(segment)
            }
            TriggerType::TotalPurchaseCount => {
                campaign.min_purchase_count.map_or(false, |threshold| {
                    crosses(facts.purchase_count_before, facts.purchase_count_after, threshold)
                }) && campaign.targets_segment_or_all(segment)
            }
            TriggerType::TotalPurchaseValue => {
                campaign.min_purchase_value.map_or(false, |threshold| {
                    crosses(facts.purchase_value_before, facts.purchase_value_after, threshold)
                }) && campaign.targets_segment_or_all(segment)
            }
        }
    }

    /// Drop NEW_PURCHASE candidates when a new client also qualifies for FIRST_PURCHASE
    pub fn apply_precedence(candidates: Vec<Campaign>, client_created: bool) -> Vec<Campaign> {
        let first_purchase_wins = client_created
            && candidates
                .iter()
                .any(|c| c.trigger == TriggerType::FirstPurchase);

        if !first_purchase_wins {
            return candidates;
        }

        candidates
            .into_iter()
            .filter(|c| c.trigger != TriggerType::NewPurchase)
            .collect()
    }

    /// Frequency cap against the client's last interaction with this campaign
    pub fn can_schedule(
        last_interaction: Option<DateTime<Utc>>,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(last) = last_interaction else {
            return true;
        };

        match campaign.recurrence {
            Recurrence::Never => false,
            Recurrence::Every(interval) => match interval.before(now) {
                Some(window_start) => last < window_start,
                None => false,
            },
            Recurrence::Unrestricted => true,
        }
    }

    /// When the outreach should go out; `None` when the offset overflows the calendar
    pub fn schedule_for(campaign: &Campaign, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match campaign.schedule_offset {
            Some(offset) if !offset.is_zero() => offset.after(now),
            _ => Some(now),
        }
    }

    /// Cashback a firing generates on a sale
    pub fn campaign_cashback(campaign: &Campaign, sale_value: Decimal) -> Decimal {
        match campaign.cashback.map(|c| c.rule) {
            Some(AccrualRule::Fixed(value)) => round_amount(value),
            Some(AccrualRule::Percentage(value)) => round_amount(sale_value * value / Decimal::ONE_HUNDRED),
            Some(AccrualRule::Unsupported) | None => Decimal::ZERO,
        }
    }
}

/// `previous < threshold <= current`
fn crosses<T: PartialOrd>(previous: T, current: T, threshold: T) -> bool {
    previous < threshold && threshold <= current
}



#[cfg(test)]
mod property_tests {
    use super::test_support::campaign;
    use super::*;
    use crate::campaigns::types::{Period, TimeUnit};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    proptest! {
        /// A recurring campaign never fires twice for a client inside its interval
        #[test]
        fn prop_frequency_cap(
            interval_days in 1u32..=365,
            elapsed_minutes in 0i64..=(400 * 24 * 60),
        ) {
            let mut c = campaign(TriggerType::NewPurchase);
            c.recurrence = Recurrence::Every(Period::new(interval_days, TimeUnit::Days));

            let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
            let last = now - Duration::minutes(elapsed_minutes);
            let allowed = TriggerEvaluator::can_schedule(Some(last), &c, now);

            prop_assert_eq!(allowed, elapsed_minutes > interval_days as i64 * 24 * 60);
        }

        /// Count thresholds fire exactly once while the counter climbs
        #[test]
        fn prop_count_threshold_fires_once(threshold in 1i32..=50, purchases in 1i32..=100) {
            let mut c = campaign(TriggerType::TotalPurchaseCount);
            c.min_purchase_count = Some(threshold);

            let firings = (0..purchases)
                .filter(|before| {
                    let facts = TriggerFacts {
                        purchase_count_before: *before,
                        purchase_count_after: before + 1,
                        ..TriggerFacts::default()
                    };
                    TriggerEvaluator::is_eligible(&c, &facts)
                })
                .count();

            prop_assert_eq!(firings, if purchases >= threshold { 1 } else { 0 });
        }
    }
}

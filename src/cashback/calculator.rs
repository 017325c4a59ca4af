use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::cashback::error::{LedgerError, LedgerResult};
use crate::cashback::models::{CashbackBalance, CashbackProgram, EntryTransition, LedgerEntry};
use crate::cashback::types::{
    round_amount, AccrualRule, RedemptionLimit, StatusReason, TransactionStatus, TransactionType,
};

/// Result of applying one amount to a balance
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceMutation {
    pub balance: CashbackBalance,
    /// Amount actually moved; lower than requested when a deduction was clamped
    pub amount: Decimal,
    pub before: Decimal,
    pub after: Decimal,
    /// Part of the requested deduction that could not be taken
    pub shortfall: Decimal,
}

impl BalanceMutation {
    fn new(balance: CashbackBalance, amount: Decimal, before: Decimal, shortfall: Decimal) -> Self {
        let after = balance.available;
        Self {
            balance,
            amount,
            before,
            after,
            shortfall,
        }
    }
}

/// Pure cashback arithmetic
pub struct CashbackCalculator;

impl CashbackCalculator {
    /// Cashback earned on a sale
    ///
    /// Zero below the program minimum, regardless of the accrual rule.
    pub fn compute_accrual(sale_value: Decimal, program: &CashbackProgram) -> Decimal {
        if sale_value < program.min_sale_value {
            return Decimal::ZERO;
        }

        match program.accrual {
            AccrualRule::Fixed(value) => round_amount(value),
            AccrualRule::Percentage(value) => round_amount(sale_value * value / Decimal::ONE_HUNDRED),
            AccrualRule::Unsupported => Decimal::ZERO,
        }
    }

    /// Cashback credited to a referral partner on the same sale
    pub fn compute_partner_accrual(sale_value: Decimal, program: &CashbackProgram) -> Decimal {
        if sale_value < program.min_sale_value {
            return Decimal::ZERO;
        }

        program
            .partner_accrual_rate
            .map(|rate| round_amount(sale_value * rate / Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO)
    }

    /// Largest amount the client may redeem on this sale
    pub fn compute_max_redeemable(
        available: Decimal,
        sale_value: Decimal,
        limit: &RedemptionLimit,
    ) -> Decimal {
        available
            .min(sale_value)
            .min(limit.limit_for(sale_value))
            .max(Decimal::ZERO)
    }

    /// Credit `amount` to the balance
    pub fn apply_accrual(
        balance: &CashbackBalance,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> LedgerResult<BalanceMutation> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let before = balance.available;
        let mut next = balance.clone();
        next.available += amount;
        next.accumulated_total += amount;
        next.updated_at = now;

        Ok(BalanceMutation::new(next, amount, before, Decimal::ZERO))
    }

    /// Debit `amount` from the balance to discount a sale
    ///
    /// The program limit is checked before the available balance.
    pub fn apply_redemption(
        balance: &CashbackBalance,
        amount: Decimal,
        sale_value: Decimal,
        limit: &RedemptionLimit,
        now: DateTime<Utc>,
    ) -> LedgerResult<BalanceMutation> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let limit_by_config = sale_value.min(limit.limit_for(sale_value));
        if amount > limit_by_config {
            return Err(LedgerError::RedemptionLimitExceeded {
                requested: amount,
                limit: limit_by_config,
            });
        }

        if amount > balance.available {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: balance.available,
            });
        }

        let before = balance.available;
        let mut next = balance.clone();
        next.available -= amount;
        next.redeemed_total += amount;
        next.updated_at = now;

        Ok(BalanceMutation::new(next, amount, before, Decimal::ZERO))
    }

    /// Take back an accrual whose sale was cancelled
    ///
    /// Clamps at zero; whatever could not be taken is reported as shortfall.
    pub fn apply_accrual_reversal(
        balance: &CashbackBalance,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> BalanceMutation {
        let before = balance.available;
        let deducted = amount.min(balance.available).max(Decimal::ZERO);

        let mut next = balance.clone();
        next.available -= deducted;
        next.accumulated_total -= deducted;
        next.updated_at = now;

        BalanceMutation::new(next, deducted, before, amount - deducted)
    }

    /// Give back a redemption whose sale was cancelled
    pub fn apply_redemption_reversal(
        balance: &CashbackBalance,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> BalanceMutation {
        let before = balance.available;
        let mut next = balance.clone();
        next.available += amount;
        next.redeemed_total -= amount;
        next.updated_at = now;

        BalanceMutation::new(next, amount, before, Decimal::ZERO)
    }

    /// Expire what is left of a grant
    pub fn apply_expiration(
        balance: &CashbackBalance,
        remaining: Decimal,
        now: DateTime<Utc>,
    ) -> BalanceMutation {
        let before = balance.available;
        let expired = remaining.min(balance.available).max(Decimal::ZERO);

        let mut next = balance.clone();
        next.available -= expired;
        next.expired_total += expired;
        next.updated_at = now;

        BalanceMutation::new(next, expired, before, remaining - expired)
    }

    /// Decide which accrual grants a redemption consumes
    ///
    /// Earliest expiration first, grants without expiration last, ties by sequence.
    pub fn allocate_redemption(grants: &[LedgerEntry], amount: Decimal) -> Vec<EntryTransition> {
        let mut ordered: Vec<&LedgerEntry> = grants
            .iter()
            .filter(|g| {
                g.transaction_type == TransactionType::Accrual && g.status == TransactionStatus::Active
            })
            .collect();
        ordered.sort_by_key(|g| (g.expires_at.is_none(), g.expires_at, g.sequence));

        let mut left = amount;
        let mut transitions = Vec::new();

        for grant in ordered {
            if left <= Decimal::ZERO {
                break;
            }

            let remaining = grant.remaining.unwrap_or(grant.amount);
            if remaining <= Decimal::ZERO {
                continue;
            }

            let taken = remaining.min(left);
            left -= taken;
            let new_remaining = remaining - taken;

            transitions.push(if new_remaining.is_zero() {
                EntryTransition {
                    entry_id: grant.id,
                    status: TransactionStatus::Consumed,
                    status_reason: Some(StatusReason::Redemption),
                    remaining: Some(Decimal::ZERO),
                }
            } else {
                EntryTransition {
                    entry_id: grant.id,
                    status: TransactionStatus::Active,
                    status_reason: None,
                    remaining: Some(new_remaining),
                }
            });
        }

        transitions
    }

    /// Rebuild the available balance from a client's ledger
    ///
    /// Fails on the first entry whose snapshots do not chain.
    pub fn replay(entries: &[LedgerEntry]) -> LedgerResult<Decimal> {
        let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
        ordered.sort_by_key(|e| e.sequence);

        let mut running = Decimal::ZERO;
        for entry in ordered {
            if entry.balance_before != running {
                return Err(LedgerError::ReplayMismatch {
                    sequence: entry.sequence,
                    reason: format!("expected before {}, found {}", running, entry.balance_before),
                });
            }

            let chained = match entry.transaction_type {
                TransactionType::Accrual => entry.balance_after == entry.balance_before + entry.amount,
                TransactionType::Redemption | TransactionType::Expiration => {
                    entry.balance_after == entry.balance_before - entry.amount
                }
                TransactionType::Cancellation => {
                    (entry.balance_after - entry.balance_before).abs() == entry.amount
                }
            };

            if !chained {
                return Err(LedgerError::ReplayMismatch {
                    sequence: entry.sequence,
                    reason: format!(
                        "{} of {} does not move {} to {}",
                        entry.transaction_type, entry.amount, entry.balance_before, entry.balance_after
                    ),
                });
            }

            running = entry.balance_after;
        }

        Ok(running)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use uuid::Uuid;

    pub fn program(accrual: AccrualRule, min_sale_value: Decimal) -> CashbackProgram {
        CashbackProgram {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            active: true,
            accrual,
            partner_accrual_rate: None,
            min_sale_value,
            accrue_via_integration: true,
            accrue_via_point_of_interaction: true,
            expiration_days: None,
            redemption_limit: RedemptionLimit::Unlimited,
            discount_mode_enabled: true,
            reward_mode_enabled: false,
        }
    }

    pub fn balance(available: Decimal) -> CashbackBalance {
        let mut balance = CashbackBalance::zero(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        balance.available = available;
        balance.accumulated_total = available;
        balance
    }

    pub fn grant(sequence: i64, amount: Decimal, expires_in_days: Option<i64>) -> LedgerEntry {
        let now = Utc::now();
        LedgerEntry {
            id: Uuid::new_v4(),
            sequence,
            organization_id: Uuid::nil(),
            client_id: Uuid::nil(),
            program_id: Uuid::nil(),
            transaction_type: TransactionType::Accrual,
            status: TransactionStatus::Active,
            status_reason: None,
            amount,
            remaining: Some(amount),
            balance_before: Decimal::ZERO,
            balance_after: amount,
            sale_id: None,
            campaign_id: None,
            reverses_transaction_id: None,
            operator_id: None,
            expires_at: expires_in_days.map(|d| now + chrono::Duration::days(d)),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fixed_accrual() {
        let program = program(AccrualRule::Fixed(dec!(10)), dec!(0));
        assert_eq!(CashbackCalculator::compute_accrual(dec!(100), &program), dec!(10));
    }

    #[test]
    fn test_percentage_accrual() {
        let program = program(AccrualRule::Percentage(dec!(10)), dec!(0));
        assert_eq!(CashbackCalculator::compute_accrual(dec!(100), &program), dec!(10));
        assert_eq!(CashbackCalculator::compute_accrual(dec!(45.55), &program), dec!(4.56));
    }

    #[test]
    fn test_accrual_below_minimum_is_zero() {
        let program = program(AccrualRule::Fixed(dec!(10)), dec!(50));
        assert_eq!(CashbackCalculator::compute_accrual(dec!(49.99), &program), Decimal::ZERO);
        assert_eq!(CashbackCalculator::compute_accrual(dec!(50), &program), dec!(10));
    }

    #[test]
    fn test_unsupported_accrual_is_zero() {
        let program = program(AccrualRule::Unsupported, dec!(0));
        assert_eq!(CashbackCalculator::compute_accrual(dec!(100), &program), Decimal::ZERO);
    }

    #[test]
    fn test_partner_accrual_uses_partner_rate() {
        let mut program = program(AccrualRule::Fixed(dec!(10)), dec!(20));
        assert_eq!(CashbackCalculator::compute_partner_accrual(dec!(100), &program), Decimal::ZERO);

        program.partner_accrual_rate = Some(dec!(2.5));
        assert_eq!(CashbackCalculator::compute_partner_accrual(dec!(100), &program), dec!(2.5));
        assert_eq!(CashbackCalculator::compute_partner_accrual(dec!(10), &program), Decimal::ZERO);
    }

    #[test]
    fn test_max_redeemable() {
        assert_eq!(
            CashbackCalculator::compute_max_redeemable(dec!(50), dec!(100), &RedemptionLimit::Unlimited),
            dec!(50)
        );
        assert_eq!(
            CashbackCalculator::compute_max_redeemable(dec!(500), dec!(100), &RedemptionLimit::Unlimited),
            dec!(100)
        );
        assert_eq!(
            CashbackCalculator::compute_max_redeemable(
                dec!(50),
                dec!(100),
                &RedemptionLimit::Percentage(dec!(20))
            ),
            dec!(20)
        );
        assert_eq!(
            CashbackCalculator::compute_max_redeemable(dec!(50), dec!(100), &RedemptionLimit::Fixed(dec!(5))),
            dec!(5)
        );
    }

    #[test]
    fn test_apply_accrual_snapshots() {
        let balance = balance(dec!(0));
        let mutation = CashbackCalculator::apply_accrual(&balance, dec!(10), Utc::now()).unwrap();

        assert_eq!(mutation.before, dec!(0));
        assert_eq!(mutation.after, dec!(10));
        assert_eq!(mutation.balance.available, dec!(10));
        assert_eq!(mutation.balance.accumulated_total, dec!(10));
        assert!(mutation.balance.is_consistent());
    }

    #[test]
    fn test_apply_accrual_rejects_zero() {
        let balance = balance(dec!(0));
        let result = CashbackCalculator::apply_accrual(&balance, dec!(0), Utc::now());
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_redemption_limit_checked_before_balance() {
        let balance = balance(dec!(50));
        let result = CashbackCalculator::apply_redemption(
            &balance,
            dec!(30),
            dec!(100),
            &RedemptionLimit::Percentage(dec!(20)),
            Utc::now(),
        );

        match result {
            Err(LedgerError::RedemptionLimitExceeded { requested, limit }) => {
                assert_eq!(requested, dec!(30));
                assert_eq!(limit, dec!(20));
            }
            other => panic!("expected RedemptionLimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_redemption_insufficient_balance() {
        let balance = balance(dec!(10));
        let result = CashbackCalculator::apply_redemption(
            &balance,
            dec!(20),
            dec!(100),
            &RedemptionLimit::Unlimited,
            Utc::now(),
        );
        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
    }

    #[test]
    fn test_redemption_cannot_exceed_sale_value() {
        let balance = balance(dec!(500));
        let result = CashbackCalculator::apply_redemption(
            &balance,
            dec!(150),
            dec!(100),
            &RedemptionLimit::Unlimited,
            Utc::now(),
        );
        assert!(matches!(result, Err(LedgerError::RedemptionLimitExceeded { .. })));
    }

    #[test]
    fn test_apply_redemption_snapshots() {
        let balance = balance(dec!(50));
        let mutation = CashbackCalculator::apply_redemption(
            &balance,
            dec!(20),
            dec!(100),
            &RedemptionLimit::Unlimited,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(mutation.before, dec!(50));
        assert_eq!(mutation.after, dec!(30));
        assert_eq!(mutation.balance.redeemed_total, dec!(20));
        assert!(mutation.balance.is_consistent());
    }

    #[test]
    fn test_accrual_reversal_clamps_at_zero() {
        let mut balance = balance(dec!(15));
        balance.redeemed_total = dec!(10);
        balance.accumulated_total = dec!(25);
        balance.available = dec!(15);

        let mutation = CashbackCalculator::apply_accrual_reversal(&balance, dec!(20), Utc::now());

        assert_eq!(mutation.amount, dec!(15));
        assert_eq!(mutation.shortfall, dec!(5));
        assert_eq!(mutation.balance.available, dec!(0));
        assert!(mutation.balance.is_consistent());
    }

    #[test]
    fn test_redemption_reversal_recredits() {
        let mut balance = balance(dec!(30));
        balance.accumulated_total = dec!(50);
        balance.redeemed_total = dec!(20);

        let mutation = CashbackCalculator::apply_redemption_reversal(&balance, dec!(20), Utc::now());

        assert_eq!(mutation.balance.available, dec!(50));
        assert_eq!(mutation.balance.redeemed_total, dec!(0));
        assert!(mutation.balance.is_consistent());
    }

    #[test]
    fn test_expiration_moves_to_expired_total() {
        let balance = balance(dec!(30));
        let mutation = CashbackCalculator::apply_expiration(&balance, dec!(12), Utc::now());

        assert_eq!(mutation.balance.available, dec!(18));
        assert_eq!(mutation.balance.expired_total, dec!(12));
        assert_eq!(mutation.shortfall, dec!(0));
        assert!(mutation.balance.is_consistent());
    }

    #[test]
    fn test_allocate_redemption_earliest_expiration_first() {
        let late = grant(1, dec!(10), Some(30));
        let never = grant(2, dec!(10), None);
        let soon = grant(3, dec!(10), Some(5));

        let transitions =
            CashbackCalculator::allocate_redemption(&[late.clone(), never.clone(), soon.clone()], dec!(15));

        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].entry_id, soon.id);
        assert_eq!(transitions[0].status, TransactionStatus::Consumed);
        assert_eq!(transitions[0].remaining, Some(dec!(0)));
        assert_eq!(transitions[1].entry_id, late.id);
        assert_eq!(transitions[1].status, TransactionStatus::Active);
        assert_eq!(transitions[1].remaining, Some(dec!(5)));
    }

    #[test]
    fn test_allocate_redemption_skips_consumed_grants() {
        let mut used = grant(1, dec!(10), None);
        used.status = TransactionStatus::Consumed;
        used.remaining = Some(dec!(0));
        let open = grant(2, dec!(10), None);

        let transitions = CashbackCalculator::allocate_redemption(&[used, open.clone()], dec!(4));

        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].entry_id, open.id);
        assert_eq!(transitions[0].remaining, Some(dec!(6)));
    }

    #[test]
    fn test_replay_detects_broken_chain() {
        let first = grant(1, dec!(10), None);
        let mut second = grant(2, dec!(5), None);
        second.balance_before = dec!(9);
        second.balance_after = dec!(14);

        let result = CashbackCalculator::replay(&[first, second]);
        assert!(matches!(result, Err(LedgerError::ReplayMismatch { sequence: 2, .. })));
    }
}

#[cfg(test)]
mod property_tests {
    use super::test_support::*;
    use super::*;
    use proptest::prelude::*;

    fn cents(value: u32) -> Decimal {
        Decimal::new(value as i64, 2)
    }

    #[derive(Debug, Clone)]
    enum Op {
        Accrue(u32),
        Redeem(u32),
        ReverseAccrual(u32),
        ReverseRedemption,
        Expire(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..=100_000).prop_map(Op::Accrue),
            (1u32..=100_000).prop_map(Op::Redeem),
            (1u32..=100_000).prop_map(Op::ReverseAccrual),
            Just(Op::ReverseRedemption),
            (1u32..=100_000).prop_map(Op::Expire),
        ]
    }

    proptest! {
        /// available = accumulated - redeemed - expired and available >= 0 after every operation
        #[test]
        fn prop_balance_invariant(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let mut balance = balance(Decimal::ZERO);
            let mut redemptions: Vec<Decimal> = Vec::new();
            let now = Utc::now();

            for op in ops {
                balance = match op {
                    Op::Accrue(c) => CashbackCalculator::apply_accrual(&balance, cents(c), now).unwrap().balance,
                    Op::Redeem(c) => {
                        match CashbackCalculator::apply_redemption(
                            &balance, cents(c), Decimal::from(10_000), &RedemptionLimit::Unlimited, now,
                        ) {
                            Ok(m) => {
                                redemptions.push(m.amount);
                                m.balance
                            }
                            Err(_) => balance,
                        }
                    }
                    Op::ReverseAccrual(c) => CashbackCalculator::apply_accrual_reversal(&balance, cents(c), now).balance,
                    Op::ReverseRedemption => match redemptions.pop() {
                        Some(amount) => CashbackCalculator::apply_redemption_reversal(&balance, amount, now).balance,
                        None => balance,
                    },
                    Op::Expire(c) => CashbackCalculator::apply_expiration(&balance, cents(c), now).balance,
                };

                prop_assert!(balance.is_consistent(), "inconsistent balance: {:?}", balance);
            }
        }

        /// Redemption cap never exceeds min(available, sale) nor the percentage limit
        #[test]
        fn prop_redemption_cap(
            available in 0u32..=1_000_000,
            sale in 1u32..=1_000_000,
            percent in 0u32..=100,
        ) {
            let limit = RedemptionLimit::Percentage(Decimal::from(percent));
            let cap = CashbackCalculator::compute_max_redeemable(cents(available), cents(sale), &limit);

            prop_assert!(cap <= cents(available).min(cents(sale)));
            prop_assert!(cap <= round_amount(cents(sale) * Decimal::from(percent) / Decimal::ONE_HUNDRED));
            prop_assert!(cap >= Decimal::ZERO);
        }

        /// Sales below the minimum never accrue
        #[test]
        fn prop_accrual_threshold(
            min in 1u32..=1_000_000,
            below in 1u32..=1_000_000,
            fixed in any::<bool>(),
            value in 1u32..=10_000,
        ) {
            let rule = if fixed {
                AccrualRule::Fixed(cents(value))
            } else {
                AccrualRule::Percentage(Decimal::from(value % 100 + 1))
            };
            let program = program(rule, cents(min));
            let sale = cents(min) - cents(below.min(min));

            prop_assert_eq!(CashbackCalculator::compute_accrual(sale, &program), Decimal::ZERO);
        }
    }
}

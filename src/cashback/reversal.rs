// Reversal Handler
//
// Compensates the ledger entries of a sale that was cancelled upstream.
// Accruals are taken back even when a redemption already consumed the grant;
// the deduction is clamped at zero and the rest recorded as a discrepancy.
// Redemptions are given back. Each compensation appends a CANCELLATION entry
// so the ledger still replays.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::cashback::cache::BalanceCache;
use crate::cashback::calculator::{BalanceMutation, CashbackCalculator};
use crate::cashback::error::LedgerResult;
use crate::cashback::models::{EntryTransition, LedgerEntry, NewDiscrepancy, NewLedgerEntry};
use crate::cashback::types::{StatusReason, TransactionStatus, TransactionType};
use crate::models::Sale;
use crate::store::UnitOfWork;

/// What a sale reversal did to the ledger
#[derive(Debug, Clone, Default)]
pub struct ReversalOutcome {
    /// CANCELLATION entries appended
    pub compensations: Vec<LedgerEntry>,
    /// Cashback taken back from accruals
    pub accruals_reversed: Decimal,
    /// Cashback given back from redemptions
    pub redemptions_reversed: Decimal,
    /// Accrued cashback that could not be taken back
    pub shortfall: Decimal,
}

pub struct ReversalHandler;

impl ReversalHandler {
    /// Reverse every accrual and redemption linked to the sale not yet compensated
    pub async fn reverse_sale(
        uow: &mut dyn UnitOfWork,
        cache: &mut BalanceCache,
        sale: &Sale,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReversalOutcome> {
        let entries = uow.reversible_entries_for_sale(sale.id).await?;
        let mut outcome = ReversalOutcome::default();

        for entry in entries {
            if entry.program_id != cache.program_id() {
                tracing::warn!(
                    entry_id = %entry.id,
                    program_id = %entry.program_id,
                    "Skipping reversal of entry from another program"
                );
                continue;
            }

            let balance = cache.ensure_entry(uow, entry.client_id, now).await?;
            let mutation = match entry.transaction_type {
                TransactionType::Accrual => {
                    let mutation = CashbackCalculator::apply_accrual_reversal(&balance, entry.amount, now);
                    outcome.accruals_reversed += mutation.amount;
                    mutation
                }
                TransactionType::Redemption => {
                    let mutation = CashbackCalculator::apply_redemption_reversal(&balance, entry.amount, now);
                    outcome.redemptions_reversed += mutation.amount;
                    mutation
                }
                _ => continue,
            };

            cache.store(uow, mutation.balance.clone()).await?;
            uow.transition_entry(&EntryTransition {
                entry_id: entry.id,
                status: TransactionStatus::Consumed,
                status_reason: Some(StatusReason::Cancellation),
                remaining: entry.remaining.map(|_| Decimal::ZERO),
            })
            .await?;

            if mutation.amount > Decimal::ZERO {
                let compensation = uow.append_entry(&compensation_entry(&entry, &mutation)).await?;
                outcome.compensations.push(compensation);
            }

            if mutation.shortfall > Decimal::ZERO {
                tracing::warn!(
                    sale_id = %sale.id,
                    client_id = %entry.client_id,
                    shortfall = %mutation.shortfall,
                    "Accrual reversal clamped at zero balance"
                );
                uow.record_discrepancy(&NewDiscrepancy {
                    organization_id: sale.organization_id,
                    client_id: entry.client_id,
                    sale_id: Some(sale.id),
                    transaction_id: Some(entry.id),
                    shortfall: mutation.shortfall,
                    reason: StatusReason::Cancellation,
                })
                .await?;
                outcome.shortfall += mutation.shortfall;
            }
        }

        tracing::info!(
            sale_id = %sale.id,
            accruals_reversed = %outcome.accruals_reversed,
            redemptions_reversed = %outcome.redemptions_reversed,
            "Sale reversed"
        );

        Ok(outcome)
    }
}

fn compensation_entry(reversed: &LedgerEntry, mutation: &BalanceMutation) -> NewLedgerEntry {
    NewLedgerEntry {
        organization_id: reversed.organization_id,
        client_id: reversed.client_id,
        program_id: reversed.program_id,
        transaction_type: TransactionType::Cancellation,
        amount: mutation.amount,
        remaining: None,
        balance_before: mutation.before,
        balance_after: mutation.after,
        sale_id: reversed.sale_id,
        campaign_id: reversed.campaign_id,
        reverses_transaction_id: Some(reversed.id),
        operator_id: reversed.operator_id,
        expires_at: None,
    }
}

// Expiration Sweep
//
// Expires what is left of accrual grants past their expiration date.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cashback::cache::BalanceCache;
use crate::cashback::calculator::CashbackCalculator;
use crate::cashback::error::LedgerResult;
use crate::cashback::models::{EntryTransition, NewDiscrepancy, NewLedgerEntry};
use crate::cashback::types::{StatusReason, TransactionStatus, TransactionType};
use crate::store::{CashbackStore, UnitOfWork};

/// Totals of one sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepSummary {
    pub expired_grants: usize,
    pub expired_amount: Decimal,
    pub shortfall: Decimal,
}

pub struct ExpirationSweep;

impl ExpirationSweep {
    /// Expire due grants of an organization inside an open unit of work
    pub async fn run(
        uow: &mut dyn UnitOfWork,
        cache: &mut BalanceCache,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> LedgerResult<SweepSummary> {
        let grants = uow.due_grants(organization_id, now).await?;
        let mut summary = SweepSummary::default();

        for grant in grants {
            if grant.program_id != cache.program_id() {
                continue;
            }

            let remaining = grant.remaining.unwrap_or(grant.amount);
            let balance = cache.ensure_entry(uow, grant.client_id, now).await?;
            let mutation = CashbackCalculator::apply_expiration(&balance, remaining, now);

            cache.store(uow, mutation.balance.clone()).await?;
            uow.transition_entry(&EntryTransition {
                entry_id: grant.id,
                status: TransactionStatus::Expired,
                status_reason: Some(StatusReason::Expiration),
                remaining: Some(Decimal::ZERO),
            })
            .await?;

            if mutation.amount > Decimal::ZERO {
                uow.append_entry(&NewLedgerEntry {
                    organization_id,
                    client_id: grant.client_id,
                    program_id: grant.program_id,
                    transaction_type: TransactionType::Expiration,
                    amount: mutation.amount,
                    remaining: None,
                    balance_before: mutation.before,
                    balance_after: mutation.after,
                    sale_id: grant.sale_id,
                    campaign_id: grant.campaign_id,
                    reverses_transaction_id: None,
                    operator_id: None,
                    expires_at: None,
                })
                .await?;
            }

            if mutation.shortfall > Decimal::ZERO {
                uow.record_discrepancy(&NewDiscrepancy {
                    organization_id,
                    client_id: grant.client_id,
                    sale_id: grant.sale_id,
                    transaction_id: Some(grant.id),
                    shortfall: mutation.shortfall,
                    reason: StatusReason::Expiration,
                })
                .await?;
                summary.shortfall += mutation.shortfall;
            }

            summary.expired_grants += 1;
            summary.expired_amount += mutation.amount;
        }

        Ok(summary)
    }

    /// Run the sweep for one organization in its own unit of work
    ///
    /// Organizations without a program have nothing to expire.
    pub async fn expire_organization(
        store: &dyn CashbackStore,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> LedgerResult<SweepSummary> {
        let mut uow = store.begin().await?;
        let program = match uow.find_program(organization_id).await? {
            Some(program) => program,
            None => return Ok(SweepSummary::default()),
        };

        let mut cache = BalanceCache::new(&program);
        let summary = Self::run(uow.as_mut(), &mut cache, organization_id, now).await?;
        uow.commit().await?;

        if summary.expired_grants > 0 {
            tracing::info!(
                organization_id = %organization_id,
                expired_grants = summary.expired_grants,
                expired_amount = %summary.expired_amount,
                "Expired cashback grants"
            );
        }

        Ok(summary)
    }
}

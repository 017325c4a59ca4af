// Cashback Ledger
//
// Posts accruals and redemptions against a client balance inside a unit of
// work. Each posting writes the new balance and appends one snapshot entry.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cashback::cache::BalanceCache;
use crate::cashback::calculator::CashbackCalculator;
use crate::cashback::error::{LedgerError, LedgerResult};
use crate::cashback::models::{CashbackBalance, CashbackProgram, LedgerEntry, NewLedgerEntry};
use crate::cashback::types::{round_amount, TransactionType};
use crate::store::UnitOfWork;

/// Cashback to credit on a client balance
#[derive(Debug, Clone, PartialEq)]
pub struct Credit {
    pub client_id: Uuid,
    pub amount: Decimal,
    pub sale_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub operator_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Cashback to redeem against a sale
#[derive(Debug, Clone, PartialEq)]
pub struct Debit {
    pub client_id: Uuid,
    pub amount: Decimal,
    pub sale_value: Decimal,
    pub operator_id: Option<Uuid>,
}

/// Entry appended by a posting and the balance it left behind
#[derive(Debug, Clone)]
pub struct Posting {
    pub entry: LedgerEntry,
    pub balance: CashbackBalance,
}

/// Ledger postings
pub struct CashbackLedger;

impl CashbackLedger {
    /// Credit an accrual grant
    pub async fn accrue(
        uow: &mut dyn UnitOfWork,
        cache: &mut BalanceCache,
        credit: Credit,
        now: DateTime<Utc>,
    ) -> LedgerResult<Posting> {
        let amount = round_amount(credit.amount);
        let balance = cache.ensure_entry(uow, credit.client_id, now).await?;
        let mutation = CashbackCalculator::apply_accrual(&balance, amount, now)?;

        cache.store(uow, mutation.balance.clone()).await?;
        let entry = uow
            .append_entry(&NewLedgerEntry {
                organization_id: mutation.balance.organization_id,
                client_id: credit.client_id,
                program_id: cache.program_id(),
                transaction_type: TransactionType::Accrual,
                amount: mutation.amount,
                remaining: Some(mutation.amount),
                balance_before: mutation.before,
                balance_after: mutation.after,
                sale_id: credit.sale_id,
                campaign_id: credit.campaign_id,
                reverses_transaction_id: None,
                operator_id: credit.operator_id,
                expires_at: credit.expires_at,
            })
            .await?;

        tracing::debug!(
            client_id = %credit.client_id,
            amount = %mutation.amount,
            balance_after = %mutation.after,
            campaign_id = ?credit.campaign_id,
            "Cashback accrued"
        );

        Ok(Posting {
            entry,
            balance: mutation.balance,
        })
    }

    /// Redeem cashback as a discount on a sale
    ///
    /// Consumes accrual grants with the earliest expiration first.
    pub async fn redeem(
        uow: &mut dyn UnitOfWork,
        cache: &mut BalanceCache,
        program: &CashbackProgram,
        debit: Debit,
        now: DateTime<Utc>,
    ) -> LedgerResult<Posting> {
        if !program.active || !program.discount_mode_enabled {
            return Err(LedgerError::RedemptionDisabled);
        }

        let amount = round_amount(debit.amount);
        let balance = cache.ensure_entry(uow, debit.client_id, now).await?;
        let mutation = CashbackCalculator::apply_redemption(
            &balance,
            amount,
            debit.sale_value,
            &program.redemption_limit,
            now,
        )?;

        cache.store(uow, mutation.balance.clone()).await?;
        let entry = uow
            .append_entry(&NewLedgerEntry {
                organization_id: mutation.balance.organization_id,
                client_id: debit.client_id,
                program_id: program.id,
                transaction_type: TransactionType::Redemption,
                amount: mutation.amount,
                remaining: None,
                balance_before: mutation.before,
                balance_after: mutation.after,
                sale_id: None,
                campaign_id: None,
                reverses_transaction_id: None,
                operator_id: debit.operator_id,
                expires_at: None,
            })
            .await?;

        let grants = uow.active_grants(debit.client_id, program.id).await?;
        for transition in CashbackCalculator::allocate_redemption(&grants, mutation.amount) {
            uow.transition_entry(&transition).await?;
        }

        tracing::debug!(
            client_id = %debit.client_id,
            amount = %mutation.amount,
            balance_after = %mutation.after,
            "Cashback redeemed"
        );

        Ok(Posting {
            entry,
            balance: mutation.balance,
        })
    }

    /// Rebuild a client's available balance from its ledger and compare it to the stored balance
    pub async fn verify_client(
        uow: &mut dyn UnitOfWork,
        client_id: Uuid,
        program_id: Uuid,
    ) -> LedgerResult<Decimal> {
        let entries = uow.client_ledger(client_id, program_id).await?;
        let replayed = CashbackCalculator::replay(&entries)?;

        let stored = uow
            .lock_balance(client_id, program_id)
            .await?
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO);

        if stored != replayed {
            let sequence = entries.last().map(|e| e.sequence).unwrap_or(0);
            return Err(LedgerError::ReplayMismatch {
                sequence,
                reason: format!("stored balance {} differs from replayed {}", stored, replayed),
            });
        }

        Ok(replayed)
    }
}

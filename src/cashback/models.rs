use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cashback::types::{
    AccrualRule, RedemptionLimit, StatusReason, TransactionStatus, TransactionType,
};

/// Cashback program of an organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashbackProgram {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub active: bool,
    pub accrual: AccrualRule,
    /// Percentage credited to a referral partner on the same sale
    pub partner_accrual_rate: Option<Decimal>,
    pub min_sale_value: Decimal,
    pub accrue_via_integration: bool,
    pub accrue_via_point_of_interaction: bool,
    pub expiration_days: Option<i32>,
    pub redemption_limit: RedemptionLimit,
    pub discount_mode_enabled: bool,
    pub reward_mode_enabled: bool,
}

impl CashbackProgram {
    /// Expiration date for a grant issued at `now`, if the program expires cashback
    pub fn grant_expiration(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expiration_days
            .filter(|days| *days > 0)
            .map(|days| now + chrono::Duration::days(days as i64))
    }
}

/// Balance of one client within one program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CashbackBalance {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub program_id: Uuid,
    pub available: Decimal,
    pub accumulated_total: Decimal,
    pub redeemed_total: Decimal,
    pub expired_total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CashbackBalance {
    /// Fresh zero balance
    pub fn zero(organization_id: Uuid, client_id: Uuid, program_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            client_id,
            program_id,
            available: Decimal::ZERO,
            accumulated_total: Decimal::ZERO,
            redeemed_total: Decimal::ZERO,
            expired_total: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// `available = accumulated - redeemed - expired` and never negative
    pub fn is_consistent(&self) -> bool {
        self.available >= Decimal::ZERO
            && self.available == self.accumulated_total - self.redeemed_total - self.expired_total
    }
}

/// Persisted ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub sequence: i64,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub program_id: Uuid,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub status_reason: Option<StatusReason>,
    pub amount: Decimal,
    /// Still-redeemable part of an accrual grant
    pub remaining: Option<Decimal>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub sale_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub reverses_transaction_id: Option<Uuid>,
    pub operator_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Ledger entry ready to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub program_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub remaining: Option<Decimal>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub sale_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub reverses_transaction_id: Option<Uuid>,
    pub operator_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Status/remaining transition on an existing entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryTransition {
    pub entry_id: Uuid,
    pub status: TransactionStatus,
    pub status_reason: Option<StatusReason>,
    pub remaining: Option<Decimal>,
}

/// Shortfall recorded when the ledger could not take back the full amount
#[derive(Debug, Clone, PartialEq)]
pub struct NewDiscrepancy {
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub sale_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub shortfall: Decimal,
    pub reason: StatusReason,
}
